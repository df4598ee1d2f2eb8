use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::RetryPolicy;
use crate::errors::{SchedulerError, SchedulerResult};

/// 任务参数及执行结果使用的自由映射
pub type TaskParameters = HashMap<String, serde_json::Value>;

/// 任务定义
///
/// 系统中可调度执行的最小工作单元。状态只能通过 [`Task::transition_to`] 按状态机变更，
/// 存储层在每次写入时都会重新校验。
///
/// # 使用示例
///
/// ```rust
/// use scheduler_core::models::{Task, TaskPriority};
///
/// let task = Task::immediate("发送通知")
///     .with_priority(TaskPriority::High)
///     .with_tags(["MATTERMOST"])
///     .with_parameter("forward_type", "notification");
/// assert!(task.has_tag("MATTERMOST"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// 为空时由存储层分配 UUID
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    /// SCHEDULED 任务的 cron 表达式（6段，含秒）
    #[serde(default)]
    pub cron_expr: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// 0 表示不做超时检查
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub parameters: TaskParameters,
    #[serde(default)]
    pub execution_result: Option<TaskParameters>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Immediate,
    Scheduled,
}

/// 任务优先级，声明顺序即排序权重（HIGH 最先）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    pub fn weight(self) -> u8 {
        match self {
            TaskPriority::High => 0,
            TaskPriority::Medium => 1,
            TaskPriority::Low => 2,
        }
    }
}

/// 任务状态
///
/// ```text
/// PENDING   -> QUEUED | SCHEDULED
/// SCHEDULED -> QUEUED            (cron 触发)
/// QUEUED    -> RUNNING
/// RUNNING   -> DONE | FAILED | RETRY | TIMEOUT
/// TIMEOUT   -> RETRY | FAILED
/// RETRY     -> QUEUED
/// ```
///
/// 另外：执行器可直接从 PENDING/QUEUED/RETRY 进入 RUNNING；注册失败时 PENDING/SCHEDULED/QUEUED
/// 可进入 FAILED；周期任务在 cron 再次触发时可从任意非执行中状态回到 QUEUED。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    Queued,
    Scheduled,
    Running,
    Done,
    Failed,
    Timeout,
    Retry,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
            TaskStatus::Retry => "RETRY",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }

    /// 执行器接受的起始状态
    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Retry
        )
    }

    /// 是否允许从当前状态转换到 `next`，`recurring` 表示任务绑定了 cron 表达式
    pub fn can_transition_to(&self, next: TaskStatus, recurring: bool) -> bool {
        use TaskStatus::*;

        if *self == next {
            return true;
        }

        match (self, next) {
            (Pending, Queued | Scheduled | Running | Failed) => true,
            (Scheduled, Queued | Failed) => true,
            (Queued, Running | Failed) => true,
            (Running, Done | Failed | Retry | Timeout) => true,
            (Timeout, Retry | Failed) => true,
            (Retry, Queued | Running | Failed) => true,
            (Done | Failed | Timeout, Queued) => recurring,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Task {
    pub fn new(name: impl Into<String>, task_type: TaskType) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            task_type,
            cron_expr: None,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            tags: BTreeSet::new(),
            dependencies: Vec::new(),
            timeout_seconds: 0,
            retry_policy: None,
            retry_count: 0,
            parameters: TaskParameters::new(),
            execution_result: None,
            created_at: now,
            updated_at: now,
            start_time: None,
            end_time: None,
            next_run_at: None,
        }
    }

    /// 创建立即执行的任务
    pub fn immediate(name: impl Into<String>) -> Self {
        Self::new(name, TaskType::Immediate)
    }

    /// 创建绑定 cron 表达式的周期任务
    pub fn scheduled(name: impl Into<String>, cron_expr: impl Into<String>) -> Self {
        let mut task = Self::new(name, TaskType::Scheduled);
        task.cron_expr = Some(cron_expr.into());
        task
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: TaskParameters) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    /// 绑定了非空 cron 表达式的 SCHEDULED 任务
    pub fn is_recurring(&self) -> bool {
        self.task_type == TaskType::Scheduled
            && self
                .cron_expr
                .as_deref()
                .is_some_and(|expr| !expr.trim().is_empty())
    }

    /// 所有依赖均已完成时才可执行
    pub fn can_be_executed(&self, completed_task_ids: &HashSet<String>) -> bool {
        self.dependencies
            .iter()
            .all(|dependency| completed_task_ids.contains(dependency))
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.task_type == TaskType::Scheduled && !self.is_recurring() {
            return Err(SchedulerError::InvalidTask(format!(
                "SCHEDULED 任务 '{}' 缺少 cron 表达式",
                self.name
            )));
        }
        if self.dependencies.iter().any(|dep| !self.id.is_empty() && *dep == self.id) {
            return Err(SchedulerError::InvalidTask(format!(
                "任务 {} 不能依赖自身",
                self.id
            )));
        }
        Ok(())
    }

    /// 按状态机变更状态并刷新 `updated_at`
    pub fn transition_to(&mut self, next: TaskStatus) -> SchedulerResult<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next, self.is_recurring()) {
            return Err(SchedulerError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// `updated_at` 单调递增，即使两次写入落在同一时钟刻度内
    pub fn touch(&mut self) {
        let now = Utc::now();
        let floor = self.updated_at + Duration::microseconds(1);
        self.updated_at = if now > floor { now } else { floor };
    }

    /// 超时计时起点：优先使用开始执行时间
    pub fn running_since(&self) -> DateTime<Utc> {
        self.start_time.unwrap_or(self.updated_at)
    }

    /// 超出可表示范围的 `timeout_seconds` 视为永不超时
    pub fn is_timeout_reached(&self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Running || self.timeout_seconds == 0 {
            return false;
        }
        let Some(timeout) = i64::try_from(self.timeout_seconds)
            .ok()
            .and_then(Duration::try_seconds)
        else {
            return false;
        };
        now.signed_duration_since(self.running_since()) > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_new_task_defaults() {
        let task = Task::immediate("demo");
        assert!(task.id.is_empty());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(task.execution_result.is_none());
        assert_eq!(task.retry_count, 0);
    }

    #[test]
    fn test_can_be_executed_without_dependencies() {
        let task = Task::immediate("no-deps");
        assert!(task.can_be_executed(&HashSet::new()));
        let completed: HashSet<String> = ["x".to_string()].into_iter().collect();
        assert!(task.can_be_executed(&completed));
    }

    #[test]
    fn test_can_be_executed_with_dependencies() {
        let task = Task::immediate("with-deps").with_dependencies(["a", "b"]);

        let mut completed = HashSet::new();
        assert!(!task.can_be_executed(&completed));
        completed.insert("a".to_string());
        assert!(!task.can_be_executed(&completed));
        completed.insert("b".to_string());
        assert!(task.can_be_executed(&completed));
    }

    #[test]
    fn test_priority_ordering() {
        let mut priorities = vec![TaskPriority::Low, TaskPriority::High, TaskPriority::Medium];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![TaskPriority::High, TaskPriority::Medium, TaskPriority::Low]
        );
        assert!(TaskPriority::High.weight() < TaskPriority::Low.weight());
    }

    #[test]
    fn test_scheduled_task_requires_cron() {
        let mut task = Task::new("cron-less", TaskType::Scheduled);
        assert!(matches!(task.validate(), Err(SchedulerError::InvalidTask(_))));

        task.cron_expr = Some("   ".to_string());
        assert!(task.validate().is_err());

        let task = Task::scheduled("nightly", "0 0 2 * * *");
        assert!(task.validate().is_ok());
        assert!(task.is_recurring());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let task = Task::immediate("loop").with_id("t1").with_dependencies(["t1"]);
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut task = Task::immediate("flow").with_id("t1");
        task.transition_to(TaskStatus::Queued).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        task.transition_to(TaskStatus::Timeout).unwrap();
        task.transition_to(TaskStatus::Retry).unwrap();
        task.transition_to(TaskStatus::Queued).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        task.transition_to(TaskStatus::Done).unwrap();
    }

    #[test]
    fn test_state_machine_rejects_illegal_transitions() {
        let mut task = Task::immediate("flow").with_id("t1");
        let err = task.transition_to(TaskStatus::Done).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Done,
                ..
            }
        ));

        task.transition_to(TaskStatus::Queued).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        task.transition_to(TaskStatus::Done).unwrap();
        // 非周期任务完成后不能重新排队
        assert!(task.transition_to(TaskStatus::Queued).is_err());
        assert_eq!(task.status, TaskStatus::Done);
    }

    #[test]
    fn test_recurring_task_requeues_after_completion() {
        let mut task = Task::scheduled("tick", "* * * * * *").with_id("t1");
        task.transition_to(TaskStatus::Scheduled).unwrap();
        task.transition_to(TaskStatus::Queued).unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        task.transition_to(TaskStatus::Done).unwrap();
        assert!(task.transition_to(TaskStatus::Queued).is_ok());
    }

    #[test]
    fn test_updated_at_strictly_increases() {
        let mut task = Task::immediate("clock");
        let mut previous = task.updated_at;
        for _ in 0..100 {
            task.touch();
            assert!(task.updated_at > previous);
            previous = task.updated_at;
        }
    }

    #[test]
    fn test_timeout_detection() {
        let mut task = Task::immediate("slow").with_timeout_seconds(1);
        task.status = TaskStatus::Running;
        let started = Utc::now() - Duration::seconds(2);
        task.start_time = Some(started);
        assert!(task.is_timeout_reached(Utc::now()));

        task.start_time = Some(Utc::now());
        assert!(!task.is_timeout_reached(Utc::now()));

        task.timeout_seconds = 0;
        task.start_time = Some(started);
        assert!(!task.is_timeout_reached(Utc::now()));
    }

    #[test]
    fn test_oversized_timeout_never_expires() {
        let mut task = Task::immediate("endless");
        task.status = TaskStatus::Running;
        task.start_time = Some(Utc::now() - Duration::days(365));

        for timeout_seconds in [u64::MAX, i64::MAX as u64, (i64::MAX / 1000) as u64 + 1] {
            task.timeout_seconds = timeout_seconds;
            assert!(!task.is_timeout_reached(Utc::now()));
        }

        task.timeout_seconds = 60;
        assert!(task.is_timeout_reached(Utc::now()));
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let task = Task::immediate("wire")
            .with_priority(TaskPriority::High)
            .with_retry_policy(RetryPolicy::new(2, StdDuration::from_millis(500), 2.0));
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["priority"], "HIGH");
        assert_eq!(json["task_type"], "IMMEDIATE");
        assert_eq!(json["retry_policy"]["max_retries"], 2);
    }
}
