use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, error, info, warn};

use scheduler_core::{
    SchedulerError, SchedulerResult, Task, TaskHandler, TaskParameters, TaskRepository, TaskStatus,
};
use scheduler_infrastructure::MetricsCollector;

use crate::handlers::DefaultTaskHandler;

/// 任务执行器
///
/// 运行单个任务直至结束：写入 RUNNING，按标签选择处理器，记录执行结果，
/// 最终落到 DONE、FAILED 或 RETRY。处理器报错不会向上抛出，而是记录在任务自身的
/// 状态和 `execution_result` 中。重新入队由调度器负责，这里只写 `next_run_at`。
pub struct TaskExecutor {
    repository: Arc<dyn TaskRepository>,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    default_handler: Arc<dyn TaskHandler>,
    metrics: Arc<MetricsCollector>,
}

impl TaskExecutor {
    pub fn new(repository: Arc<dyn TaskRepository>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            repository,
            handlers: RwLock::new(HashMap::new()),
            default_handler: Arc::new(DefaultTaskHandler::default()),
            metrics,
        }
    }

    pub fn with_default_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.default_handler = handler;
        self
    }

    /// 注册标签处理器，同名标签会被替换
    pub fn register_handler(&self, tag: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let tag = tag.into();
        info!(tag = %tag, handler = handler.name(), "注册任务处理器");
        self.handlers.write().insert(tag, handler);
    }

    pub fn unregister_handler(&self, tag: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.write().remove(tag)
    }

    pub fn registered_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handlers.read().keys().cloned().collect();
        tags.sort();
        tags
    }

    /// 按标签的字典序选择第一个已注册的处理器，否则使用默认处理器
    pub fn resolve_handler(&self, task: &Task) -> Arc<dyn TaskHandler> {
        let handlers = self.handlers.read();
        task.tags
            .iter()
            .find_map(|tag| handlers.get(tag).cloned())
            .unwrap_or_else(|| Arc::clone(&self.default_handler))
    }

    /// 执行指定任务，返回任务最终写入的状态
    ///
    /// 任务不处于 PENDING/QUEUED/RETRY 时返回 [`SchedulerError::InvalidState`]，且不做任何修改。
    pub async fn execute_task(&self, task_id: &str) -> SchedulerResult<TaskStatus> {
        let mut task = self.repository.get_task_by_id(task_id).await?;

        if !task.status.is_executable() {
            return Err(SchedulerError::InvalidState {
                id: task.id.clone(),
                status: task.status,
                operation: "execute".to_string(),
            });
        }

        let attempt = task.retry_count;
        task.transition_to(TaskStatus::Running)?;
        task.start_time = Some(Utc::now());
        task.end_time = None;
        task.next_run_at = None;
        self.repository.update_task(&task).await?;

        let handler = self.resolve_handler(&task);
        info!(
            task_id = %task.id,
            name = %task.name,
            handler = handler.name(),
            attempt = attempt + 1,
            "开始执行任务"
        );

        let started = Instant::now();
        let executed_at = Utc::now();
        let outcome = handler.execute(&task).await;
        let elapsed = started.elapsed();
        self.metrics.record_task_execution(elapsed.as_secs_f64());

        // 超时监督可能已经接管了这次执行
        let mut current = self.repository.get_task_by_id(task_id).await?;
        if current.status != TaskStatus::Running || current.retry_count != attempt {
            warn!(
                task_id = %task_id,
                status = %current.status,
                "任务状态已被其他组件变更，丢弃本次执行结果"
            );
            return Ok(current.status);
        }

        let mut result = TaskParameters::new();
        result.insert("executed_at".to_string(), json!(executed_at.to_rfc3339()));
        result.insert("duration_ms".to_string(), json!(elapsed.as_millis() as u64));
        result.insert("handler".to_string(), json!(handler.name()));
        current.end_time = Some(Utc::now());

        let final_status = match outcome {
            Ok(output) => {
                result.insert("outcome".to_string(), json!("success"));
                result.extend(output);
                current.execution_result = Some(result);
                current.transition_to(TaskStatus::Done)?;
                info!(task_id = %task_id, duration_ms = elapsed.as_millis() as u64, "任务执行成功");
                TaskStatus::Done
            }
            Err(err) => {
                result.insert("outcome".to_string(), json!("error"));
                result.insert("error".to_string(), json!(err.to_string()));
                current.execution_result = Some(result);
                self.metrics.record_task_failure();
                self.apply_failure(&mut current, &err)?
            }
        };

        self.repository.update_task(&current).await?;
        Ok(final_status)
    }

    /// 根据重试策略把失败的任务置为 RETRY 或 FAILED
    fn apply_failure(&self, task: &mut Task, err: &SchedulerError) -> SchedulerResult<TaskStatus> {
        match &task.retry_policy {
            Some(policy) if policy.allows_retry(task.retry_count) => {
                let delay = policy.backoff_delay(task.retry_count);
                task.next_run_at = Some(policy.next_retry_at(task.retry_count, Utc::now()));
                task.retry_count += 1;
                task.transition_to(TaskStatus::Retry)?;
                self.metrics.record_task_retry();
                warn!(
                    task_id = %task.id,
                    retry_count = task.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "任务执行失败，等待重试"
                );
                Ok(TaskStatus::Retry)
            }
            Some(_) => {
                task.transition_to(TaskStatus::Failed)?;
                error!(task_id = %task.id, error = %err, "任务执行失败，已达到最大重试次数");
                Ok(TaskStatus::Failed)
            }
            None => {
                task.transition_to(TaskStatus::Failed)?;
                debug!(task_id = %task.id, error = %err, "任务执行失败，未配置重试策略");
                Ok(TaskStatus::Failed)
            }
        }
    }
}
