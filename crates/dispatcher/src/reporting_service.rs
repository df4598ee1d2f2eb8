use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scheduler_core::{SchedulerError, SchedulerResult, Task, TaskRepository, TaskStatus};

/// 报告策略：把一组任务渲染成报告并发布
#[async_trait]
pub trait ReportingStrategy: Send + Sync {
    fn generate_report(&self, tasks: &[Task]) -> SchedulerResult<String>;

    async fn publish_report(&self, report: &str) -> SchedulerResult<()>;
}

/// 文本表格报告
#[derive(Debug, Default)]
pub struct TableReportStrategy;

impl TableReportStrategy {
    const HEADERS: [&'static str; 6] = ["Task ID", "Name", "Type", "Status", "Duration (ms)", "Results"];
}

#[async_trait]
impl ReportingStrategy for TableReportStrategy {
    fn generate_report(&self, tasks: &[Task]) -> SchedulerResult<String> {
        let rows: Vec<[String; 6]> = tasks
            .iter()
            .map(|task| {
                let result = task.execution_result.as_ref();
                let duration = result
                    .and_then(|r| r.get("duration_ms"))
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                [
                    task.id.clone(),
                    task.name.clone(),
                    format!("{:?}", task.task_type).to_uppercase(),
                    task.status.to_string(),
                    duration,
                    format!("{} result(s)", result.map_or(0, |r| r.len())),
                ]
            })
            .collect();

        let mut widths = Self::HEADERS.map(|h| h.chars().count());
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let render = |cells: Vec<&str>| -> String {
            let padded: Vec<String> = cells
                .iter()
                .zip(widths.iter())
                .map(|(cell, width)| format!("{cell:<width$}"))
                .collect();
            format!("| {} |", padded.join(" | "))
        };

        let mut lines = vec![render(Self::HEADERS.to_vec())];
        lines.push(format!(
            "|{}|",
            widths
                .iter()
                .map(|w| "-".repeat(w + 2))
                .collect::<Vec<_>>()
                .join("|")
        ));
        for row in &rows {
            lines.push(render(row.iter().map(String::as_str).collect()));
        }
        Ok(lines.join("\n"))
    }

    async fn publish_report(&self, report: &str) -> SchedulerResult<()> {
        info!(report_type = "table", "任务结果报告\n{report}");
        Ok(())
    }
}

/// JSON 汇总报告：按状态、类型统计数量及平均耗时
#[derive(Debug, Default)]
pub struct SummaryReportStrategy;

#[async_trait]
impl ReportingStrategy for SummaryReportStrategy {
    fn generate_report(&self, tasks: &[Task]) -> SchedulerResult<String> {
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut durations = Vec::new();

        for task in tasks {
            *by_status.entry(task.status.to_string()).or_default() += 1;
            *by_type
                .entry(format!("{:?}", task.task_type).to_uppercase())
                .or_default() += 1;
            if let Some(ms) = task
                .execution_result
                .as_ref()
                .and_then(|r| r.get("duration_ms"))
                .and_then(|v| v.as_u64())
            {
                durations.push(ms);
            }
        }

        let average_duration_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<u64>() as f64 / durations.len() as f64)
        };

        let summary = json!({
            "total": tasks.len(),
            "by_status": by_status,
            "by_type": by_type,
            "average_duration_ms": average_duration_ms,
        });
        Ok(serde_json::to_string_pretty(&summary)?)
    }

    async fn publish_report(&self, report: &str) -> SchedulerResult<()> {
        info!(report_type = "summary", report, "任务汇总报告");
        Ok(())
    }
}

/// 结果报告服务
///
/// 周期性地把 DONE 任务交给每个已注册的策略生成并发布报告，也支持按类型即时生成。
pub struct ResultReportingService {
    repository: Arc<dyn TaskRepository>,
    strategies: RwLock<BTreeMap<String, Arc<dyn ReportingStrategy>>>,
    interval: Duration,
    token: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ResultReportingService {
    pub fn new(repository: Arc<dyn TaskRepository>, interval: Duration) -> Self {
        Self {
            repository,
            strategies: RwLock::new(BTreeMap::new()),
            interval,
            token: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// 按名称注册内置策略，未知名称记录警告后忽略
    pub fn with_builtin_strategies(self, report_types: &[String]) -> Self {
        let builtin: HashMap<&str, Arc<dyn ReportingStrategy>> = HashMap::from([
            ("table", Arc::new(TableReportStrategy) as Arc<dyn ReportingStrategy>),
            ("summary", Arc::new(SummaryReportStrategy) as Arc<dyn ReportingStrategy>),
        ]);
        for report_type in report_types {
            match builtin.get(report_type.as_str()) {
                Some(strategy) => self.register_strategy(report_type.clone(), Arc::clone(strategy)),
                None => warn!(report_type = %report_type, "未知的报告类型"),
            }
        }
        self
    }

    pub fn register_strategy(&self, report_type: impl Into<String>, strategy: Arc<dyn ReportingStrategy>) {
        self.strategies.write().insert(report_type.into(), strategy);
    }

    pub fn report_types(&self) -> Vec<String> {
        self.strategies.read().keys().cloned().collect()
    }

    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) {
        let mut token_slot = self.token.lock();
        if token_slot.is_some() {
            debug!("报告服务已在运行");
            return;
        }
        let token = shutdown.child_token();
        *token_slot = Some(token.clone());

        info!(interval_secs = self.interval.as_secs(), "启动结果报告服务");
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval 的第一次 tick 立即完成，跳过它
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        this.generate_reports().await;
                    }
                }
            }
            debug!("结果报告服务已退出");
        });
        *self.handle.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(token) = self.token.lock().take() {
            token.cancel();
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "报告循环异常退出");
            }
        }
    }

    /// 为所有策略生成并发布 DONE 任务的报告，返回成功发布的数量
    pub async fn generate_reports(&self) -> usize {
        let done = match self.repository.get_tasks_by_status(TaskStatus::Done).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "获取已完成任务失败");
                return 0;
            }
        };
        if done.is_empty() {
            debug!("没有已完成的任务需要报告");
            return 0;
        }

        let strategies: Vec<(String, Arc<dyn ReportingStrategy>)> = self
            .strategies
            .read()
            .iter()
            .map(|(name, strategy)| (name.clone(), Arc::clone(strategy)))
            .collect();

        let mut published = 0;
        for (name, strategy) in strategies {
            let report = match strategy.generate_report(&done) {
                Ok(report) => report,
                Err(e) => {
                    error!(report_type = %name, error = %e, "生成报告失败");
                    continue;
                }
            };
            match strategy.publish_report(&report).await {
                Ok(()) => published += 1,
                Err(e) => error!(report_type = %name, error = %e, "发布报告失败"),
            }
        }
        published
    }

    /// 按需生成指定类型的报告（不发布）
    pub async fn generate_report(&self, report_type: &str) -> SchedulerResult<String> {
        let strategy = self
            .strategies
            .read()
            .get(report_type)
            .cloned()
            .ok_or_else(|| SchedulerError::Configuration(format!("未知的报告类型: {report_type}")))?;

        let done = self.repository.get_tasks_by_status(TaskStatus::Done).await?;
        strategy.generate_report(&done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::TaskParameters;
    use scheduler_infrastructure::InMemoryTaskRepository;

    async fn completed_task(repo: &InMemoryTaskRepository, name: &str, duration_ms: u64) -> String {
        let id = repo.add_task(Task::immediate(name)).await.unwrap();
        let mut task = repo.get_task_by_id(&id).await.unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        repo.update_task(&task).await.unwrap();

        let mut result = TaskParameters::new();
        result.insert("duration_ms".to_string(), json!(duration_ms));
        task.execution_result = Some(result);
        task.transition_to(TaskStatus::Done).unwrap();
        repo.update_task(&task).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_on_demand_table_report() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let id = completed_task(&repo, "backup", 120).await;
        repo.add_task(Task::immediate("still pending")).await.unwrap();

        let service = ResultReportingService::new(repo, Duration::from_secs(30))
            .with_builtin_strategies(&["table".to_string()]);
        let report = service.generate_report("table").await.unwrap();

        assert!(report.contains("Task ID"));
        assert!(report.contains(&id));
        assert!(report.contains("backup"));
        assert!(report.contains("120"));
        assert!(!report.contains("still pending"));
    }

    #[tokio::test]
    async fn test_summary_report_counts() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        completed_task(&repo, "a", 100).await;
        completed_task(&repo, "b", 300).await;

        let service = ResultReportingService::new(repo, Duration::from_secs(30))
            .with_builtin_strategies(&["summary".to_string()]);
        let report = service.generate_report("summary").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&report).unwrap();

        assert_eq!(value["total"], 2);
        assert_eq!(value["by_status"]["DONE"], 2);
        assert_eq!(value["average_duration_ms"], 200.0);
    }

    #[tokio::test]
    async fn test_unknown_report_type() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let service = ResultReportingService::new(repo, Duration::from_secs(30))
            .with_builtin_strategies(&["table".to_string(), "confluence".to_string()]);

        assert_eq!(service.report_types(), vec!["table".to_string()]);
        assert!(matches!(
            service.generate_report("confluence").await,
            Err(SchedulerError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_reports_publishes_each_strategy() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let service = ResultReportingService::new(repo.clone(), Duration::from_secs(30))
            .with_builtin_strategies(&["table".to_string(), "summary".to_string()]);

        assert_eq!(service.generate_reports().await, 0);
        completed_task(&repo, "done", 5).await;
        assert_eq!(service.generate_reports().await, 2);
    }
}
