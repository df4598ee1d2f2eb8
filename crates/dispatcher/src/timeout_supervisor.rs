use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use scheduler_core::{SchedulerResult, Task, TaskRepository, TaskStatus};
use scheduler_infrastructure::MetricsCollector;

/// 超时任务的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutResolution {
    /// 已置为 RETRY，需要在 `next_run_at` 之后重新入队
    Retry {
        task_id: String,
        retry_count: u32,
        next_run_at: DateTime<Utc>,
    },
    Failed { task_id: String },
}

/// 超时监督
///
/// 扫描 RUNNING 且设置了 `timeout_seconds` 的任务，超时后先写入 TIMEOUT，
/// 再根据重试策略写入 RETRY（递增 `retry_count` 并计算 `next_run_at`）或 FAILED。
/// 正在执行的处理器不会被中断。
pub struct TimeoutSupervisor {
    repository: Arc<dyn TaskRepository>,
    metrics: Arc<MetricsCollector>,
}

impl TimeoutSupervisor {
    pub fn new(repository: Arc<dyn TaskRepository>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            repository,
            metrics,
        }
    }

    /// 执行一轮超时检查，单个任务的存储错误只记录日志
    pub async fn check_timeouts(&self) -> SchedulerResult<Vec<TimeoutResolution>> {
        let running = self
            .repository
            .get_tasks_by_status(TaskStatus::Running)
            .await?;
        let now = Utc::now();

        let mut resolutions = Vec::new();
        for task in running.into_iter().filter(|t| t.is_timeout_reached(now)) {
            let task_id = task.id.clone();
            match self.handle_timeout(task).await {
                Ok(resolution) => resolutions.push(resolution),
                Err(e) => error!(task_id = %task_id, error = %e, "处理超时任务失败"),
            }
        }

        Ok(resolutions)
    }

    async fn handle_timeout(&self, mut task: Task) -> SchedulerResult<TimeoutResolution> {
        warn!(
            task_id = %task.id,
            timeout_seconds = task.timeout_seconds,
            running_since = %task.running_since(),
            "任务执行超时"
        );
        self.metrics.record_task_timeout();

        task.transition_to(TaskStatus::Timeout)?;
        self.repository.update_task(&task).await?;

        match task.retry_policy.clone() {
            Some(policy) if policy.allows_retry(task.retry_count) => {
                let next_run_at = policy.next_retry_at(task.retry_count, Utc::now());

                task.retry_count += 1;
                task.next_run_at = Some(next_run_at);
                task.transition_to(TaskStatus::Retry)?;
                self.repository.update_task(&task).await?;
                self.metrics.record_task_retry();

                debug!(
                    task_id = %task.id,
                    retry_count = task.retry_count,
                    next_run_at = %next_run_at,
                    "超时任务将重试"
                );
                Ok(TimeoutResolution::Retry {
                    task_id: task.id,
                    retry_count: task.retry_count,
                    next_run_at,
                })
            }
            _ => {
                task.transition_to(TaskStatus::Failed)?;
                self.repository.update_task(&task).await?;
                self.metrics.record_task_failure();
                Ok(TimeoutResolution::Failed { task_id: task.id })
            }
        }
    }
}
