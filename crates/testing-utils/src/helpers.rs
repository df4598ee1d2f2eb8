use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use scheduler_core::{TaskRepository, TaskStatus};

/// 轮询直到条件成立或超时，返回条件最终是否成立
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// 等待任务进入指定状态
pub async fn wait_for_status(
    repo: &dyn TaskRepository,
    task_id: &str,
    status: TaskStatus,
    timeout: Duration,
) -> bool {
    wait_until(timeout, move || async move {
        matches!(repo.get_task_by_id(task_id).await, Ok(task) if task.status == status)
    })
    .await
}
