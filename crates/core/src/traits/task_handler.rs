use async_trait::async_trait;

use crate::models::{Task, TaskParameters};
use crate::SchedulerResult;

/// 按标签路由的任务处理器
///
/// 处理器在运行时注册到执行器，返回的字段会合并进任务的 `execution_result`。
/// 返回错误表示本次执行失败，由执行器决定进入 FAILED 还是 RETRY。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: &Task) -> SchedulerResult<TaskParameters>;

    fn name(&self) -> &str;
}
