//! 任务存储接口定义
//!
//! `TaskRepository` 是任务状态的唯一权威来源。调度器的内存队列只是视图，
//! 任何状态变更都必须先写入存储。
//!
//! 实现要求：
//! - 所有方法可被多个后台循环并发调用
//! - `get_task_by_id` / `update_task` / `update_task_status` / `delete_task`
//!   在 ID 不存在时返回 [`SchedulerError::TaskNotFound`](crate::SchedulerError)
//! - 状态写入必须经过 [`Task::transition_to`] 校验
//!
//! ```rust,ignore
//! async fn show(repo: &dyn TaskRepository) -> SchedulerResult<()> {
//!     let id = repo.add_task(Task::immediate("demo")).await?;
//!     let task = repo.get_task_by_id(&id).await?;
//!     println!("{} -> {}", task.id, task.status);
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;

use async_trait::async_trait;

use crate::models::{Task, TaskStatus};
use crate::SchedulerResult;

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 保存新任务，返回（可能新生成的）任务ID
    async fn add_task(&self, task: Task) -> SchedulerResult<String>;

    async fn get_all_tasks(&self) -> SchedulerResult<Vec<Task>>;

    async fn get_tasks_by_status(&self, status: TaskStatus) -> SchedulerResult<Vec<Task>>;

    /// 返回至少带有其中一个标签的任务
    async fn get_tasks_by_tags(&self, tags: &[String]) -> SchedulerResult<Vec<Task>>;

    async fn get_tasks_by_status_and_tags(
        &self,
        status: TaskStatus,
        tags: &[String],
    ) -> SchedulerResult<Vec<Task>>;

    async fn get_task_by_id(&self, id: &str) -> SchedulerResult<Task>;

    /// 整体替换任务记录，状态变化同样受状态机约束
    async fn update_task(&self, task: &Task) -> SchedulerResult<()>;

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> SchedulerResult<()>;

    async fn delete_task(&self, id: &str) -> SchedulerResult<()>;

    /// 依赖于指定任务的所有任务
    async fn get_dependent_tasks(&self, id: &str) -> SchedulerResult<Vec<Task>>;

    async fn get_completed_task_ids(&self) -> SchedulerResult<HashSet<String>>;

    /// 历史记录：DONE、FAILED、TIMEOUT 状态的任务
    async fn get_history(&self) -> SchedulerResult<Vec<Task>> {
        let mut history = Vec::new();
        for status in [TaskStatus::Done, TaskStatus::Failed, TaskStatus::Timeout] {
            history.extend(self.get_tasks_by_status(status).await?);
        }
        history.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(history)
    }
}
