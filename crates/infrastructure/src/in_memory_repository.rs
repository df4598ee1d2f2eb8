use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use scheduler_core::{SchedulerError, SchedulerResult, Task, TaskRepository, TaskStatus};

#[derive(Debug)]
struct StoredTask {
    /// 插入序号，用于稳定的读取顺序
    seq: u64,
    task: Task,
}

/// 内存任务存储
///
/// 进程内的 [`TaskRepository`] 实现。所有读取按插入顺序返回任务副本，
/// 每次写入都会经过状态机校验并刷新 `updated_at`。
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, StoredTask>>,
    next_seq: AtomicU64,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    fn collect<F>(&self, predicate: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool,
    {
        let tasks = self.tasks.read();
        let mut matched: Vec<&StoredTask> =
            tasks.values().filter(|stored| predicate(&stored.task)).collect();
        matched.sort_by_key(|stored| stored.seq);
        matched.into_iter().map(|stored| stored.task.clone()).collect()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn add_task(&self, mut task: Task) -> SchedulerResult<String> {
        if task.id.is_empty() {
            task.id = Uuid::new_v4().to_string();
        }
        task.validate()?;

        let now = Utc::now();
        task.status = TaskStatus::Pending;
        task.created_at = now;
        task.updated_at = now;

        let mut tasks = self.tasks.write();
        if tasks.contains_key(&task.id) {
            return Err(SchedulerError::Persistence(format!(
                "任务ID已存在: {}",
                task.id
            )));
        }

        let id = task.id.clone();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %id, name = %task.name, "保存新任务");
        tasks.insert(id.clone(), StoredTask { seq, task });
        Ok(id)
    }

    async fn get_all_tasks(&self) -> SchedulerResult<Vec<Task>> {
        Ok(self.collect(|_| true))
    }

    async fn get_tasks_by_status(&self, status: TaskStatus) -> SchedulerResult<Vec<Task>> {
        Ok(self.collect(|task| task.status == status))
    }

    async fn get_tasks_by_tags(&self, tags: &[String]) -> SchedulerResult<Vec<Task>> {
        Ok(self.collect(|task| tags.iter().any(|tag| task.has_tag(tag))))
    }

    async fn get_tasks_by_status_and_tags(
        &self,
        status: TaskStatus,
        tags: &[String],
    ) -> SchedulerResult<Vec<Task>> {
        Ok(self.collect(|task| task.status == status && tags.iter().any(|tag| task.has_tag(tag))))
    }

    async fn get_task_by_id(&self, id: &str) -> SchedulerResult<Task> {
        self.tasks
            .read()
            .get(id)
            .map(|stored| stored.task.clone())
            .ok_or_else(|| SchedulerError::task_not_found(id))
    }

    async fn update_task(&self, task: &Task) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write();
        let stored = tasks
            .get_mut(&task.id)
            .ok_or_else(|| SchedulerError::task_not_found(&task.id))?;

        if !stored
            .task
            .status
            .can_transition_to(task.status, task.is_recurring())
        {
            return Err(SchedulerError::InvalidTransition {
                id: task.id.clone(),
                from: stored.task.status,
                to: task.status,
            });
        }

        let mut next = task.clone();
        next.created_at = stored.task.created_at;
        next.updated_at = stored.task.updated_at;
        next.touch();
        stored.task = next;
        Ok(())
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write();
        let stored = tasks
            .get_mut(id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;
        stored.task.transition_to(status)
    }

    async fn delete_task(&self, id: &str) -> SchedulerResult<()> {
        self.tasks
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::task_not_found(id))
    }

    async fn get_dependent_tasks(&self, id: &str) -> SchedulerResult<Vec<Task>> {
        Ok(self.collect(|task| task.dependencies.iter().any(|dep| dep == id)))
    }

    async fn get_completed_task_ids(&self) -> SchedulerResult<HashSet<String>> {
        Ok(self
            .tasks
            .read()
            .values()
            .filter(|stored| stored.task.status == TaskStatus::Done)
            .map(|stored| stored.task.id.clone())
            .collect())
    }
}
