use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use scheduler_core::{
    SchedulerError, SchedulerResult, Task, TaskHandler, TaskParameters, TaskRepository, TaskStatus,
};

/// 测试处理器的行为
#[derive(Debug, Clone)]
pub enum HandlerBehavior {
    Succeed,
    Fail(String),
    /// 睡眠指定时长后成功
    Sleep(Duration),
    /// 前 n 次失败，之后成功
    FailTimes(usize),
    /// 执行时 panic
    Panic,
}

/// 可编排行为的任务处理器，记录调用次数、执行顺序和峰值并发
pub struct ScriptedHandler {
    name: String,
    behavior: HandlerBehavior,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    pub fn new(name: &str, behavior: HandlerBehavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding(name: &str) -> Arc<Self> {
        Self::new(name, HandlerBehavior::Succeed)
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Self::new(name, HandlerBehavior::Fail("boom".to_string()))
    }

    pub fn panicking(name: &str) -> Arc<Self> {
        Self::new(name, HandlerBehavior::Panic)
    }

    pub fn sleeping(name: &str, duration: Duration) -> Arc<Self> {
        Self::new(name, HandlerBehavior::Sleep(duration))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// 按开始执行的顺序返回任务ID
    pub fn executed_ids(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    async fn execute(&self, task: &Task) -> SchedulerResult<TaskParameters> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().push(task.id.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = match &self.behavior {
            HandlerBehavior::Succeed => Ok(()),
            HandlerBehavior::Fail(message) => Err(SchedulerError::TaskExecution(message.clone())),
            HandlerBehavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(())
            }
            HandlerBehavior::FailTimes(times) if call < *times => Err(
                SchedulerError::TaskExecution(format!("第{}次执行失败", call + 1)),
            ),
            HandlerBehavior::FailTimes(_) => Ok(()),
            HandlerBehavior::Panic => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("处理器 {} 执行时崩溃", self.name);
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        result.map(|_| {
            let mut output = TaskParameters::new();
            output.insert("handled_by".to_string(), json!(self.name));
            output.insert("call".to_string(), json!(call + 1));
            output
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 所有操作都返回存储失败的仓储
#[derive(Debug, Default)]
pub struct FailingTaskRepository;

impl FailingTaskRepository {
    fn failure<T>() -> SchedulerResult<T> {
        Err(SchedulerError::Persistence("存储不可用".to_string()))
    }
}

#[async_trait]
impl TaskRepository for FailingTaskRepository {
    async fn add_task(&self, _task: Task) -> SchedulerResult<String> {
        Self::failure()
    }

    async fn get_all_tasks(&self) -> SchedulerResult<Vec<Task>> {
        Self::failure()
    }

    async fn get_tasks_by_status(&self, _status: TaskStatus) -> SchedulerResult<Vec<Task>> {
        Self::failure()
    }

    async fn get_tasks_by_tags(&self, _tags: &[String]) -> SchedulerResult<Vec<Task>> {
        Self::failure()
    }

    async fn get_tasks_by_status_and_tags(
        &self,
        _status: TaskStatus,
        _tags: &[String],
    ) -> SchedulerResult<Vec<Task>> {
        Self::failure()
    }

    async fn get_task_by_id(&self, _id: &str) -> SchedulerResult<Task> {
        Self::failure()
    }

    async fn update_task(&self, _task: &Task) -> SchedulerResult<()> {
        Self::failure()
    }

    async fn update_task_status(&self, _id: &str, _status: TaskStatus) -> SchedulerResult<()> {
        Self::failure()
    }

    async fn delete_task(&self, _id: &str) -> SchedulerResult<()> {
        Self::failure()
    }

    async fn get_dependent_tasks(&self, _id: &str) -> SchedulerResult<Vec<Task>> {
        Self::failure()
    }

    async fn get_completed_task_ids(&self) -> SchedulerResult<HashSet<String>> {
        Self::failure()
    }
}
