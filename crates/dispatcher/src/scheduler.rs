use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scheduler_core::config::SchedulerConfig;
use scheduler_core::{SchedulerError, SchedulerResult, Task, TaskRepository, TaskStatus};
use scheduler_infrastructure::MetricsCollector;
use scheduler_worker::TaskExecutor;

use crate::cron_utils::CronScheduler;
use crate::timeout_supervisor::{TimeoutResolution, TimeoutSupervisor};

/// 调度器运行参数
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub poll_interval: Duration,
    pub queue_process_interval: Duration,
    pub timeout_check_interval: Duration,
    pub max_concurrency: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            queue_process_interval: Duration::from_millis(config.queue_process_interval_ms),
            timeout_check_interval: Duration::from_secs(config.timeout_check_interval_seconds),
            max_concurrency: config.max_concurrency,
        }
    }
}

/// 执行中的并发名额，drop 时归还
struct RunningSlot {
    scheduler: Arc<TaskScheduler>,
    task_id: String,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        let running = {
            let mut running = self.scheduler.running.lock();
            running.remove(&self.task_id);
            running.len()
        };
        self.scheduler.metrics.update_running_tasks(running);
    }
}

struct CronEntry {
    entry_id: u64,
    expression: String,
    token: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Idle,
    Running,
    Stopped,
}

/// 任务调度器
///
/// 维护按优先级排序的就绪队列、执行中的任务集合以及 cron 表。三者各自加锁，
/// 锁只在排序、挑选、移除期间持有，执行路径在独立的 tokio 任务中运行。
///
/// 后台活动：
/// - 轮询循环：把存储中的 PENDING 任务入队或注册为 cron 任务
/// - 队列处理循环：在并发上限内派发依赖已满足的任务
/// - 超时检查循环：把超时任务交给 [`TimeoutSupervisor`]
/// - 每个 cron 条目、每个等待中的重试各自是一个睡眠中的任务
///
/// RETRY 状态任务的重新入队只由调度器负责。
pub struct TaskScheduler {
    repository: Arc<dyn TaskRepository>,
    executor: Arc<TaskExecutor>,
    supervisor: TimeoutSupervisor,
    metrics: Arc<MetricsCollector>,
    options: SchedulerOptions,
    max_concurrency: AtomicUsize,
    queue: Mutex<Vec<Task>>,
    running: Mutex<HashSet<String>>,
    cron_jobs: Mutex<HashMap<String, CronEntry>>,
    next_cron_entry_id: AtomicU64,
    /// 等待中的重试，按 (任务ID, retry_count) 去重
    pending_retries: Mutex<HashSet<(String, u32)>>,
    token: CancellationToken,
    state: Mutex<LifecycleState>,
    loop_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        executor: Arc<TaskExecutor>,
        metrics: Arc<MetricsCollector>,
        options: SchedulerOptions,
    ) -> Self {
        let supervisor = TimeoutSupervisor::new(Arc::clone(&repository), Arc::clone(&metrics));
        Self {
            repository,
            executor,
            supervisor,
            metrics,
            max_concurrency: AtomicUsize::new(options.max_concurrency),
            options,
            queue: Mutex::new(Vec::new()),
            running: Mutex::new(HashSet::new()),
            cron_jobs: Mutex::new(HashMap::new()),
            next_cron_entry_id: AtomicU64::new(1),
            pending_retries: Mutex::new(HashSet::new()),
            token: CancellationToken::new(),
            state: Mutex::new(LifecycleState::Idle),
            loop_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn set_max_concurrency(&self, max_concurrency: usize) {
        info!(max_concurrency, "调整最大并发数");
        self.max_concurrency.store(max_concurrency, Ordering::SeqCst);
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// 当前队列中的任务ID，按入队顺序
    pub fn queued_task_ids(&self) -> Vec<String> {
        self.queue.lock().iter().map(|t| t.id.clone()).collect()
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    pub fn cron_entry_count(&self) -> usize {
        self.cron_jobs.lock().len()
    }

    pub fn cron_expression(&self, task_id: &str) -> Option<String> {
        self.cron_jobs
            .lock()
            .get(task_id)
            .map(|entry| entry.expression.clone())
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == LifecycleState::Running
    }

    /// 启动后台循环，`shutdown` 被取消时等同于调用 [`TaskScheduler::stop`] 的信号部分
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> SchedulerResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Running => {
                    return Err(SchedulerError::Internal("调度器已在运行".to_string()))
                }
                LifecycleState::Stopped => {
                    return Err(SchedulerError::Internal("调度器已停止，不能重新启动".to_string()))
                }
                LifecycleState::Idle => *state = LifecycleState::Running,
            }
        }

        info!(
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            queue_interval_ms = self.options.queue_process_interval.as_millis() as u64,
            timeout_interval_ms = self.options.timeout_check_interval.as_millis() as u64,
            max_concurrency = self.max_concurrency(),
            "启动任务调度器"
        );

        let token = self.token.clone();
        let link = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => token.cancel(),
                _ = token.cancelled() => {}
            }
        });

        let handles = vec![
            link,
            self.spawn_periodic("poll", self.options.poll_interval, |this| async move {
                this.poll_pending_tasks().await;
            }),
            self.spawn_periodic(
                "queue",
                self.options.queue_process_interval,
                |this| async move {
                    this.process_task_queue().await;
                },
            ),
            self.spawn_periodic(
                "timeout",
                self.options.timeout_check_interval,
                |this| async move {
                    this.check_timeouts().await;
                },
            ),
        ];
        self.loop_handles.lock().extend(handles);
        Ok(())
    }

    /// 停止所有后台循环并等待其退出；已派发的任务继续运行直到结束
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Stopped {
                return;
            }
            *state = LifecycleState::Stopped;
        }

        info!("停止任务调度器");
        self.token.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.loop_handles.lock());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "后台循环异常退出");
            }
        }

        self.cron_jobs.lock().clear();
        self.metrics.update_cron_entries(0);
        info!("任务调度器已停止");
    }

    fn spawn_periodic<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        period: Duration,
        tick: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let this = Arc::clone(self);
        let token = self.token.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => tick(Arc::clone(&this)).await,
                }
            }
            debug!(loop_name = name, "后台循环已退出");
        })
    }

    /// 保存任务；立即任务直接入队，周期任务注册 cron 条目
    ///
    /// 只有存储失败会返回给调用方，入队或注册失败记录日志，下一轮轮询会再次尝试。
    pub async fn add_task(self: &Arc<Self>, task: Task) -> SchedulerResult<String> {
        let id = self.repository.add_task(task).await?;
        let task = self.repository.get_task_by_id(&id).await?;

        if task.is_recurring() {
            if let Err(e) = self.add_scheduled_job(&task).await {
                warn!(task_id = %id, error = %e, "注册cron任务失败");
            }
        } else if let Err(e) = self.queue_task(task).await {
            warn!(task_id = %id, error = %e, "任务入队失败");
        }

        Ok(id)
    }

    /// 拉取所有 PENDING 任务并分别注册 cron 或入队
    pub async fn poll_pending_tasks(self: &Arc<Self>) {
        let pending = match self.repository.get_tasks_by_status(TaskStatus::Pending).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "获取待处理任务失败");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        debug!(count = pending.len(), "发现待处理任务");
        for task in pending {
            let task_id = task.id.clone();
            let result = if task.is_recurring() {
                self.add_scheduled_job(&task).await.map(|_| ())
            } else {
                self.queue_task(task).await.map(|_| ())
            };
            if let Err(e) = result {
                warn!(task_id = %task_id, error = %e, "处理待处理任务失败");
            }
        }
    }

    /// 将任务写为 QUEUED 后加入就绪队列，已在队列中时返回 `Ok(false)`
    pub async fn queue_task(&self, mut task: Task) -> SchedulerResult<bool> {
        let already_queued = self.queue.lock().iter().any(|t| t.id == task.id);
        if already_queued {
            debug!(task_id = %task.id, "任务已在队列中");
            return Ok(false);
        }

        // 周期任务的新一轮触发重新计算重试次数
        if task.is_recurring() && task.status.is_terminal() {
            task.retry_count = 0;
        }
        task.next_run_at = None;
        task.transition_to(TaskStatus::Queued)?;
        self.repository.update_task(&task).await?;

        let mut queue = self.queue.lock();
        if queue.iter().any(|t| t.id == task.id) {
            return Ok(false);
        }
        info!(task_id = %task.id, name = %task.name, priority = ?task.priority, "任务入队");
        queue.push(task);
        self.metrics.update_queue_depth(queue.len());
        Ok(true)
    }

    /// 为周期任务注册 cron 条目，同一任务重复注册时返回 `Ok(false)`
    ///
    /// 表达式无法解析时任务被置为 FAILED。
    pub async fn add_scheduled_job(self: &Arc<Self>, task: &Task) -> SchedulerResult<bool> {
        let expression = task.cron_expr.clone().unwrap_or_default();
        let schedule = match CronScheduler::new(&expression) {
            Ok(schedule) => schedule,
            Err(e) => {
                error!(task_id = %task.id, cron = %expression, error = %e, "cron表达式无效");
                if let Err(update_err) = self
                    .repository
                    .update_task_status(&task.id, TaskStatus::Failed)
                    .await
                {
                    warn!(task_id = %task.id, error = %update_err, "更新任务状态失败");
                }
                return Err(e);
            }
        };

        let (entry_id, token) = {
            let mut jobs = self.cron_jobs.lock();
            if jobs.contains_key(&task.id) {
                debug!(task_id = %task.id, "cron任务已注册");
                return Ok(false);
            }
            let entry_id = self.next_cron_entry_id.fetch_add(1, Ordering::SeqCst);
            let token = self.token.child_token();
            jobs.insert(
                task.id.clone(),
                CronEntry {
                    entry_id,
                    expression: schedule.expression().to_string(),
                    token: token.clone(),
                },
            );
            self.metrics.update_cron_entries(jobs.len());
            (entry_id, token)
        };

        if task.status == TaskStatus::Pending {
            if let Err(e) = self
                .repository
                .update_task_status(&task.id, TaskStatus::Scheduled)
                .await
            {
                warn!(task_id = %task.id, error = %e, "更新任务状态为SCHEDULED失败");
            }
        }

        info!(task_id = %task.id, cron = %schedule.expression(), entry_id, "注册cron任务");
        let this = Arc::clone(self);
        let task_id = task.id.clone();
        tokio::spawn(async move {
            this.run_cron_entry(task_id, entry_id, schedule, token).await;
        });
        Ok(true)
    }

    /// 移除 cron 条目，返回条目是否存在
    pub fn remove_scheduled_job(&self, task_id: &str) -> bool {
        let mut jobs = self.cron_jobs.lock();
        match jobs.remove(task_id) {
            Some(entry) => {
                entry.token.cancel();
                self.metrics.update_cron_entries(jobs.len());
                info!(task_id, entry_id = entry.entry_id, "移除cron任务");
                true
            }
            None => false,
        }
    }

    async fn run_cron_entry(
        self: Arc<Self>,
        task_id: String,
        entry_id: u64,
        schedule: CronScheduler,
        token: CancellationToken,
    ) {
        let mut last_fire: Option<DateTime<Utc>> = None;
        loop {
            let now = Utc::now();
            let from = last_fire.map_or(now, |last| last.max(now));
            let Some((next_fire, wait)) = schedule.next_fire(from, now) else {
                warn!(task_id = %task_id, "cron表达式没有后续触发时间");
                break;
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            last_fire = Some(next_fire);

            if !self.on_cron_fire(&task_id).await {
                break;
            }
        }

        let mut jobs = self.cron_jobs.lock();
        if jobs
            .get(&task_id)
            .is_some_and(|entry| entry.entry_id == entry_id)
        {
            jobs.remove(&task_id);
            self.metrics.update_cron_entries(jobs.len());
        }
    }

    /// cron 触发回调，返回 false 表示条目应当结束
    async fn on_cron_fire(&self, task_id: &str) -> bool {
        let task = match self.repository.get_task_by_id(task_id).await {
            Ok(task) => task,
            Err(e) if e.is_not_found() => {
                warn!(task_id, "cron任务对应的任务已删除，移除条目");
                return false;
            }
            Err(e) => {
                error!(task_id, error = %e, "获取cron任务失败");
                return true;
            }
        };

        if matches!(task.status, TaskStatus::Queued | TaskStatus::Running) {
            debug!(task_id, status = %task.status, "任务已在队列或执行中，跳过本次触发");
            return true;
        }

        debug!(task_id, "cron触发，任务入队");
        if let Err(e) = self.queue_task(task).await {
            warn!(task_id, error = %e, "cron触发入队失败");
        }
        true
    }

    /// 处理一轮就绪队列，返回本轮派发的任务ID（按派发顺序）
    pub async fn process_task_queue(self: &Arc<Self>) -> Vec<String> {
        let queue_empty = self.queue.lock().is_empty();
        if queue_empty {
            return Vec::new();
        }

        let completed = match self.repository.get_completed_task_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "获取已完成任务失败");
                return Vec::new();
            }
        };

        let dispatched: Vec<Task> = {
            let mut queue = self.queue.lock();
            let mut running = self.running.lock();

            let mut available = self.max_concurrency().saturating_sub(running.len());
            if available == 0 {
                return Vec::new();
            }

            // 稳定排序，相同优先级保持入队顺序
            queue.sort_by_key(|task| task.priority.weight());

            let mut selected = Vec::new();
            let mut remaining = Vec::with_capacity(queue.len());
            for task in queue.drain(..) {
                // 超时后重新入队的任务要等上一次执行真正结束
                let dispatchable = task.can_be_executed(&completed) && !running.contains(&task.id);
                if available > 0 && dispatchable {
                    running.insert(task.id.clone());
                    available -= 1;
                    selected.push(task);
                } else {
                    remaining.push(task);
                }
            }
            *queue = remaining;

            self.metrics.update_queue_depth(queue.len());
            self.metrics.update_running_tasks(running.len());
            selected
        };

        if dispatched.is_empty() {
            return Vec::new();
        }

        self.metrics.record_dispatch(dispatched.len());
        let ids: Vec<String> = dispatched.into_iter().map(|task| task.id).collect();
        for task_id in &ids {
            debug!(task_id = %task_id, "派发任务");
            self.spawn_execution(task_id.clone());
        }
        ids
    }

    fn spawn_execution(self: &Arc<Self>, task_id: String) {
        let this = Arc::clone(self);
        let slot = RunningSlot {
            scheduler: Arc::clone(self),
            task_id: task_id.clone(),
        };
        tokio::spawn(async move {
            let execution = AssertUnwindSafe(this.executor.execute_task(&task_id)).catch_unwind();
            match execution.await {
                Ok(Ok(TaskStatus::Retry)) => this.schedule_retry_from_store(&task_id).await,
                Ok(Ok(status)) => debug!(task_id = %task_id, status = %status, "任务执行结束"),
                Ok(Err(e)) => error!(task_id = %task_id, error = %e, "任务执行失败"),
                Err(_) => this.fail_panicked_task(&task_id).await,
            }
            drop(slot);
        });
    }

    /// 执行过程 panic 后把仍处于 RUNNING 的任务置为 FAILED
    async fn fail_panicked_task(&self, task_id: &str) {
        error!(task_id, "任务执行过程中发生panic");
        self.metrics.record_task_failure();
        match self.repository.get_task_by_id(task_id).await {
            Ok(task) if task.status == TaskStatus::Running => {
                if let Err(e) = self
                    .repository
                    .update_task_status(task_id, TaskStatus::Failed)
                    .await
                {
                    error!(task_id, error = %e, "标记panic任务失败状态出错");
                }
            }
            Ok(_) => {}
            Err(e) => error!(task_id, error = %e, "读取panic任务失败"),
        }
    }

    async fn schedule_retry_from_store(self: &Arc<Self>, task_id: &str) {
        match self.repository.get_task_by_id(task_id).await {
            Ok(task) if task.status == TaskStatus::Retry => {
                let next_run_at = task.next_run_at.unwrap_or_else(Utc::now);
                self.schedule_retry(task.id, task.retry_count, next_run_at);
            }
            Ok(_) => {}
            Err(e) => error!(task_id, error = %e, "读取重试任务失败"),
        }
    }

    /// 启动一个睡眠到 `next_run_at` 的后台任务，随后把仍处于 RETRY 的任务重新入队
    fn schedule_retry(self: &Arc<Self>, task_id: String, retry_count: u32, next_run_at: DateTime<Utc>) {
        let key = (task_id.clone(), retry_count);
        if !self.pending_retries.lock().insert(key.clone()) {
            debug!(task_id = %task_id, retry_count, "重试已安排");
            return;
        }

        let delay = (next_run_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(task_id = %task_id, retry_count, delay_ms = delay.as_millis() as u64, "安排重试");

        let this = Arc::clone(self);
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(task_id = %task_id, "调度器已停止，放弃重试");
                }
                _ = tokio::time::sleep(delay) => {
                    match this.repository.get_task_by_id(&task_id).await {
                        Ok(task) if task.status == TaskStatus::Retry => {
                            if let Err(e) = this.queue_task(task).await {
                                warn!(task_id = %task_id, error = %e, "重试入队失败");
                            }
                        }
                        Ok(task) => {
                            debug!(task_id = %task_id, status = %task.status, "任务状态已变化，跳过重试入队");
                        }
                        Err(e) => warn!(task_id = %task_id, error = %e, "读取重试任务失败"),
                    }
                }
            }
            this.pending_retries.lock().remove(&key);
        });
    }

    /// 执行一轮超时检查并为转入 RETRY 的任务安排重试
    pub async fn check_timeouts(self: &Arc<Self>) -> Vec<TimeoutResolution> {
        let resolutions = match self.supervisor.check_timeouts().await {
            Ok(resolutions) => resolutions,
            Err(e) => {
                error!(error = %e, "超时检查失败");
                return Vec::new();
            }
        };

        for resolution in &resolutions {
            if let TimeoutResolution::Retry {
                task_id,
                retry_count,
                next_run_at,
            } = resolution
            {
                self.schedule_retry(task_id.clone(), *retry_count, *next_run_at);
            }
        }
        resolutions
    }
}
