use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 轮询存储中 PENDING 任务的间隔
    pub poll_interval_seconds: u64,
    /// 就绪队列处理间隔
    pub queue_process_interval_ms: u64,
    pub timeout_check_interval_seconds: u64,
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            queue_process_interval_ms: 1000,
            timeout_check_interval_seconds: 10,
            max_concurrency: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.queue_process_interval_ms == 0 {
            return Err(anyhow::anyhow!("队列处理间隔必须大于0"));
        }

        if self.timeout_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("超时检查间隔必须大于0"));
        }

        if self.max_concurrency == 0 {
            return Err(anyhow::anyhow!("最大并发数必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// 默认处理器模拟的执行耗时
    pub default_work_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_work_ms: 1000,
        }
    }
}
