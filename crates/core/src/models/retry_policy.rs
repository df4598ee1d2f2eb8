use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// 单次重试等待的硬上限，与 `max_delay_ms` 取较小者
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// 任务重试策略
///
/// 失败或超时后的重试等待 `retry_delay * backoff_factor^n`，其中 `n` 为本次重试前的
/// `retry_count`，若设置了 `max_delay_ms` 则以其为上限，且不超过 [`MAX_RETRY_DELAY`]。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 基础重试间隔（毫秒）
    pub retry_delay_ms: u64,
    /// 指数退避倍数，不小于1.0
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// 重试间隔上限（毫秒）
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            retry_delay_ms: retry_delay.as_millis() as u64,
            backoff_factor: backoff_factor.max(1.0),
            max_delay_ms: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = Some(max_delay.as_millis() as u64);
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// 在已重试 `retry_count` 次的情况下是否还允许再次重试
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// 计算已重试 `retry_count` 次之后下一次重试前的等待时长
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let mut delay_ms = self.retry_delay_ms as f64 * factor.powi(exponent);

        let cap_ms = self
            .max_delay_ms
            .unwrap_or(u64::MAX)
            .min(MAX_RETRY_DELAY.as_millis() as u64);
        if !delay_ms.is_finite() || delay_ms > cap_ms as f64 {
            delay_ms = cap_ms as f64;
        }

        Duration::from_millis(delay_ms as u64)
    }

    /// 计算下一次重试的时间点
    pub fn next_retry_at(&self, retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.backoff_delay(retry_count))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
