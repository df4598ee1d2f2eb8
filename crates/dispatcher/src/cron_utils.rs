use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;

use scheduler_core::{SchedulerError, SchedulerResult};

/// CRON表达式解析和调度工具
///
/// 表达式为6段（秒 分 时 日 月 周），可选第7段年份。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let schedule = Schedule::from_str(cron_expr.trim()).map_err(|e| {
            SchedulerError::InvalidCron {
                expr: cron_expr.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            expression: cron_expr.trim().to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 获取下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// `after` 之后的下一次触发时间，以及从 `now` 起需要等待的时长
    pub fn next_fire(
        &self,
        after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, Duration)> {
        let next = self.next_execution_time(after)?;
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        Some((next, wait))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_valid_expression() {
        let cron = CronScheduler::new("0 0 9 * * *").unwrap();
        assert_eq!(cron.expression(), "0 0 9 * * *");
    }

    #[test]
    fn test_parse_invalid_expression() {
        let err = CronScheduler::new("not a cron").unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron { .. }));
        assert!(CronScheduler::new("61 * * * * *").is_err());
    }

    #[test]
    fn test_next_execution_time() {
        let cron = CronScheduler::new("0 30 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap();
        let next = cron.next_execution_time(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_next_fire_waits_from_now() {
        let cron = CronScheduler::new("0 30 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap();

        let (next, wait) = cron.next_fire(now, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap());
        assert_eq!(wait, Duration::from_secs(15 * 60));

        // 上一次触发晚于当前时钟时，从上一次触发之后计算
        let last_fire = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        let (next, wait) = cron.next_fire(last_fire, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 11, 30, 0).unwrap());
        assert_eq!(wait, Duration::from_secs(75 * 60));

        // 触发时间已过时不等待
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(cron.next_fire(now, late).unwrap().1, Duration::ZERO);
    }
}
