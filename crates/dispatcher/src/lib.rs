//! 调度核心
//!
//! - [`TaskScheduler`]：优先级队列、并发上限、依赖检查、cron 与重试
//! - [`TimeoutSupervisor`]：把执行超时的任务转入 RETRY 或 FAILED
//! - [`ResultReportingService`]：定期汇总已完成任务
//! - [`CronScheduler`]：cron 表达式解析与下次触发时间计算

pub mod cron_utils;
pub mod reporting_service;
pub mod scheduler;
pub mod timeout_supervisor;

pub use cron_utils::CronScheduler;
pub use reporting_service::{
    ReportingStrategy, ResultReportingService, SummaryReportStrategy, TableReportStrategy,
};
pub use scheduler::{SchedulerOptions, TaskScheduler};
pub use timeout_supervisor::{TimeoutResolution, TimeoutSupervisor};
