use thiserror::Error;

use crate::models::TaskStatus;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("任务 {id} 当前状态为 {status}，无法执行操作: {operation}")]
    InvalidState {
        id: String,
        status: TaskStatus,
        operation: String,
    },

    #[error("任务 {id} 非法状态转换: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("无效的任务定义: {0}")]
    InvalidTask(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("当前没有可用的路由配置")]
    ConfigurationUnavailable,

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("存储操作失败: {0}")]
    Persistence(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("事件处理错误: {0}")]
    EventProcessing(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TaskNotFound { .. })
    }

    /// 后台循环遇到此类错误时可在下一个周期重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::ConfigurationUnavailable)
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::task_not_found("abc");
        assert_eq!(err.to_string(), "任务未找到: abc");
        assert!(err.is_not_found());

        let err = SchedulerError::InvalidTransition {
            id: "t1".to_string(),
            from: TaskStatus::Done,
            to: TaskStatus::Running,
        };
        assert_eq!(err.to_string(), "任务 t1 非法状态转换: DONE -> RUNNING");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SchedulerError::Persistence("disk".to_string()).is_retryable());
        assert!(SchedulerError::ConfigurationUnavailable.is_retryable());
        assert!(!SchedulerError::InvalidTask("x".to_string()).is_retryable());
    }

    #[test]
    fn test_from_serde_error() {
        let err: SchedulerError = serde_json::from_str::<serde_json::Value>("{bad")
            .unwrap_err()
            .into();
        assert!(matches!(err, SchedulerError::Serialization(_)));
    }
}
