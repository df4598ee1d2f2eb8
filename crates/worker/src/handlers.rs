//! 内置任务处理器
//!
//! - [`DefaultTaskHandler`]: 没有任何标签匹配时使用，模拟一段执行耗时
//! - [`ForwardingTaskHandler`]: 按 `forward_type` 参数把消息转发到聊天平台

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::info;

use scheduler_core::{SchedulerError, SchedulerResult, Task, TaskHandler, TaskParameters};

/// 默认处理器
#[derive(Debug, Clone)]
pub struct DefaultTaskHandler {
    simulated_work: Duration,
}

impl DefaultTaskHandler {
    pub fn new(simulated_work: Duration) -> Self {
        Self { simulated_work }
    }
}

impl Default for DefaultTaskHandler {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl TaskHandler for DefaultTaskHandler {
    async fn execute(&self, task: &Task) -> SchedulerResult<TaskParameters> {
        info!(
            task_id = %task.id,
            parameters = ?task.parameters,
            "默认处理器执行任务"
        );
        if !self.simulated_work.is_zero() {
            tokio::time::sleep(self.simulated_work).await;
        }

        let mut output = TaskParameters::new();
        output.insert(
            "message".to_string(),
            json!(format!("任务 {} 已由默认处理器执行", task.name)),
        );
        output.insert("parameter_count".to_string(), json!(task.parameters.len()));
        Ok(output)
    }

    fn name(&self) -> &str {
        "default"
    }
}

/// 消息投递通道
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_direct_message(&self, user_id: &str, message: &str) -> SchedulerResult<()>;

    async fn post_to_channel(&self, channel_id: &str, message: &str) -> SchedulerResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Direct { user_id: String, message: String },
    Channel { channel_id: String, message: String },
}

/// 只写日志的投递通道，保留已发送的消息供查询
#[derive(Debug, Default)]
pub struct LoggingMessageSink {
    sent: Mutex<Vec<SentMessage>>,
}

impl LoggingMessageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageSink for LoggingMessageSink {
    async fn send_direct_message(&self, user_id: &str, message: &str) -> SchedulerResult<()> {
        info!(user_id, message, "发送私信");
        self.sent.lock().push(SentMessage::Direct {
            user_id: user_id.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn post_to_channel(&self, channel_id: &str, message: &str) -> SchedulerResult<()> {
        info!(channel_id, message, "发送频道消息");
        self.sent.lock().push(SentMessage::Channel {
            channel_id: channel_id.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardType {
    DirectMessage,
    ChannelMessage,
    Notification,
}

impl ForwardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardType::DirectMessage => "direct_message",
            ForwardType::ChannelMessage => "channel_message",
            ForwardType::Notification => "notification",
        }
    }
}

impl FromStr for ForwardType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct_message" => Ok(ForwardType::DirectMessage),
            "channel_message" => Ok(ForwardType::ChannelMessage),
            "notification" => Ok(ForwardType::Notification),
            other => Err(SchedulerError::TaskExecution(format!(
                "不支持的转发类型: {other}"
            ))),
        }
    }
}

/// 消息转发处理器
///
/// 参数：
/// - `forward_type`: `direct_message` / `channel_message` / `notification`，缺省为 notification
/// - `message`: 消息内容，缺省时根据任务名生成
/// - `target_user_id` / `target_channel_id`: 目标，可直接给出或放在 `custom` 映射中
pub struct ForwardingTaskHandler {
    sink: Arc<dyn MessageSink>,
    default_channel_id: String,
}

impl ForwardingTaskHandler {
    pub fn new(sink: Arc<dyn MessageSink>, default_channel_id: impl Into<String>) -> Self {
        Self {
            sink,
            default_channel_id: default_channel_id.into(),
        }
    }

    fn parameter<'a>(task: &'a Task, key: &str) -> Option<&'a str> {
        task.parameters
            .get(key)
            .and_then(Value::as_str)
            .or_else(|| {
                task.parameters
                    .get("custom")
                    .and_then(|custom| custom.get(key))
                    .and_then(Value::as_str)
            })
            .filter(|value| !value.is_empty())
    }
}

#[async_trait]
impl TaskHandler for ForwardingTaskHandler {
    async fn execute(&self, task: &Task) -> SchedulerResult<TaskParameters> {
        let forward_type = Self::parameter(task, "forward_type")
            .unwrap_or(ForwardType::Notification.as_str())
            .parse::<ForwardType>()?;

        let default_message = format!("任务 {} 执行通知", task.name);
        let message = Self::parameter(task, "message").unwrap_or(&default_message);

        let target = match forward_type {
            ForwardType::DirectMessage => {
                let user_id = Self::parameter(task, "target_user_id").ok_or_else(|| {
                    SchedulerError::TaskExecution("direct_message 缺少 target_user_id".to_string())
                })?;
                self.sink.send_direct_message(user_id, message).await?;
                user_id.to_string()
            }
            ForwardType::ChannelMessage => {
                let channel_id = Self::parameter(task, "target_channel_id")
                    .or_else(|| Self::parameter(task, "channel_id"))
                    .ok_or_else(|| {
                        SchedulerError::TaskExecution(
                            "channel_message 缺少 target_channel_id".to_string(),
                        )
                    })?;
                self.sink.post_to_channel(channel_id, message).await?;
                channel_id.to_string()
            }
            ForwardType::Notification => {
                let notification = format!("[通知] {message}");
                self.sink
                    .post_to_channel(&self.default_channel_id, &notification)
                    .await?;
                self.default_channel_id.clone()
            }
        };

        let mut output = TaskParameters::new();
        output.insert("forward_type".to_string(), json!(forward_type.as_str()));
        output.insert("target".to_string(), json!(target));
        output.insert("delivered".to_string(), json!(true));
        Ok(output)
    }

    fn name(&self) -> &str {
        "forwarding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> (Arc<LoggingMessageSink>, ForwardingTaskHandler) {
        let sink = Arc::new(LoggingMessageSink::new());
        let handler = ForwardingTaskHandler::new(sink.clone(), "town-square");
        (sink, handler)
    }

    #[tokio::test]
    async fn test_direct_message_uses_custom_target() {
        let (sink, handler) = handler();
        let task = Task::immediate("dm")
            .with_parameter("forward_type", "direct_message")
            .with_parameter("message", "hello")
            .with_parameter("custom", json!({"target_user_id": "u42"}));

        let output = handler.execute(&task).await.unwrap();
        assert_eq!(output["target"], "u42");
        assert_eq!(
            sink.sent(),
            vec![SentMessage::Direct {
                user_id: "u42".to_string(),
                message: "hello".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_channel_message_falls_back_to_channel_id() {
        let (sink, handler) = handler();
        let task = Task::immediate("chan")
            .with_parameter("forward_type", "channel_message")
            .with_parameter("channel_id", "c7");

        handler.execute(&task).await.unwrap();
        assert!(matches!(
            &sink.sent()[0],
            SentMessage::Channel { channel_id, .. } if channel_id == "c7"
        ));
    }

    #[tokio::test]
    async fn test_notification_is_default() {
        let (sink, handler) = handler();
        let task = Task::immediate("notify");

        let output = handler.execute(&task).await.unwrap();
        assert_eq!(output["forward_type"], "notification");
        assert!(matches!(
            &sink.sent()[0],
            SentMessage::Channel { channel_id, message }
                if channel_id == "town-square" && message.starts_with("[通知]")
        ));
    }

    #[tokio::test]
    async fn test_unknown_forward_type_fails() {
        let (sink, handler) = handler();
        let task = Task::immediate("bad").with_parameter("forward_type", "carrier_pigeon");
        assert!(handler.execute(&task).await.is_err());
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_direct_message_requires_target() {
        let (_sink, handler) = handler();
        let task = Task::immediate("dm").with_parameter("forward_type", "direct_message");
        assert!(matches!(
            handler.execute(&task).await,
            Err(SchedulerError::TaskExecution(_))
        ));
    }
}
