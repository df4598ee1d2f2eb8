use chrono::Utc;
use serde_json::json;
use tracing::debug;

use scheduler_core::{SchedulerError, SchedulerResult, Task, TaskPriority};

use crate::event::{Event, EventType};

/// 把一类事件转换为任务
pub trait EventProcessor: Send + Sync {
    fn should_process(&self, event: &Event) -> bool;

    fn process_event(&self, event: &Event) -> SchedulerResult<Option<Task>>;
}

const TASK_NAME_MAX_CHARS: usize = 30;

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

fn infer_priority(message: &str) -> TaskPriority {
    let lower = message.to_lowercase();
    if ["urgent", "emergency", "asap"].iter().any(|k| lower.contains(k)) {
        TaskPriority::High
    } else if ["low priority", "when possible"].iter().any(|k| lower.contains(k)) {
        TaskPriority::Low
    } else {
        TaskPriority::Medium
    }
}

/// 处理新发布的消息：消息包含任一触发关键词（不区分大小写）时生成任务
#[derive(Debug, Clone, Default)]
pub struct PostedMessageProcessor {
    keyword_triggers: Vec<String>,
}

impl PostedMessageProcessor {
    /// 关键词为空时处理所有非空消息
    pub fn new<I, S>(keyword_triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keyword_triggers: keyword_triggers
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

impl EventProcessor for PostedMessageProcessor {
    fn should_process(&self, event: &Event) -> bool {
        if event.event_type != EventType::Posted {
            return false;
        }
        let Some(message) = event.message() else {
            return false;
        };
        if self.keyword_triggers.is_empty() {
            return true;
        }
        let lower = message.to_lowercase();
        self.keyword_triggers.iter().any(|k| lower.contains(k.as_str()))
    }

    fn process_event(&self, event: &Event) -> SchedulerResult<Option<Task>> {
        let post = event
            .post
            .as_ref()
            .ok_or_else(|| SchedulerError::EventProcessing("事件缺少消息内容".to_string()))?;
        debug!(post_id = %post.id, "处理新消息");

        let mut task = Task::immediate(format!(
            "处理消息: {}",
            truncate_chars(&post.message, TASK_NAME_MAX_CHARS)
        ))
        .with_priority(infer_priority(&post.message))
        .with_tags(["MATTERMOST", "MESSAGE"])
        .with_parameter("event_type", event.event_type.as_str())
        .with_parameter("channel_id", post.channel_id.as_str())
        .with_parameter("message", post.message.as_str())
        .with_parameter("user_id", post.user_id.as_str())
        .with_parameter("original_post", serde_json::to_value(post)?)
        .with_parameter("processing_time", Utc::now().to_rfc3339());

        if let Some(channel) = &event.channel {
            task = task.with_parameter("channel_name", channel.name.as_str());
        }
        if let Some(user) = &event.user {
            task = task.with_parameter("username", user.username.as_str());
        }
        Ok(Some(task))
    }
}

/// 处理用户加入频道事件
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAddedProcessor;

impl EventProcessor for UserAddedProcessor {
    fn should_process(&self, event: &Event) -> bool {
        event.event_type == EventType::UserAdded
    }

    fn process_event(&self, event: &Event) -> SchedulerResult<Option<Task>> {
        let channel_id = event.channel_id().unwrap_or_default();
        let user_id = event
            .data_str("user_id")
            .or_else(|| event.user.as_ref().map(|user| user.id.as_str()))
            .unwrap_or_default();

        let task = Task::immediate("处理用户添加事件")
            .with_priority(TaskPriority::Low)
            .with_tags(["MATTERMOST", "USER_ADDED"])
            .with_parameter("event_type", event.event_type.as_str())
            .with_parameter("channel_id", channel_id)
            .with_parameter("user_id", user_id)
            .with_parameter("message", json!(format!("用户 {user_id} 加入了频道 {channel_id}")));
        Ok(Some(task))
    }
}
