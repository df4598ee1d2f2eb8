use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 聊天平台推送的事件类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Posted,
    PostEdited,
    PostDeleted,
    ChannelCreated,
    UserAdded,
    UserRemoved,
    Typing,
    DirectAdded,
    LeaveTeam,
    UpdateTeam,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Posted => "posted",
            EventType::PostEdited => "post_edited",
            EventType::PostDeleted => "post_deleted",
            EventType::ChannelCreated => "channel_created",
            EventType::UserAdded => "user_added",
            EventType::UserRemoved => "user_removed",
            EventType::Typing => "typing",
            EventType::DirectAdded => "direct_added",
            EventType::LeaveTeam => "leave_team",
            EventType::UpdateTeam => "update_team",
            EventType::Other(other) => other,
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "posted" => EventType::Posted,
            "post_edited" => EventType::PostEdited,
            "post_deleted" => EventType::PostDeleted,
            "channel_created" => EventType::ChannelCreated,
            "user_added" => EventType::UserAdded,
            "user_removed" => EventType::UserRemoved,
            "typing" => EventType::Typing,
            "direct_added" => EventType::DirectAdded,
            "leave_team" => EventType::LeaveTeam,
            "update_team" => EventType::UpdateTeam,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        EventType::from(value.as_str())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub channel_id: String,
    pub root_id: String,
    pub message: String,
    pub create_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
}

/// 入站事件
///
/// `data` 保留原始负载，`post`、`channel`、`user` 是从中解析出的子记录，缺失或格式
/// 不符时为 `None`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: Map<String, Value>,
    pub post: Option<Post>,
    pub channel: Option<Channel>,
    pub user: Option<User>,
}

impl Event {
    pub fn new(event_type: impl Into<EventType>, data: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            post: Self::parse_record(&data, "post"),
            channel: Self::parse_record(&data, "channel"),
            user: Self::parse_record(&data, "user"),
            data,
        }
    }

    fn parse_record<T: DeserializeOwned>(data: &Map<String, Value>, key: &str) -> Option<T> {
        data.get(key)
            .filter(|value| value.is_object())
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// 事件所属频道：频道记录优先，其次是消息里的频道，最后是顶层 `channel_id`
    pub fn channel_id(&self) -> Option<&str> {
        self.channel
            .as_ref()
            .map(|channel| channel.id.as_str())
            .filter(|id| !id.is_empty())
            .or_else(|| {
                self.post
                    .as_ref()
                    .map(|post| post.channel_id.as_str())
                    .filter(|id| !id.is_empty())
            })
            .or_else(|| {
                self.data
                    .get("channel_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
            })
    }

    pub fn message(&self) -> Option<&str> {
        self.post
            .as_ref()
            .map(|post| post.message.as_str())
            .filter(|message| !message.is_empty())
    }

    /// 读取顶层字符串字段
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_parses_sub_records() {
        let event = Event::new(
            EventType::Posted,
            as_map(json!({
                "post": {"id": "p1", "message": "hi", "channel_id": "C1", "user_id": "u1"},
                "channel": {"id": "C1", "name": "general"},
                "user": {"id": "u1", "username": "alice"},
            })),
        );

        assert_eq!(event.post.as_ref().unwrap().message, "hi");
        assert_eq!(event.channel.as_ref().unwrap().name, "general");
        assert_eq!(event.user.as_ref().unwrap().username, "alice");
        assert_eq!(event.channel_id(), Some("C1"));
        assert_eq!(event.message(), Some("hi"));
    }

    #[test]
    fn test_channel_id_fallbacks() {
        let from_post = Event::new(
            "posted",
            as_map(json!({"post": {"channel_id": "C2", "message": "x"}})),
        );
        assert_eq!(from_post.channel_id(), Some("C2"));
        assert!(from_post.channel.is_none());

        let top_level = Event::new("user_added", as_map(json!({"channel_id": "C3"})));
        assert_eq!(top_level.channel_id(), Some("C3"));

        let nowhere = Event::new("typing", Map::new());
        assert_eq!(nowhere.channel_id(), None);
    }

    #[test]
    fn test_malformed_record_is_ignored() {
        let event = Event::new("posted", as_map(json!({"post": "not an object"})));
        assert!(event.post.is_none());
        assert_eq!(event.message(), None);
    }

    #[test]
    fn test_event_type_strings() {
        assert_eq!(EventType::from("user_added"), EventType::UserAdded);
        assert_eq!(EventType::from("reaction_added").as_str(), "reaction_added");
        assert_eq!(EventType::PostEdited.to_string(), "post_edited");

        let encoded = serde_json::to_value(EventType::Posted).unwrap();
        assert_eq!(encoded, json!("posted"));
        let decoded: EventType = serde_json::from_value(json!("leave_team")).unwrap();
        assert_eq!(decoded, EventType::LeaveTeam);
    }
}
