use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use scheduler_core::{SchedulerError, SchedulerResult};

use crate::event::Event;

/// 频道路由规则：哪个频道的哪类事件应当生成任务，以及任务如何转发
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelRoute {
    pub id: String,
    pub channel_id: String,
    /// 为空时匹配所有事件类型
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub forward_type: String,
    #[serde(default)]
    pub custom: Map<String, Value>,
}

impl ChannelRoute {
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        message_type: impl Into<String>,
        forward_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            message_type: message_type.into(),
            forward_type: forward_type.into(),
            custom: Map::new(),
        }
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.channel_id() == Some(self.channel_id.as_str())
            && (self.message_type.is_empty() || self.message_type == event.event_type.as_str())
    }
}

/// 路由配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Configuration {
    ChannelRoute(ChannelRoute),
}

impl Configuration {
    pub fn id(&self) -> &str {
        match self {
            Configuration::ChannelRoute(route) => &route.id,
        }
    }

    /// 匹配时返回对应的频道路由
    pub fn route_for(&self, event: &Event) -> Option<&ChannelRoute> {
        match self {
            Configuration::ChannelRoute(route) => route.matches(event).then_some(route),
        }
    }
}

impl From<ChannelRoute> for Configuration {
    fn from(route: ChannelRoute) -> Self {
        Configuration::ChannelRoute(route)
    }
}

/// 路由配置来源
#[async_trait]
pub trait ConfigurationFetcher: Send + Sync {
    async fn fetch_configurations(&self) -> SchedulerResult<Vec<Configuration>>;

    fn name(&self) -> &str;
}

/// 返回固定路由表
#[derive(Debug, Clone, Default)]
pub struct StaticConfigurationFetcher {
    configurations: Vec<Configuration>,
}

impl StaticConfigurationFetcher {
    pub fn new(configurations: Vec<Configuration>) -> Self {
        Self { configurations }
    }

    /// 开发环境使用的模拟路由
    pub fn mock() -> Self {
        Self::new(vec![
            ChannelRoute::new("config1", "channel1", "posted", "direct_message")
                .with_custom("target_user_id", "user123")
                .with_custom("include_files", "true")
                .into(),
            ChannelRoute::new("config2", "channel2", "posted", "channel_message")
                .with_custom("target_channel_id", "channel456")
                .with_custom("include_files", "false")
                .into(),
            ChannelRoute::new("config3", "channel1", "user_added", "notification")
                .with_custom("notify_admin", "true")
                .into(),
        ])
    }
}

#[async_trait]
impl ConfigurationFetcher for StaticConfigurationFetcher {
    async fn fetch_configurations(&self) -> SchedulerResult<Vec<Configuration>> {
        Ok(self.configurations.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[derive(Debug, Default, Deserialize)]
struct RoutingFile {
    #[serde(default)]
    routes: Vec<ChannelRoute>,
}

/// 从 JSON 或 TOML 文件读取路由，每次刷新都重新读取文件
///
/// 文件格式：
///
/// ```toml
/// [[routes]]
/// id = "config1"
/// channel_id = "channel1"
/// message_type = "posted"
/// forward_type = "direct_message"
/// custom = { target_user_id = "user123" }
/// ```
#[derive(Debug, Clone)]
pub struct FileConfigurationFetcher {
    path: PathBuf,
}

impl FileConfigurationFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, content: &str) -> SchedulerResult<RoutingFile> {
        let is_json = self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Ok(serde_json::from_str(content)?)
        } else {
            toml::from_str(content).map_err(|e| {
                SchedulerError::Configuration(format!(
                    "解析路由文件 {} 失败: {e}",
                    self.path.display()
                ))
            })
        }
    }
}

#[async_trait]
impl ConfigurationFetcher for FileConfigurationFetcher {
    async fn fetch_configurations(&self) -> SchedulerResult<Vec<Configuration>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SchedulerError::Configuration(format!(
                "读取路由文件 {} 失败: {e}",
                self.path.display()
            ))
        })?;

        let file = self.parse(&content)?;
        debug!(path = %self.path.display(), routes = file.routes.len(), "读取路由文件");
        Ok(file.routes.into_iter().map(Configuration::from).collect())
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use serde_json::json;
    use std::io::Write;

    fn event_on(channel_id: &str, event_type: EventType) -> Event {
        let data = json!({"channel": {"id": channel_id, "name": "c"}});
        match data {
            Value::Object(map) => Event::new(event_type, map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_empty_message_type_matches_any_event() {
        let route = ChannelRoute::new("r", "C1", "", "notification");
        assert!(route.matches(&event_on("C1", EventType::Posted)));
        assert!(route.matches(&event_on("C1", EventType::UserAdded)));
        assert!(!route.matches(&event_on("C2", EventType::Posted)));
    }

    #[test]
    fn test_message_type_must_match() {
        let config = Configuration::from(ChannelRoute::new("r", "C1", "posted", ""));
        assert!(config.route_for(&event_on("C1", EventType::Posted)).is_some());
        assert!(config.route_for(&event_on("C1", EventType::UserAdded)).is_none());
        assert_eq!(config.id(), "r");
    }

    #[tokio::test]
    async fn test_mock_routes() {
        let configs = StaticConfigurationFetcher::mock()
            .fetch_configurations()
            .await
            .unwrap();
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].id(), "config1");
    }

    #[tokio::test]
    async fn test_file_fetcher_reads_toml_and_json() {
        let mut toml_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            toml_file,
            r#"
[[routes]]
id = "t1"
channel_id = "C1"
forward_type = "notification"
custom = {{ notify_admin = "true" }}
"#
        )
        .unwrap();
        let configs = FileConfigurationFetcher::new(toml_file.path())
            .fetch_configurations()
            .await
            .unwrap();
        let Configuration::ChannelRoute(route) = &configs[0];
        assert_eq!(route.id, "t1");
        assert!(route.message_type.is_empty());
        assert_eq!(route.custom["notify_admin"], "true");

        let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            json_file,
            r#"{{"routes": [{{"id": "j1", "channel_id": "C9", "message_type": "posted"}}]}}"#
        )
        .unwrap();
        let configs = FileConfigurationFetcher::new(json_file.path())
            .fetch_configurations()
            .await
            .unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].id(), "j1");
    }

    #[tokio::test]
    async fn test_file_fetcher_errors() {
        let missing = FileConfigurationFetcher::new("/nonexistent/routes.toml");
        assert!(matches!(
            missing.fetch_configurations().await,
            Err(SchedulerError::Configuration(_))
        ));

        let mut broken = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(broken, "routes = 42").unwrap();
        assert!(FileConfigurationFetcher::new(broken.path())
            .fetch_configurations()
            .await
            .is_err());
    }
}
