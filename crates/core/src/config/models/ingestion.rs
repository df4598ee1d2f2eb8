use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub config_refresh_interval_seconds: u64,
    /// 路由配置文件（JSON 或 TOML），为空时使用内置的模拟路由
    pub configurations_file: Option<String>,
    pub mock_events: bool,
    pub mock_event_interval_seconds: u64,
    pub channel_filter: Vec<String>,
    pub event_type_filter: Vec<String>,
    pub keyword_triggers: Vec<String>,
    /// notification 类型转发使用的默认频道
    pub default_channel_id: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            config_refresh_interval_seconds: 180,
            configurations_file: None,
            mock_events: true,
            mock_event_interval_seconds: 5,
            channel_filter: Vec::new(),
            event_type_filter: vec!["posted".to_string(), "user_added".to_string()],
            keyword_triggers: vec![
                "task".to_string(),
                "schedule".to_string(),
                "urgent".to_string(),
                "important".to_string(),
            ],
            default_channel_id: "channel1".to_string(),
        }
    }
}

impl IngestionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.config_refresh_interval_seconds == 0 {
            return Err(anyhow::anyhow!("配置刷新间隔必须大于0"));
        }

        if self.mock_events && self.mock_event_interval_seconds == 0 {
            return Err(anyhow::anyhow!("模拟事件间隔必须大于0"));
        }

        if let Some(path) = &self.configurations_file {
            if path.trim().is_empty() {
                return Err(anyhow::anyhow!("路由配置文件路径不能为空字符串"));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub report_types: Vec<String>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 30,
            report_types: vec!["table".to_string(), "summary".to_string()],
        }
    }
}

impl ReportingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("报告间隔必须大于0"));
        }
        Ok(())
    }
}
