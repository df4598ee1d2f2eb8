use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    ingestion::{IngestionConfig, ReportingConfig},
    observability::ObservabilityConfig,
    scheduler::{ExecutorConfig, SchedulerConfig},
};

/// 环境变量前缀，层级之间使用 `__` 分隔
pub const ENV_PREFIX: &str = "SCHEDULER";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// "development" 下会写入示例任务并启用模拟数据源
    pub environment: String,
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    pub ingestion: IngestionConfig,
    pub reporting: ReportingConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            ingestion: IngestionConfig::default(),
            reporting: ReportingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (e.g. `SCHEDULER_SCHEDULER__MAX_CONCURRENCY=8`)
    ///
    /// An explicitly given path must exist; without one the well-known locations
    /// are tried and silently skipped when absent.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("序列化默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/scheduler.toml", "scheduler.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 字符串加载，未出现的字段使用默认值
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn validate(&self) -> Result<()> {
        if self.environment.trim().is_empty() {
            return Err(anyhow::anyhow!("运行环境不能为空"));
        }

        self.scheduler.validate().context("调度器配置验证失败")?;

        self.ingestion
            .validate()
            .context("事件接入配置验证失败")?;

        self.reporting.validate().context("报告配置验证失败")?;

        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.is_development());
        assert_eq!(config.scheduler.max_concurrency, 5);
        assert_eq!(config.ingestion.config_refresh_interval_seconds, 180);
    }

    #[test]
    fn test_load_from_file_merges_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
environment = "production"

[scheduler]
max_concurrency = 12
poll_interval_seconds = 3

[observability]
log_format = "json"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.environment, "production");
        assert_eq!(config.scheduler.max_concurrency, 12);
        assert_eq!(config.scheduler.poll_interval_seconds, 3);
        assert_eq!(config.scheduler.queue_process_interval_ms, 1000);
        assert_eq!(config.observability.log_format, "json");
        assert!(!config.is_development());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = AppConfig::load(Some("/definitely/not/here.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let result = AppConfig::from_toml_str("[scheduler]\nmax_concurrency = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_log_format() {
        let result = AppConfig::from_toml_str("[observability]\nlog_format = \"xml\"\n");
        assert!(result.is_err());
    }
}
