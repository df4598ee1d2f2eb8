pub mod app_config;
pub mod ingestion;
pub mod observability;
pub mod scheduler;

pub use app_config::AppConfig;
pub use ingestion::{IngestionConfig, ReportingConfig};
pub use observability::ObservabilityConfig;
pub use scheduler::{ExecutorConfig, SchedulerConfig};
