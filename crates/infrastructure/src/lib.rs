pub mod in_memory_repository;
pub mod metrics_collector;

pub use in_memory_repository::InMemoryTaskRepository;
pub use metrics_collector::MetricsCollector;
