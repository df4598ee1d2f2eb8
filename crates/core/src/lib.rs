pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use models::{
    RetryPolicy, Task, TaskParameters, TaskPriority, TaskStatus, TaskType, MAX_RETRY_DELAY,
};
pub use traits::{TaskHandler, TaskRepository};
