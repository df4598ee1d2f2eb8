pub mod retry_policy;
pub mod task;

pub use retry_policy::{RetryPolicy, MAX_RETRY_DELAY};
pub use task::{Task, TaskParameters, TaskPriority, TaskStatus, TaskType};
