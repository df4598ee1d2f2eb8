pub mod repository;
pub mod task_handler;

pub use repository::*;
pub use task_handler::*;
