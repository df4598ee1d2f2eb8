pub mod executor;
pub mod handlers;

pub use executor::TaskExecutor;
pub use handlers::{
    DefaultTaskHandler, ForwardType, ForwardingTaskHandler, LoggingMessageSink, MessageSink,
    SentMessage,
};
