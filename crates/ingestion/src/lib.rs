//! 事件摄取
//!
//! 聊天事件经 [`EventListener`] 过滤后交给 [`EventIngestionPipeline`]，管道根据
//! [`ConfigurationService`] 缓存的路由规则和注册的 [`EventProcessor`] 生成任务。

pub mod config_service;
pub mod configuration;
pub mod event;
pub mod listener;
pub mod pipeline;
pub mod processors;

pub use config_service::ConfigurationService;
pub use configuration::{
    ChannelRoute, Configuration, ConfigurationFetcher, FileConfigurationFetcher,
    StaticConfigurationFetcher,
};
pub use event::{Channel, Event, EventType, Post, User};
pub use listener::{mock_post_event, ChannelFilter, EventFilter, EventHandler, EventListener, EventTypeFilter};
pub use pipeline::{EventIngestionPipeline, IngestionOutcome};
pub use processors::{EventProcessor, PostedMessageProcessor, UserAddedProcessor};
