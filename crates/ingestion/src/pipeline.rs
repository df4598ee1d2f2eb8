use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use scheduler_core::{SchedulerError, SchedulerResult, Task, TaskRepository};
use scheduler_infrastructure::MetricsCollector;

use crate::config_service::ConfigurationService;
use crate::configuration::ChannelRoute;
use crate::event::Event;
use crate::listener::EventHandler;
use crate::processors::EventProcessor;

/// 一次事件摄取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionOutcome {
    /// 生成并保存了任务
    Created(String),
    /// 没有路由规则匹配该事件
    Unmatched,
    /// 匹配但没有生成任务（处理器出错、处理器不产出任务或默认任务缺少消息）
    Dropped,
}

/// 事件摄取管道：路由匹配 → 处理器选择 → 保存任务
///
/// 处理器按注册顺序参与选择，第一个 `should_process` 返回 true 的处理器负责转换；
/// 都不认领时按第一条匹配的路由生成默认任务。保存后的任务处于 PENDING，
/// 由调度器的轮询循环接手。
pub struct EventIngestionPipeline {
    repository: Arc<dyn TaskRepository>,
    config_service: Arc<ConfigurationService>,
    metrics: Arc<MetricsCollector>,
    processors: RwLock<Vec<(String, Arc<dyn EventProcessor>)>>,
}

impl EventIngestionPipeline {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        config_service: Arc<ConfigurationService>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            repository,
            config_service,
            metrics,
            processors: RwLock::new(Vec::new()),
        }
    }

    /// 注册处理器，同名处理器被替换且保持原来的位置
    pub fn register_processor(&self, name: impl Into<String>, processor: Arc<dyn EventProcessor>) {
        let name = name.into();
        let mut processors = self.processors.write();
        match processors.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = processor,
            None => processors.push((name, processor)),
        }
    }

    pub fn unregister_processor(&self, name: &str) -> bool {
        let mut processors = self.processors.write();
        let before = processors.len();
        processors.retain(|(existing, _)| existing != name);
        processors.len() != before
    }

    pub fn processor_names(&self) -> Vec<String> {
        self.processors
            .read()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// 把事件转换为至多一个任务
    ///
    /// 没有加载任何路由时返回 [`SchedulerError::ConfigurationUnavailable`]，
    /// 保存任务失败时返回存储错误。
    pub async fn ingest(&self, event: &Event) -> SchedulerResult<IngestionOutcome> {
        let configurations = self.config_service.get_current_configurations();
        if configurations.is_empty() {
            return Err(SchedulerError::ConfigurationUnavailable);
        }

        let matched: Vec<&ChannelRoute> = configurations
            .iter()
            .filter_map(|config| config.route_for(event))
            .collect();
        let Some(first_route) = matched.first() else {
            debug!(
                event_type = %event.event_type,
                channel_id = ?event.channel_id(),
                "没有匹配的路由配置"
            );
            return Ok(IngestionOutcome::Unmatched);
        };

        let claimed = self
            .processors
            .read()
            .iter()
            .find(|(_, processor)| processor.should_process(event))
            .map(|(name, processor)| (name.clone(), Arc::clone(processor)));

        let task = match claimed {
            Some((name, processor)) => match processor.process_event(event) {
                Ok(task) => {
                    debug!(processor = %name, produced = task.is_some(), "处理器已处理事件");
                    task
                }
                Err(e) => {
                    warn!(processor = %name, event_type = %event.event_type, error = %e, "处理事件失败");
                    None
                }
            },
            None => {
                debug!(config_id = %first_route.id, "没有处理器认领事件，使用默认任务");
                Self::default_task(event, first_route)
            }
        };

        let Some(task) = task else {
            return Ok(IngestionOutcome::Dropped);
        };

        let task_id = self.repository.add_task(task).await?;
        info!(task_id = %task_id, event_type = %event.event_type, "事件已转换为任务");
        Ok(IngestionOutcome::Created(task_id))
    }

    /// 按路由规则生成默认任务，事件没有消息时不生成
    fn default_task(event: &Event, route: &ChannelRoute) -> Option<Task> {
        let post = event.post.as_ref()?;

        let name = match &event.channel {
            Some(channel) if !channel.name.is_empty() => format!("处理来自 {} 的消息", channel.name),
            _ => "聊天事件处理".to_string(),
        };

        let mut task = Task::immediate(name)
            .with_tags(["MATTERMOST_EVENT"])
            .with_parameter("event_type", event.event_type.as_str())
            .with_parameter("channel_id", post.channel_id.as_str())
            .with_parameter("message", post.message.as_str())
            .with_parameter("user_id", post.user_id.as_str())
            .with_parameter("forward_type", route.forward_type.as_str())
            .with_parameter("config_id", route.id.as_str())
            .with_parameter("custom", Value::Object(route.custom.clone()));

        if let Some(channel) = &event.channel {
            task = task.with_parameter("channel_name", channel.name.as_str());
        }
        if let Some(user) = &event.user {
            task = task.with_parameter("username", user.username.as_str());
        }
        Some(task)
    }
}

#[async_trait]
impl EventHandler for EventIngestionPipeline {
    async fn handle_event(&self, event: &Event) {
        match self.ingest(event).await {
            Ok(IngestionOutcome::Created(_)) => self.metrics.record_event_converted(),
            Ok(_) => self.metrics.record_event_dropped(),
            Err(SchedulerError::ConfigurationUnavailable) => {
                warn!(event_type = %event.event_type, "路由配置尚未加载，丢弃事件");
                self.metrics.record_event_dropped();
            }
            Err(e) => {
                error!(event_type = %event.event_type, error = %e, "事件摄取失败");
                self.metrics.record_event_dropped();
            }
        }
    }
}
