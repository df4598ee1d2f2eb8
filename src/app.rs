use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scheduler_core::{AppConfig, Task, TaskPriority, TaskRepository};
use scheduler_dispatcher::{ResultReportingService, SchedulerOptions, TaskScheduler};
use scheduler_infrastructure::{InMemoryTaskRepository, MetricsCollector};
use scheduler_ingestion::{
    ChannelFilter, ConfigurationFetcher, ConfigurationService, EventIngestionPipeline,
    EventListener, EventTypeFilter, FileConfigurationFetcher, PostedMessageProcessor,
    StaticConfigurationFetcher, UserAddedProcessor,
};
use scheduler_worker::{
    DefaultTaskHandler, ForwardingTaskHandler, LoggingMessageSink, MessageSink, TaskExecutor,
};

/// 转发处理器负责的任务标签
pub const FORWARDING_TAGS: [&str; 2] = ["MATTERMOST", "MATTERMOST_EVENT"];

/// 主应用程序：组装存储、执行器、调度器、配置服务、事件监听和报告服务
pub struct Application {
    config: AppConfig,
    repository: Arc<InMemoryTaskRepository>,
    executor: Arc<TaskExecutor>,
    scheduler: Arc<TaskScheduler>,
    config_service: Arc<ConfigurationService>,
    pipeline: Arc<EventIngestionPipeline>,
    listener: Arc<EventListener>,
    reporting: Option<Arc<ResultReportingService>>,
}

impl Application {
    /// 使用配置决定的数据源和日志消息出口创建应用
    pub fn new(config: AppConfig) -> Result<Self> {
        let fetcher: Arc<dyn ConfigurationFetcher> = match &config.ingestion.configurations_file {
            Some(path) => Arc::new(FileConfigurationFetcher::new(path)),
            None => Arc::new(StaticConfigurationFetcher::mock()),
        };
        Self::with_components(config, fetcher, Arc::new(LoggingMessageSink::new()))
    }

    pub fn with_components(
        config: AppConfig,
        fetcher: Arc<dyn ConfigurationFetcher>,
        message_sink: Arc<dyn MessageSink>,
    ) -> Result<Self> {
        config.validate().context("配置验证失败")?;
        info!(environment = %config.environment, "初始化应用程序");

        let metrics = Arc::new(MetricsCollector::new());
        let repository = Arc::new(InMemoryTaskRepository::new());
        let store: Arc<dyn TaskRepository> = repository.clone();

        let executor = Arc::new(
            TaskExecutor::new(Arc::clone(&store), Arc::clone(&metrics)).with_default_handler(
                Arc::new(DefaultTaskHandler::new(Duration::from_millis(
                    config.executor.default_work_ms,
                ))),
            ),
        );
        let forwarding = Arc::new(ForwardingTaskHandler::new(
            message_sink,
            config.ingestion.default_channel_id.clone(),
        ));
        for tag in FORWARDING_TAGS {
            executor.register_handler(tag, forwarding.clone());
        }

        let scheduler = Arc::new(TaskScheduler::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            Arc::clone(&metrics),
            SchedulerOptions::from(&config.scheduler),
        ));

        let config_service = Arc::new(ConfigurationService::new(
            fetcher,
            Arc::clone(&metrics),
            Duration::from_secs(config.ingestion.config_refresh_interval_seconds),
        ));

        let pipeline = Arc::new(EventIngestionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&config_service),
            Arc::clone(&metrics),
        ));
        pipeline.register_processor(
            "posted_message",
            Arc::new(PostedMessageProcessor::new(&config.ingestion.keyword_triggers)),
        );
        pipeline.register_processor("user_added", Arc::new(UserAddedProcessor));

        let mut listener = EventListener::new(Arc::clone(&metrics));
        if config.ingestion.mock_events {
            listener = listener.with_mock_events(Duration::from_secs(
                config.ingestion.mock_event_interval_seconds,
            ));
        }
        let listener = Arc::new(listener);
        if !config.ingestion.channel_filter.is_empty() {
            listener.add_filter(Arc::new(ChannelFilter::new(
                config.ingestion.channel_filter.iter().cloned(),
            )));
        }
        if !config.ingestion.event_type_filter.is_empty() {
            listener.add_filter(Arc::new(EventTypeFilter::new(
                config.ingestion.event_type_filter.iter().map(String::as_str),
            )));
        }
        listener.add_handler(pipeline.clone());

        let reporting = config.reporting.enabled.then(|| {
            Arc::new(
                ResultReportingService::new(
                    Arc::clone(&store),
                    Duration::from_secs(config.reporting.interval_seconds),
                )
                .with_builtin_strategies(&config.reporting.report_types),
            )
        });

        Ok(Self {
            config,
            repository,
            executor,
            scheduler,
            config_service,
            pipeline,
            listener,
            reporting,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn repository(&self) -> Arc<InMemoryTaskRepository> {
        Arc::clone(&self.repository)
    }

    pub fn executor(&self) -> Arc<TaskExecutor> {
        Arc::clone(&self.executor)
    }

    pub fn scheduler(&self) -> Arc<TaskScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn config_service(&self) -> Arc<ConfigurationService> {
        Arc::clone(&self.config_service)
    }

    pub fn pipeline(&self) -> Arc<EventIngestionPipeline> {
        Arc::clone(&self.pipeline)
    }

    pub fn listener(&self) -> Arc<EventListener> {
        Arc::clone(&self.listener)
    }

    pub fn reporting(&self) -> Option<Arc<ResultReportingService>> {
        self.reporting.clone()
    }

    /// 启动所有后台组件，直到 `shutdown` 被取消后按依赖逆序停止
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("启动应用程序");

        self.config_service.start(shutdown.clone()).await;
        self.scheduler
            .start(shutdown.clone())
            .context("启动任务调度器失败")?;
        if let Some(reporting) = &self.reporting {
            reporting.start(shutdown.clone());
        }
        self.listener.start_listening(shutdown.clone());

        if self.config.is_development() {
            match self.seed_development_tasks().await {
                Ok(ids) => info!(count = ids.len(), "已添加示例任务"),
                Err(e) => warn!(error = %e, "添加示例任务失败"),
            }
        }

        info!("应用程序已启动");
        shutdown.cancelled().await;

        info!("开始停止应用组件");
        self.listener.stop_listening().await;
        self.config_service.stop().await;
        if let Some(reporting) = &self.reporting {
            reporting.stop().await;
        }
        self.scheduler.stop().await;
        info!("应用组件已全部停止");
        Ok(())
    }

    /// 添加开发环境的示例任务：一个立即通知和一个每天 9 点的定时通知
    pub async fn seed_development_tasks(&self) -> Result<Vec<String>> {
        let notification = Task::immediate("聊天消息处理示例")
            .with_priority(TaskPriority::High)
            .with_tags(["MATTERMOST"])
            .with_parameter("channel_id", "channel1")
            .with_parameter("message", "这是一条测试消息")
            .with_parameter("forward_type", "notification")
            .with_parameter("event_type", "posted")
            .with_parameter("channel_name", "测试频道")
            .with_parameter("username", "测试用户")
            .with_parameter("notify_admin", "true");

        let daily = Task::scheduled("聊天定时通知示例", "0 0 9 * * *")
            .with_tags(["MATTERMOST"])
            .with_parameter("channel_id", "channel1")
            .with_parameter("message", "这是一条定时发送的通知")
            .with_parameter("forward_type", "channel_message")
            .with_parameter("target_channel_id", "channel456");

        let mut ids = Vec::new();
        for task in [notification, daily] {
            ids.push(
                self.scheduler
                    .add_task(task)
                    .await
                    .context("保存示例任务失败")?,
            );
        }
        Ok(ids)
    }
}
