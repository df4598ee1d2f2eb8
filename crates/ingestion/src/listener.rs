use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::seq::IndexedRandom;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scheduler_infrastructure::MetricsCollector;

use crate::event::{Event, EventType};

/// 事件的下游消费者
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event);
}

/// 事件过滤谓词
pub trait EventFilter: Send + Sync {
    fn should_process(&self, event: &Event) -> bool;
}

/// 只放行指定频道的事件
#[derive(Debug, Clone)]
pub struct ChannelFilter {
    channel_ids: HashSet<String>,
}

impl ChannelFilter {
    pub fn new<I, S>(channel_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channel_ids: channel_ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl EventFilter for ChannelFilter {
    fn should_process(&self, event: &Event) -> bool {
        event
            .channel_id()
            .is_some_and(|id| self.channel_ids.contains(id))
    }
}

/// 只放行指定类型的事件
#[derive(Debug, Clone)]
pub struct EventTypeFilter {
    event_types: HashSet<EventType>,
}

impl EventTypeFilter {
    pub fn new<I, T>(event_types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EventType>,
    {
        Self {
            event_types: event_types.into_iter().map(Into::into).collect(),
        }
    }
}

impl EventFilter for EventTypeFilter {
    fn should_process(&self, event: &Event) -> bool {
        self.event_types.contains(&event.event_type)
    }
}

const MOCK_CHANNEL_ID: &str = "channel1";
const MOCK_USER_ID: &str = "user1";
const MOCK_MESSAGES: &[&str] = &[
    "This is a test message that should trigger a task",
    "urgent: the nightly export job is stuck",
    "Can someone schedule the weekly sync?",
    "important: release notes need review",
    "low priority: tidy up the wiki when possible",
    "just saying hello",
];

/// 生成一条模拟的消息发布事件
pub fn mock_post_event() -> Event {
    let message = MOCK_MESSAGES
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(MOCK_MESSAGES[0]);
    let now = chrono::Utc::now();

    let data = json!({
        "post": {
            "id": format!("post-{}", now.timestamp_millis()),
            "create_at": now.timestamp(),
            "user_id": MOCK_USER_ID,
            "channel_id": MOCK_CHANNEL_ID,
            "message": message,
        },
        "channel": {
            "id": MOCK_CHANNEL_ID,
            "name": "test-channel",
            "display_name": "Test Channel",
        },
        "user": {
            "id": MOCK_USER_ID,
            "username": "testuser",
            "email": "test@example.com",
        },
    });
    let data = match data {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    Event::new(EventType::Posted, data)
}

/// 事件监听器
///
/// 传输层通过 [`EventListener::handle_event`] 推送事件，监听器先过滤再依次分发给所有处理器。
/// 任意一个过滤器放行即可；没有过滤器时全部放行。
pub struct EventListener {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    filters: RwLock<Vec<Arc<dyn EventFilter>>>,
    metrics: Arc<MetricsCollector>,
    mock_interval: Option<Duration>,
    token: Mutex<Option<CancellationToken>>,
    mock_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventListener {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            filters: RwLock::new(Vec::new()),
            metrics,
            mock_interval: None,
            token: Mutex::new(None),
            mock_handle: Mutex::new(None),
        }
    }

    /// 监听期间按间隔生成模拟事件
    pub fn with_mock_events(mut self, interval: Duration) -> Self {
        self.mock_interval = Some(interval);
        self
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn add_filter(&self, filter: Arc<dyn EventFilter>) {
        self.filters.write().push(filter);
    }

    pub fn is_listening(&self) -> bool {
        self.token.lock().is_some()
    }

    pub fn start_listening(self: &Arc<Self>, shutdown: CancellationToken) {
        let token = {
            let mut slot = self.token.lock();
            if slot.is_some() {
                return;
            }
            let token = shutdown.child_token();
            *slot = Some(token.clone());
            token
        };
        info!(mock_events = self.mock_interval.is_some(), "开始监听事件");

        let Some(interval) = self.mock_interval else {
            return;
        };
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let event = mock_post_event();
                        debug!(event_type = %event.event_type, "生成模拟事件");
                        this.handle_event(&event).await;
                    }
                }
            }
            debug!("模拟事件生成已停止");
        });
        *self.mock_handle.lock() = Some(handle);
    }

    pub async fn stop_listening(&self) {
        let Some(token) = self.token.lock().take() else {
            return;
        };
        info!("停止监听事件");
        token.cancel();

        let handle = self.mock_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "模拟事件任务异常退出");
            }
        }
    }

    /// 过滤并分发事件，返回事件是否通过过滤
    pub async fn handle_event(&self, event: &Event) -> bool {
        self.metrics.record_event_received();
        if !self.should_process(event) {
            debug!(event_type = %event.event_type, channel_id = ?event.channel_id(), "事件被过滤");
            self.metrics.record_event_dropped();
            return false;
        }

        let handlers: Vec<Arc<dyn EventHandler>> = self.handlers.read().clone();
        for handler in handlers {
            handler.handle_event(event).await;
        }
        true
    }

    fn should_process(&self, event: &Event) -> bool {
        let filters = self.filters.read();
        filters.is_empty() || filters.iter().any(|filter| filter.should_process(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle_event(&self, _event: &Event) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event(event_type: &str, channel_id: &str) -> Event {
        let data = json!({"channel": {"id": channel_id}});
        match data {
            serde_json::Value::Object(map) => Event::new(event_type, map),
            _ => unreachable!(),
        }
    }

    fn listener() -> (Arc<EventListener>, Arc<CountingHandler>) {
        let listener = Arc::new(EventListener::new(Arc::new(MetricsCollector::new())));
        let handler = Arc::new(CountingHandler::default());
        listener.add_handler(handler.clone());
        (listener, handler)
    }

    #[tokio::test]
    async fn test_no_filters_accepts_everything() {
        let (listener, handler) = listener();
        assert!(listener.handle_event(&event("typing", "C1")).await);
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_any_filter_accepting_is_enough() {
        let (listener, handler) = listener();
        listener.add_filter(Arc::new(ChannelFilter::new(["C1"])));
        listener.add_filter(Arc::new(EventTypeFilter::new(["user_added"])));

        assert!(listener.handle_event(&event("posted", "C1")).await);
        assert!(listener.handle_event(&event("user_added", "C9")).await);
        assert!(!listener.handle_event(&event("posted", "C9")).await);
        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mock_events_flow_while_listening() {
        let listener = Arc::new(
            EventListener::new(Arc::new(MetricsCollector::new()))
                .with_mock_events(Duration::from_millis(20)),
        );
        let handler = Arc::new(CountingHandler::default());
        listener.add_handler(handler.clone());

        let token = CancellationToken::new();
        listener.start_listening(token.clone());
        assert!(listener.is_listening());
        tokio::time::sleep(Duration::from_millis(150)).await;
        listener.stop_listening().await;
        assert!(!listener.is_listening());

        let seen = handler.seen.load(Ordering::SeqCst);
        assert!(seen >= 2);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_mock_post_event_shape() {
        let event = mock_post_event();
        assert_eq!(event.event_type, EventType::Posted);
        assert_eq!(event.channel_id(), Some(MOCK_CHANNEL_ID));
        assert!(MOCK_MESSAGES.contains(&event.message().unwrap()));
        assert_eq!(event.user.unwrap().username, "testuser");
    }
}
