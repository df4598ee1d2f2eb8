use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scheduler_core::SchedulerResult;
use scheduler_infrastructure::MetricsCollector;

use crate::configuration::{Configuration, ConfigurationFetcher};

#[derive(Debug, Default)]
struct Snapshot {
    configurations: Vec<Configuration>,
    last_update_time: Option<DateTime<Utc>>,
}

/// 路由配置缓存
///
/// 启动时立即拉取一次，之后按固定间隔刷新。拉取失败或返回空列表时保留上一次的快照。
pub struct ConfigurationService {
    fetcher: Arc<dyn ConfigurationFetcher>,
    metrics: Arc<MetricsCollector>,
    refresh_interval: Duration,
    snapshot: RwLock<Snapshot>,
    token: Mutex<Option<CancellationToken>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigurationService {
    pub fn new(
        fetcher: Arc<dyn ConfigurationFetcher>,
        metrics: Arc<MetricsCollector>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            metrics,
            refresh_interval,
            snapshot: RwLock::new(Snapshot::default()),
            token: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub async fn start(self: &Arc<Self>, shutdown: CancellationToken) {
        let token = {
            let mut slot = self.token.lock();
            if slot.is_some() {
                debug!("配置服务已在运行");
                return;
            }
            let token = shutdown.child_token();
            *slot = Some(token.clone());
            token
        };

        info!(
            fetcher = self.fetcher.name(),
            interval_secs = self.refresh_interval.as_secs(),
            "启动配置服务"
        );
        if let Err(e) = self.refresh_now().await {
            warn!(error = %e, "首次拉取路由配置失败");
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = this.refresh_now().await {
                            warn!(error = %e, "刷新路由配置失败，继续使用旧配置");
                        }
                    }
                }
            }
            debug!("配置刷新循环已退出");
        });
        *self.handle.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(token) = self.token.lock().take() {
            info!("停止配置服务");
            token.cancel();
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "配置刷新循环异常退出");
            }
        }
    }

    /// 立即拉取一次，返回替换后的配置数量
    ///
    /// 空结果不替换快照，返回 `Ok(0)`。
    pub async fn refresh_now(&self) -> SchedulerResult<usize> {
        let configurations = match self.fetcher.fetch_configurations().await {
            Ok(configurations) => configurations,
            Err(e) => {
                self.metrics.record_config_refresh(false, 0);
                return Err(e);
            }
        };

        if configurations.is_empty() {
            warn!(fetcher = self.fetcher.name(), "拉取到空的路由配置，保留旧配置");
            self.metrics.record_config_refresh(false, 0);
            return Ok(0);
        }

        let count = configurations.len();
        {
            let mut snapshot = self.snapshot.write();
            snapshot.configurations = configurations;
            snapshot.last_update_time = Some(Utc::now());
        }
        self.metrics.record_config_refresh(true, count);
        info!(count, "路由配置已更新");
        Ok(count)
    }

    /// 当前配置的副本
    pub fn get_current_configurations(&self) -> Vec<Configuration> {
        self.snapshot.read().configurations.clone()
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.snapshot.read().last_update_time
    }
}
