//! Per-platform cache of payment metadata pushed by the agent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rampkit_agent::{next_inbound, AgentTransport, InboundMessage};
use rampkit_core::{MetadataEntry, MetadataRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::{debug, info};

use crate::subscription::{
    MetadataCallback, MetadataEvent, MetadataSubscription, SubscriptionFilter, SubscriptionManager,
};

/// Cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Interval for asking the agent its version; 0 disables polling.
    pub version_poll_interval_ms: u64,
}

impl CacheConfig {
    /// `None` when polling is disabled.
    pub fn version_poll_interval(&self) -> Option<Duration> {
        (self.version_poll_interval_ms > 0).then(|| Duration::from_millis(self.version_poll_interval_ms))
    }
}

struct CacheInner {
    /// Normalised platform -> latest record.
    records: RwLock<HashMap<String, MetadataRecord>>,

    /// Version last reported by the agent.
    agent_version: RwLock<Option<String>>,

    subscriptions: SubscriptionManager,
}

impl CacheInner {
    async fn ingest(&self, platform: &str, entries: Vec<MetadataEntry>, expires_at_ms: i64) -> MetadataRecord {
        let platform = normalize(platform);
        let record = MetadataRecord::new(entries, expires_at_ms, Utc::now());
        debug!(
            platform = %platform,
            entries = record.entries.len(),
            expires_at = ?record.expires_at,
            "metadata stored"
        );

        self.records
            .write()
            .await
            .insert(platform.clone(), record.clone());

        self.subscriptions
            .publish(MetadataEvent {
                platform,
                record: record.clone(),
                timestamp: record.received_at,
            })
            .await;
        record
    }
}

/// Latest metadata per platform, fed by the agent transport.
pub struct MetadataCache {
    inner: Arc<CacheInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MetadataCache {
    /// Create a cache listening to `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: &AgentTransport, config: CacheConfig) -> Self {
        let inner = Arc::new(CacheInner {
            records: RwLock::new(HashMap::new()),
            agent_version: RwLock::new(None),
            subscriptions: SubscriptionManager::new(),
        });

        let mut tasks = Vec::new();

        let mut rx = transport.subscribe();
        let listener_inner = inner.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(message) = next_inbound(&mut rx).await {
                match message {
                    InboundMessage::MetadataMessagesResponse { data } => {
                        listener_inner
                            .ingest(&data.platform, data.metadata, data.expires_at)
                            .await;
                    }
                    InboundMessage::ExtensionVersionResponse { data } => {
                        *listener_inner.agent_version.write().await = Some(data.version);
                    }
                    _ => {}
                }
            }
        }));

        if let Some(period) = config.version_poll_interval() {
            let transport = transport.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    if let Err(err) = transport.request_version().await {
                        debug!(error = %err, "version poll skipped");
                    }
                }
            }));
        }

        Self {
            inner,
            tasks: Mutex::new(tasks),
        }
    }

    /// Register a callback for every push, in subscription order.
    pub async fn subscribe(&self, callback: MetadataCallback) -> MetadataSubscription {
        self.inner
            .subscriptions
            .subscribe(SubscriptionFilter::default(), callback)
            .await
    }

    /// Register a callback for pushes matching `filter`.
    pub async fn subscribe_filtered(
        &self,
        filter: SubscriptionFilter,
        callback: MetadataCallback,
    ) -> MetadataSubscription {
        self.inner.subscriptions.subscribe(filter, callback).await
    }

    pub async fn unsubscribe(&self, subscription: &MetadataSubscription) -> bool {
        self.inner.subscriptions.unsubscribe(subscription.id).await
    }

    /// Stream of pushes stored after this call.
    pub fn updates(&self) -> impl Stream<Item = MetadataEvent> + Send + Unpin + 'static {
        self.inner.subscriptions.updates()
    }

    /// Latest record for `platform`, expired or not.
    pub async fn get(&self, platform: &str) -> Option<MetadataRecord> {
        self.inner.records.read().await.get(&normalize(platform)).cloned()
    }

    /// True if there is no record or it has expired.
    pub async fn is_expired(&self, platform: &str) -> bool {
        self.is_expired_at(platform, Utc::now()).await
    }

    pub async fn is_expired_at(&self, platform: &str, now: DateTime<Utc>) -> bool {
        match self.get(platform).await {
            Some(record) => record.is_expired_at(now),
            None => true,
        }
    }

    /// Store a push as if the agent had sent it.
    pub async fn ingest(&self, platform: &str, entries: Vec<MetadataEntry>, expires_at_ms: i64) -> MetadataRecord {
        self.inner.ingest(platform, entries, expires_at_ms).await
    }

    pub async fn clear(&self, platform: &str) {
        self.inner.records.write().await.remove(&normalize(platform));
    }

    /// Version last reported by the agent.
    pub async fn agent_version(&self) -> Option<String> {
        self.inner.agent_version.read().await.clone()
    }

    /// Stop the version poll, detach from the transport and drop all state.
    pub async fn dispose(&self) {
        self.abort_tasks();
        self.inner.subscriptions.clear().await;
        self.inner.records.write().await.clear();
        info!("metadata cache disposed");
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Drop for MetadataCache {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

fn normalize(platform: &str) -> String {
    platform.trim().to_ascii_lowercase()
}
