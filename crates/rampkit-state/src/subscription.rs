//! Metadata subscription system.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rampkit_core::MetadataRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

/// A metadata push landed in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataEvent {
    /// Normalised platform key.
    pub platform: String,

    /// The record now held for the platform.
    pub record: MetadataRecord,

    pub timestamp: DateTime<Utc>,
}

/// Callback invoked for every matching push.
pub type MetadataCallback = Arc<dyn Fn(&MetadataEvent) + Send + Sync>;

/// Filter for subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    /// Platforms to watch; all platforms if unset.
    pub platforms: Option<Vec<String>>,
}

impl SubscriptionFilter {
    /// Create a filter for specific platforms.
    pub fn platforms(platforms: Vec<String>) -> Self {
        Self {
            platforms: Some(
                platforms
                    .into_iter()
                    .map(|p| p.trim().to_ascii_lowercase())
                    .collect(),
            ),
        }
    }

    /// Check if an event matches this filter.
    pub fn matches(&self, event: &MetadataEvent) -> bool {
        match &self.platforms {
            Some(platforms) => platforms.iter().any(|p| p == &event.platform),
            None => true,
        }
    }
}

/// Handle returned by [`SubscriptionManager::subscribe`].
#[derive(Debug, Clone)]
pub struct MetadataSubscription {
    /// Unique ID for this subscription.
    pub id: Uuid,

    pub filter: SubscriptionFilter,
}

struct Subscriber {
    id: Uuid,
    filter: SubscriptionFilter,
    callback: MetadataCallback,
}

/// Ordered callback registry plus a broadcast feed of the same events.
pub struct SubscriptionManager {
    sender: broadcast::Sender<MetadataEvent>,

    /// Kept in subscription order.
    subscribers: RwLock<Vec<Subscriber>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            sender,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback.
    pub async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        callback: MetadataCallback,
    ) -> MetadataSubscription {
        let id = Uuid::new_v4();
        self.subscribers.write().await.push(Subscriber {
            id,
            filter: filter.clone(),
            callback,
        });
        MetadataSubscription { id, filter }
    }

    /// Remove a callback. Returns false if it was already gone.
    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Deliver `event` to matching callbacks in subscription order, then to
    /// stream listeners.
    pub async fn publish(&self, event: MetadataEvent) {
        {
            let subscribers = self.subscribers.read().await;
            for subscriber in subscribers.iter().filter(|s| s.filter.matches(&event)) {
                (subscriber.callback)(&event);
            }
        }
        let _ = self.sender.send(event);
    }

    /// Stream of every event published after this call.
    pub fn updates(&self) -> impl Stream<Item = MetadataEvent> + Send + Unpin + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|event| event.ok())
    }

    /// Drop all callbacks.
    pub async fn clear(&self) {
        self.subscribers.write().await.clear();
    }

    /// Get the number of active subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event(platform: &str) -> MetadataEvent {
        MetadataEvent {
            platform: platform.to_string(),
            record: MetadataRecord::new(Vec::new(), 0, Utc::now()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_filter_platforms() {
        let filter = SubscriptionFilter::platforms(vec!["Wise".to_string()]);
        assert!(filter.matches(&event("wise")));
        assert!(!filter.matches(&event("venmo")));
        assert!(SubscriptionFilter::default().matches(&event("venmo")));
    }

    #[tokio::test]
    async fn test_callbacks_run_in_subscription_order() {
        let manager = SubscriptionManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let seen = seen.clone();
            manager
                .subscribe(
                    SubscriptionFilter::default(),
                    Arc::new(move |_: &MetadataEvent| seen.lock().unwrap().push(name)),
                )
                .await;
        }

        manager.publish(event("wise")).await;
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let manager = SubscriptionManager::new();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();

        let sub = manager
            .subscribe(
                SubscriptionFilter::default(),
                Arc::new(move |_: &MetadataEvent| *counter.lock().unwrap() += 1),
            )
            .await;
        assert_eq!(manager.subscription_count().await, 1);

        assert!(manager.unsubscribe(sub.id).await);
        assert!(!manager.unsubscribe(sub.id).await);
        manager.publish(event("wise")).await;

        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(manager.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_stream() {
        let manager = SubscriptionManager::new();
        let mut updates = manager.updates();

        manager.publish(event("revolut")).await;
        let received = updates.next().await.unwrap();
        assert_eq!(received.platform, "revolut");
    }
}
