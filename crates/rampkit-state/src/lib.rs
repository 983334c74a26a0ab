//! # Rampkit State
//!
//! Time-bounded cache of payment metadata pushed by the agent.

pub mod cache;
pub mod subscription;

pub use cache::{CacheConfig, MetadataCache};
pub use subscription::{
    MetadataCallback, MetadataEvent, MetadataSubscription, SubscriptionFilter, SubscriptionManager,
};
