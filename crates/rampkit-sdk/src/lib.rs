//! # Rampkit SDK
//!
//! Lists payments through the browser agent, generates their proofs and
//! assembles them for on-chain submission. Also resolves the inputs needed to
//! fulfil an intent, reading the chain first and an indexer as fallback.

pub mod client;
pub mod config;
pub mod indexer;
pub mod resolver;
pub mod retry;

pub use client::{AuthenticateOptions, AuthenticateOutcome, AutoProve, ProvedPayment, RampClient};
pub use config::RampConfig;
pub use indexer::GraphqlIndexer;
pub use resolver::{ChainReader, IndexedIntent, IndexedStore, IntentResolver, OnchainIntent, OnchainIntentView};
pub use retry::{with_retry, RetryPolicy};

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::client::{AuthenticateOptions, AutoProve, RampClient};
    pub use crate::config::RampConfig;
    pub use crate::resolver::IntentResolver;
    pub use crate::retry::{with_retry, RetryPolicy};
    pub use rampkit_agent::{ProofProgress, ProofStage};
    pub use rampkit_core::prelude::*;
}
