//! Fulfilment input resolution with on-chain primary and indexed fallback.

use std::sync::Arc;

use async_trait::async_trait;
use rampkit_core::fulfillment::match_payee_details;
use rampkit_core::{DepositPaymentMethod, FulfillmentInputs, RampError, Result, B256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::retry::{with_retry, RetryPolicy};

/// Intent fields as read from the escrow contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnchainIntent {
    pub amount: U256,
    pub fiat_currency: B256,
    pub conversion_rate: U256,
    pub payment_method: B256,
    /// Signal time in seconds.
    pub timestamp: u64,
}

/// Batch read of an intent together with its deposit's payment methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnchainIntentView {
    pub intent: OnchainIntent,
    pub deposit_payment_methods: Vec<DepositPaymentMethod>,
}

/// Read access to the chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// `None` if the chain has no such intent.
    async fn intent_view(&self, intent_hash: B256) -> Result<Option<OnchainIntentView>>;
}

/// Intent fields as held by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedIntent {
    pub amount: U256,
    pub fiat_currency: B256,
    pub conversion_rate: U256,
    pub payment_method_hash: B256,
    pub deposit_id: String,
    /// Signal time in seconds.
    pub signal_timestamp: u64,
}

/// Read access to the indexed store.
#[async_trait]
pub trait IndexedStore: Send + Sync {
    async fn intent(&self, intent_hash: B256) -> Result<Option<IndexedIntent>>;

    async fn deposit_payment_methods(&self, deposit_id: &str) -> Result<Vec<DepositPaymentMethod>>;
}

/// Resolves [`FulfillmentInputs`] for an intent.
pub struct IntentResolver {
    chain: Option<Arc<dyn ChainReader>>,
    store: Arc<dyn IndexedStore>,
    retry: RetryPolicy,
}

impl IntentResolver {
    pub fn new(store: Arc<dyn IndexedStore>) -> Self {
        Self {
            chain: None,
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Try `chain` before the indexed store.
    pub fn with_chain(mut self, chain: Arc<dyn ChainReader>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Retry policy for indexed-store reads.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn resolve(&self, intent_hash: B256) -> Result<FulfillmentInputs> {
        if let Some(chain) = &self.chain {
            match chain.intent_view(intent_hash).await {
                Ok(Some(view)) => {
                    let intent = &view.intent;
                    if let Some(payee_details_hash) =
                        match_payee_details(&view.deposit_payment_methods, &intent.payment_method)
                    {
                        debug!(intent = %intent_hash, "resolved from chain");
                        return Ok(FulfillmentInputs {
                            amount: intent.amount,
                            fiat_currency: intent.fiat_currency,
                            conversion_rate: intent.conversion_rate,
                            payee_details_hash,
                            payment_method_hash: intent.payment_method,
                            intent_timestamp_ms: seconds_to_ms(intent.timestamp),
                        });
                    }
                    warn!(intent = %intent_hash, "no matching deposit payment method on chain; falling back");
                }
                Ok(None) => {
                    warn!(intent = %intent_hash, "intent not found on chain; falling back");
                }
                Err(err) => {
                    warn!(intent = %intent_hash, error = %err, "chain read failed; falling back");
                }
            }
        }

        self.resolve_indexed(intent_hash).await
    }

    async fn resolve_indexed(&self, intent_hash: B256) -> Result<FulfillmentInputs> {
        let store = &self.store;
        let intent = with_retry(&self.retry, move || store.intent(intent_hash))
            .await?
            .ok_or_else(|| RampError::not_found("Intent", intent_hash.to_string()))?;

        let deposit_id = intent.deposit_id.as_str();
        let methods = with_retry(&self.retry, move || store.deposit_payment_methods(deposit_id)).await?;

        let payee_details_hash = match_payee_details(&methods, &intent.payment_method_hash)
            .ok_or_else(|| {
                RampError::not_found(
                    "DepositPaymentMethod",
                    format!("{}/{}", intent.deposit_id, intent.payment_method_hash),
                )
            })?;

        debug!(intent = %intent_hash, deposit = %intent.deposit_id, "resolved from indexer");
        Ok(FulfillmentInputs {
            amount: intent.amount,
            fiat_currency: intent.fiat_currency,
            conversion_rate: intent.conversion_rate,
            payee_details_hash,
            payment_method_hash: intent.payment_method_hash,
            intent_timestamp_ms: seconds_to_ms(intent.signal_timestamp),
        })
    }
}

fn seconds_to_ms(seconds: u64) -> u64 {
    seconds.saturating_mul(1_000)
}
