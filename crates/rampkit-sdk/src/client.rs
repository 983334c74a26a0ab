//! Rampkit client: lists payments, generates proofs and assembles them for
//! submission.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rampkit_agent::{AgentPort, AgentTransport, ProgressCallback, ProofFlow, ProofRequest};
use rampkit_core::metadata::prepare_for_display;
use rampkit_core::{
    encode_many, encode_with_method_tag, MetadataEntry, MetadataRecord, PlatformCatalog, Proof,
    ProofBytes, RampError, Result, B256,
};
use rampkit_state::{MetadataCache, MetadataEvent};
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::config::RampConfig;

/// Called with the payments available to prove.
pub type PaymentsCallback = Arc<dyn Fn(&[MetadataEntry]) + Send + Sync>;

/// Called once proofs are assembled.
pub type ProvedCallback = Arc<dyn Fn(&ProvedPayment) + Send + Sync>;

/// Called when the proof phase fails.
pub type ErrorCallback = Arc<dyn Fn(&RampError) + Send + Sync>;

/// Proofs for one payment, ready to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvedPayment {
    pub proofs: Vec<Proof>,
    pub proof_bytes: ProofBytes,
}

/// What to prove after listing payments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoProve {
    pub intent_hash: B256,

    /// Payment to prove; the newest visible payment if unset.
    pub original_index: Option<u32>,

    /// Prefix the assembled bytes with this payment-method tag.
    pub method_tag: Option<u8>,
}

/// Options for [`RampClient::authenticate_and_prove`].
#[derive(Clone, Default)]
pub struct AuthenticateOptions {
    pub variant_index: Option<usize>,
    pub auto_prove: Option<AutoProve>,
    pub on_payments_received: Option<PaymentsCallback>,
    pub on_proof_progress: Option<ProgressCallback>,
    pub on_proof_success: Option<ProvedCallback>,
    pub on_proof_error: Option<ErrorCallback>,
}

impl AuthenticateOptions {
    pub fn with_variant(mut self, variant_index: usize) -> Self {
        self.variant_index = Some(variant_index);
        self
    }

    pub fn with_auto_prove(mut self, auto_prove: AutoProve) -> Self {
        self.auto_prove = Some(auto_prove);
        self
    }

    pub fn on_payments_received(mut self, callback: impl Fn(&[MetadataEntry]) + Send + Sync + 'static) -> Self {
        self.on_payments_received = Some(Arc::new(callback));
        self
    }

    pub fn on_proof_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_proof_progress = Some(callback);
        self
    }

    pub fn on_proof_success(mut self, callback: impl Fn(&ProvedPayment) + Send + Sync + 'static) -> Self {
        self.on_proof_success = Some(Arc::new(callback));
        self
    }

    pub fn on_proof_error(mut self, callback: impl Fn(&RampError) + Send + Sync + 'static) -> Self {
        self.on_proof_error = Some(Arc::new(callback));
        self
    }
}

/// Result of [`RampClient::authenticate_and_prove`].
#[derive(Debug, Clone)]
pub struct AuthenticateOutcome {
    pub payments: Vec<MetadataEntry>,

    /// `None` unless proving was requested. A failed proof phase does not
    /// affect `payments`.
    pub proof: Option<Result<ProvedPayment>>,
}

/// Client for the proof-generating agent.
pub struct RampClient {
    transport: AgentTransport,
    cache: MetadataCache,
    flow: ProofFlow,
    config: RampConfig,
}

impl RampClient {
    /// Create a client over an existing transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: AgentTransport, config: RampConfig) -> Self {
        let cache = MetadataCache::new(&transport, config.cache.clone());
        let flow = ProofFlow::new(transport.clone(), config.flow.clone());
        Self {
            transport,
            cache,
            flow,
            config,
        }
    }

    /// Create a client and the port the agent bridge should serve.
    pub fn connect(config: RampConfig) -> (Self, AgentPort) {
        let (transport, port) = AgentTransport::new(config.transport.clone());
        (Self::new(transport, config), port)
    }

    pub fn transport(&self) -> &AgentTransport {
        &self.transport
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn flow(&self) -> &ProofFlow {
        &self.flow
    }

    /// Open the agent's collection surface and wait for its payments.
    ///
    /// Returns visible payments, newest first. Only a push received after
    /// this call starts counts.
    pub async fn request_and_list_payments(
        &self,
        platform: &str,
        variant_index: Option<usize>,
    ) -> Result<Vec<MetadataEntry>> {
        let method = PlatformCatalog::resolve(platform, variant_index)?;
        if !self.transport.is_available() {
            return Err(RampError::TransportUnavailable(
                "agent is not connected".to_string(),
            ));
        }

        let key = platform_key(platform);
        let started = Utc::now();
        let mut updates = self.cache.updates();
        self.transport
            .open_collection_surface(&method.action_identifier, &key)
            .await?;

        let record = self.wait_for_metadata(&key, started, &mut updates).await?;
        let payments = prepare_for_display(&record.entries);
        info!(platform, payments = payments.len(), "payments listed");
        Ok(payments)
    }

    async fn wait_for_metadata(
        &self,
        key: &str,
        since: DateTime<Utc>,
        updates: &mut (impl Stream<Item = MetadataEvent> + Unpin),
    ) -> Result<MetadataRecord> {
        let poll_interval = self.config.metadata_poll_interval();
        let deadline = Instant::now() + self.config.metadata_timeout();
        let mut stream_open = true;

        loop {
            if let Some(record) = self.cache.get(key).await {
                if record.received_at >= since {
                    return Ok(record);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RampError::Timeout {
                    duration_ms: self.config.metadata_timeout_ms,
                    message: format!("no payments received for '{}'", key),
                });
            }
            let wait = poll_interval.min(deadline - now);

            tokio::select! {
                event = updates.next(), if stream_open => match event {
                    Some(event) if event.platform == key => return Ok(event.record),
                    Some(_) => {}
                    None => stream_open = false,
                },
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Generate every sub-proof the platform variant needs for one payment.
    pub async fn generate_proofs(
        &self,
        platform: &str,
        intent_hash: B256,
        original_index: u32,
        variant_index: Option<usize>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<Proof>> {
        let method = PlatformCatalog::resolve(platform, variant_index)?;
        let request = ProofRequest {
            platform: platform_key(platform),
            intent_hash,
            original_index,
            required_count: method.required_proof_count,
        };
        self.flow.generate_proofs(&request, on_progress).await
    }

    /// Encode proofs for submission, optionally prefixed with a method tag.
    pub fn assemble(proofs: &[Proof], method_tag: Option<u8>) -> Result<ProofBytes> {
        let encoded = encode_many(proofs)?;
        Ok(match method_tag {
            Some(tag) => encode_with_method_tag(&encoded, tag),
            None => encoded,
        })
    }

    /// List payments, then optionally prove one of them.
    ///
    /// Errors listing payments fail the call. Errors proving are reported
    /// through `on_proof_error` and [`AuthenticateOutcome::proof`].
    pub async fn authenticate_and_prove(
        &self,
        platform: &str,
        options: AuthenticateOptions,
    ) -> Result<AuthenticateOutcome> {
        let payments = self
            .request_and_list_payments(platform, options.variant_index)
            .await?;
        if let Some(callback) = &options.on_payments_received {
            callback(&payments);
        }

        let Some(auto_prove) = &options.auto_prove else {
            return Ok(AuthenticateOutcome {
                payments,
                proof: None,
            });
        };

        let proof = self.prove_listed(platform, &payments, auto_prove, &options).await;
        match &proof {
            Ok(proved) => {
                debug!(platform, bytes = proved.proof_bytes.len(), "proof assembled");
                if let Some(callback) = &options.on_proof_success {
                    callback(proved);
                }
            }
            Err(err) => {
                warn!(platform, error = %err, "proof phase failed");
                if let Some(callback) = &options.on_proof_error {
                    callback(err);
                }
            }
        }

        Ok(AuthenticateOutcome {
            payments,
            proof: Some(proof),
        })
    }

    async fn prove_listed(
        &self,
        platform: &str,
        payments: &[MetadataEntry],
        auto_prove: &AutoProve,
        options: &AuthenticateOptions,
    ) -> Result<ProvedPayment> {
        let original_index = match auto_prove.original_index {
            Some(index) => index,
            None => payments
                .first()
                .map(|p| p.original_index)
                .ok_or_else(|| RampError::not_found("Payment", platform))?,
        };

        let proofs = self
            .generate_proofs(
                platform,
                auto_prove.intent_hash,
                original_index,
                options.variant_index,
                options.on_proof_progress.clone(),
            )
            .await?;
        let proof_bytes = Self::assemble(&proofs, auto_prove.method_tag)?;
        Ok(ProvedPayment {
            proofs,
            proof_bytes,
        })
    }

    /// Stop listening to the agent and cancel any in-flight proof wait.
    pub async fn dispose(&self) {
        self.flow.dispose();
        self.cache.dispose().await;
        self.transport.dispose();
    }
}

/// Key the catalog, cache and agent all use for `platform`.
fn platform_key(platform: &str) -> String {
    platform.trim().to_ascii_lowercase()
}
