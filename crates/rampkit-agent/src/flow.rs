//! Proof generation flow.
//!
//! Drives one payment through request, proof-id wait and status polling for
//! each of its sub-proofs, strictly in order.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rampkit_core::{parse_agent_proof, Proof, RampError, Result, B256};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::protocol::{InboundMessage, NotaryRequest, ProofStatus};
use crate::transport::{next_inbound, AgentTransport};

/// Timing for the proof flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// How long to wait for the agent to assign a proof id.
    pub id_timeout_ms: u64,

    /// Delay between status polls.
    pub poll_interval_ms: u64,

    /// How long to poll before giving up, counted from the first poll.
    pub poll_timeout_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            id_timeout_ms: 60_000,
            poll_interval_ms: 3_000,
            poll_timeout_ms: 60_000,
        }
    }
}

impl FlowConfig {
    pub fn id_timeout(&self) -> Duration {
        Duration::from_millis(self.id_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn with_id_timeout_ms(mut self, ms: u64) -> Self {
        self.id_timeout_ms = ms;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_poll_timeout_ms(mut self, ms: u64) -> Self {
        self.poll_timeout_ms = ms;
        self
    }
}

/// State of the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Nothing requested yet.
    Idle,
    /// Proof request handed to the agent.
    RequestSent,
    /// Waiting for the agent to assign a proof id.
    AwaitingId,
    /// Polling the proof status.
    Polling,
    /// All sub-proofs collected.
    Success,
    /// The last call failed.
    Error,
}

/// Progress stage reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStage {
    WaitingProofId,
    PollingProof,
    ProofSuccess,
    ProofError,
}

/// One progress notification.
#[derive(Debug, Clone)]
pub struct ProofProgress {
    pub stage: ProofStage,

    /// Zero-based sub-proof index.
    pub proof_index: u32,

    pub proof_id: Option<String>,

    /// Set on [`ProofStage::ProofSuccess`].
    pub proof: Option<Proof>,

    /// Set on [`ProofStage::ProofError`].
    pub error: Option<RampError>,
}

impl ProofProgress {
    fn at(stage: ProofStage, proof_index: u32) -> Self {
        Self {
            stage,
            proof_index,
            proof_id: None,
            proof: None,
            error: None,
        }
    }
}

/// Progress callback.
pub type ProgressCallback = Arc<dyn Fn(&ProofProgress) + Send + Sync>;

/// What to prove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRequest {
    pub platform: String,
    pub intent_hash: B256,

    /// The agent's index of the payment to prove.
    pub original_index: u32,

    /// Number of sub-proofs to collect.
    pub required_count: u32,
}

/// Per-call proof state machine over an [`AgentTransport`].
///
/// One call at a time: a second concurrent [`ProofFlow::generate_proofs`]
/// fails with [`RampError::Busy`].
pub struct ProofFlow {
    transport: AgentTransport,
    config: FlowConfig,
    state: Arc<RwLock<FlowState>>,
    proof_id: Arc<watch::Sender<Option<String>>>,
    status: Arc<watch::Sender<Option<NotaryRequest>>>,
    in_flight: AtomicBool,
    shutdown: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ProofFlow {
    /// Create a flow and start listening to the transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: AgentTransport, config: FlowConfig) -> Self {
        let proof_id = Arc::new(watch::Sender::new(None::<String>));
        let status = Arc::new(watch::Sender::new(None::<NotaryRequest>));
        let (shutdown, _) = watch::channel(false);

        let mut rx = transport.subscribe();
        let listener = {
            let proof_id = proof_id.clone();
            let status = status.clone();
            tokio::spawn(async move {
                while let Some(message) = next_inbound(&mut rx).await {
                    match message {
                        InboundMessage::FetchProofRequestIdResponse { data } => {
                            proof_id.send_replace(Some(data.proof_id));
                        }
                        InboundMessage::FetchProofByIdResponse { data } => {
                            // Late replies for an earlier sub-proof must not
                            // land on the current one.
                            let Some(tracked) = proof_id.borrow().clone() else {
                                continue;
                            };
                            if let Some(request) = data.request_history.resolve(Some(&tracked)) {
                                status.send_replace(Some(request.clone()));
                            }
                        }
                        _ => {}
                    }
                }
            })
        };

        Self {
            transport,
            config,
            state: Arc::new(RwLock::new(FlowState::Idle)),
            proof_id,
            status,
            in_flight: AtomicBool::new(false),
            shutdown,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Get the current state.
    pub async fn state(&self) -> FlowState {
        *self.state.read().await
    }

    /// The proof id most recently assigned by the agent.
    pub fn last_proof_id(&self) -> Option<String> {
        self.proof_id.borrow().clone()
    }

    pub fn is_disposed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Collect `request.required_count` proofs, in sub-proof order.
    ///
    /// Any sub-proof failure fails the whole call; no partial list is returned.
    pub async fn generate_proofs(
        &self,
        request: &ProofRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<Proof>> {
        if request.required_count == 0 {
            return Err(RampError::validation("required proof count must be at least 1"));
        }
        if self.is_disposed() {
            return Err(RampError::Cancelled("proof flow has been disposed".to_string()));
        }
        if !self.transport.is_available() {
            return Err(RampError::TransportUnavailable(
                "agent is not connected".to_string(),
            ));
        }
        let _guard = InFlightGuard::acquire(&self.in_flight)?;

        info!(
            platform = %request.platform,
            original_index = request.original_index,
            required = request.required_count,
            "generating proofs"
        );

        let mut proofs = Vec::with_capacity(request.required_count as usize);
        for index in 0..request.required_count {
            match self.generate_one(request, index, on_progress.as_ref()).await {
                Ok(proof) => {
                    emit(
                        on_progress.as_ref(),
                        ProofProgress {
                            proof_id: self.last_proof_id(),
                            proof: Some(proof.clone()),
                            ..ProofProgress::at(ProofStage::ProofSuccess, index)
                        },
                    );
                    proofs.push(proof);
                }
                Err(err) => {
                    warn!(proof_index = index, error = %err, "proof generation failed");
                    self.set_state(FlowState::Error).await;
                    emit(
                        on_progress.as_ref(),
                        ProofProgress {
                            proof_id: self.last_proof_id(),
                            error: Some(err.clone()),
                            ..ProofProgress::at(ProofStage::ProofError, index)
                        },
                    );
                    return Err(err);
                }
            }
        }

        self.set_state(FlowState::Success).await;
        Ok(proofs)
    }

    /// Stop listening and cancel any in-flight wait.
    pub fn dispose(&self) {
        self.shutdown.send_replace(true);
        self.detach_listener();
    }

    async fn generate_one(
        &self,
        request: &ProofRequest,
        index: u32,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Proof> {
        // Forget the previous sub-proof before asking for the next one.
        self.proof_id.send_replace(None);
        self.status.send_replace(None);

        let proof_index = (index > 0).then_some(index);
        self.transport
            .request_proof(
                &request.platform,
                request.intent_hash,
                request.original_index,
                proof_index,
            )
            .await?;
        self.set_state(FlowState::RequestSent).await;

        self.set_state(FlowState::AwaitingId).await;
        emit(on_progress, ProofProgress::at(ProofStage::WaitingProofId, index));
        let proof_id = self.wait_for_proof_id().await?;
        debug!(proof_index = index, proof_id = %proof_id, "proof id assigned");

        self.set_state(FlowState::Polling).await;
        emit(
            on_progress,
            ProofProgress {
                proof_id: Some(proof_id.clone()),
                ..ProofProgress::at(ProofStage::PollingProof, index)
            },
        );
        let finished = self.poll_until_terminal(&proof_id).await?;

        match finished.status {
            ProofStatus::Success => {
                let payload = finished.proof.as_ref().ok_or_else(|| {
                    RampError::proof_generation("agent reported success without a proof")
                })?;
                parse_agent_proof(payload).map_err(|err| {
                    RampError::proof_generation(format!("unusable proof payload: {}", err))
                })
            }
            _ => Err(RampError::proof_generation(finished.error_message())),
        }
    }

    async fn wait_for_proof_id(&self) -> Result<String> {
        let timeout = self.config.id_timeout();
        let mut rx = self.proof_id.subscribe();

        let waited = self
            .cancellable(async {
                let assigned = tokio::time::timeout(timeout, async {
                    rx.wait_for(|id| id.as_deref().is_some_and(|s| !s.is_empty()))
                        .await
                        .map(|id| id.clone())
                })
                .await;
                match assigned {
                    Ok(Ok(id)) => Ok(id),
                    Ok(Err(_)) => Err(RampError::Cancelled("proof flow dropped".to_string())),
                    Err(_) => Err(RampError::Timeout {
                        duration_ms: self.config.id_timeout_ms,
                        message: "agent did not assign a proof id".to_string(),
                    }),
                }
            })
            .await?;

        waited.ok_or_else(|| RampError::proof_generation("empty proof id"))
    }

    async fn poll_until_terminal(&self, proof_id: &str) -> Result<NotaryRequest> {
        let interval = self.config.poll_interval();
        let deadline = Instant::now() + self.config.poll_timeout();

        loop {
            self.transport.poll_proof(proof_id).await?;
            self.cancellable(async {
                tokio::time::sleep(interval).await;
                Ok(())
            })
            .await?;

            let latest = self.status.borrow().clone();
            if let Some(request) = latest {
                if request.status.is_terminal() {
                    return Ok(request);
                }
            }
            if Instant::now() >= deadline {
                return Err(RampError::Timeout {
                    duration_ms: self.config.poll_timeout_ms,
                    message: format!("proof {} did not finish", proof_id),
                });
            }
        }
    }

    /// Run `fut` unless the flow is disposed first.
    async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            result = fut => result,
            _ = async { let _ = shutdown.wait_for(|disposed| *disposed).await; } => {
                Err(RampError::Cancelled("proof flow disposed while waiting".to_string()))
            }
        }
    }

    async fn set_state(&self, next: FlowState) {
        *self.state.write().await = next;
    }

    fn detach_listener(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for ProofFlow {
    fn drop(&mut self) {
        self.detach_listener();
    }
}

fn emit(callback: Option<&ProgressCallback>, progress: ProofProgress) {
    debug!(stage = ?progress.stage, proof_index = progress.proof_index, "proof progress");
    if let Some(callback) = callback {
        callback(&progress);
    }
}

/// Marks the flow busy for the lifetime of one call.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(RampError::Busy);
        }
        Ok(Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAgent, MockScript, ProofOutcome};
    use crate::protocol::OutboundMessage;
    use crate::transport::TransportConfig;

    fn fast_config() -> FlowConfig {
        FlowConfig::default()
            .with_id_timeout_ms(500)
            .with_poll_interval_ms(10)
            .with_poll_timeout_ms(500)
    }

    fn request(required_count: u32) -> ProofRequest {
        ProofRequest {
            platform: "zelle".into(),
            intent_hash: B256::repeat_byte(7),
            original_index: 4,
            required_count,
        }
    }

    #[tokio::test]
    async fn test_two_sub_proofs_in_order() {
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        let agent = MockAgent::spawn(port, MockScript::default().with_pending_polls(1));
        let flow = ProofFlow::new(transport, fast_config());

        let stages = Arc::new(Mutex::new(Vec::new()));
        let recorder = stages.clone();
        let on_progress: ProgressCallback = Arc::new(move |p: &ProofProgress| {
            recorder.lock().unwrap().push((p.stage, p.proof_index));
        });

        let proofs = flow.generate_proofs(&request(2), Some(on_progress)).await.unwrap();
        assert_eq!(proofs.len(), 2);
        assert!(proofs[0].claim_info.parameters.contains("\"proofIndex\":0"));
        assert!(proofs[1].claim_info.parameters.contains("\"proofIndex\":1"));
        assert_eq!(flow.state().await, FlowState::Success);

        let requests = agent.proof_requests();
        assert_eq!(requests.len(), 2);
        match (&requests[0], &requests[1]) {
            (
                OutboundMessage::GenerateProof { proof_index: first, original_index, .. },
                OutboundMessage::GenerateProof { proof_index: second, .. },
            ) => {
                assert_eq!(*original_index, 4);
                assert_eq!(*first, None);
                assert_eq!(*second, Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }

        let stages = stages.lock().unwrap().clone();
        assert_eq!(
            stages,
            vec![
                (ProofStage::WaitingProofId, 0),
                (ProofStage::PollingProof, 0),
                (ProofStage::ProofSuccess, 0),
                (ProofStage::WaitingProofId, 1),
                (ProofStage::PollingProof, 1),
                (ProofStage::ProofSuccess, 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_late_status_replies_stay_with_their_sub_proof() {
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        let _agent = MockAgent::spawn(port, MockScript::default().with_status_delay_ms(15));
        let flow = ProofFlow::new(transport, fast_config());

        let proofs = flow.generate_proofs(&request(2), None).await.unwrap();
        assert_eq!(proofs.len(), 2);
        assert!(proofs[0].claim_info.parameters.contains("\"proofIndex\":0"));
        assert!(proofs[1].claim_info.parameters.contains("\"proofIndex\":1"));
    }

    #[tokio::test]
    async fn test_agent_error_fails_whole_call() {
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        let _agent = MockAgent::spawn(
            port,
            MockScript::default().with_outcomes(vec![
                ProofOutcome::Success,
                ProofOutcome::Error("session expired".into()),
            ]),
        );
        let flow = ProofFlow::new(transport, fast_config());

        let err = flow.generate_proofs(&request(2), None).await.unwrap_err();
        match err {
            RampError::ProofGeneration { message } => assert!(message.contains("session expired")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(flow.state().await, FlowState::Error);
    }

    #[tokio::test]
    async fn test_missing_proof_id_times_out() {
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        let _agent = MockAgent::spawn(port, MockScript::default().with_outcomes(vec![ProofOutcome::NoId]));
        let flow = ProofFlow::new(transport, fast_config().with_id_timeout_ms(50));

        let err = flow.generate_proofs(&request(1), None).await.unwrap_err();
        assert!(matches!(err, RampError::Timeout { duration_ms: 50, .. }));
    }

    #[tokio::test]
    async fn test_polling_times_out() {
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        let _agent = MockAgent::spawn(port, MockScript::default().with_outcomes(vec![ProofOutcome::Pending]));
        let flow = ProofFlow::new(transport, fast_config().with_poll_timeout_ms(60));

        let err = flow.generate_proofs(&request(1), None).await.unwrap_err();
        assert!(matches!(err, RampError::Timeout { duration_ms: 60, .. }));
    }

    #[tokio::test]
    async fn test_unparseable_success_payload() {
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        let _agent = MockAgent::spawn(
            port,
            MockScript::default().with_outcomes(vec![ProofOutcome::Payload(serde_json::json!({"junk": true}))]),
        );
        let flow = ProofFlow::new(transport, fast_config());

        let err = flow.generate_proofs(&request(1), None).await.unwrap_err();
        assert!(matches!(err, RampError::ProofGeneration { .. }));
    }

    #[tokio::test]
    async fn test_unsigned_success_payload_rejected() {
        let mut unsigned = crate::mock::sample_agent_proof("0x07", 4, 0);
        unsigned["signatures"] = serde_json::json!([]);
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        let _agent = MockAgent::spawn(
            port,
            MockScript::default().with_outcomes(vec![ProofOutcome::Payload(unsigned)]),
        );
        let flow = ProofFlow::new(transport, fast_config());

        let err = flow.generate_proofs(&request(1), None).await.unwrap_err();
        match err {
            RampError::ProofGeneration { message } => assert!(message.contains("no signatures")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unavailable_transport() {
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        drop(port);
        let flow = ProofFlow::new(transport, fast_config());

        let err = flow.generate_proofs(&request(1), None).await.unwrap_err();
        assert!(matches!(err, RampError::TransportUnavailable(_)));
        assert_eq!(flow.state().await, FlowState::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_call_is_busy() {
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        let _agent = MockAgent::spawn(port, MockScript::default().with_outcomes(vec![ProofOutcome::Pending]));
        let flow = Arc::new(ProofFlow::new(transport, fast_config().with_poll_timeout_ms(300)));

        let first = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.generate_proofs(&request(1), None).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = flow.generate_proofs(&request(1), None).await;
        assert!(matches!(second, Err(RampError::Busy)));

        let first = first.await.unwrap();
        assert!(matches!(first, Err(RampError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_dispose_cancels_wait() {
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        let _agent = MockAgent::spawn(port, MockScript::default().with_outcomes(vec![ProofOutcome::NoId]));
        let flow = Arc::new(ProofFlow::new(transport, fast_config().with_id_timeout_ms(5_000)));

        let call = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.generate_proofs(&request(1), None).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        flow.dispose();

        let result = call.await.unwrap();
        assert!(matches!(result, Err(RampError::Cancelled(_))));
        assert!(matches!(
            flow.generate_proofs(&request(1), None).await,
            Err(RampError::Cancelled(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_required_count() {
        let (transport, _port) = AgentTransport::new(TransportConfig::default());
        let flow = ProofFlow::new(transport, fast_config());
        assert!(matches!(
            flow.generate_proofs(&request(0), None).await,
            Err(RampError::Validation { .. })
        ));
    }
}
