//! Scripted in-process agent for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::protocol::{
    InboundMessage, MetadataPush, NotaryRequest, OutboundMessage, ProofRequestId, ProofStatus,
    ProofStatusData, RequestHistory, VersionData,
};
use crate::transport::AgentPort;

/// How the mock answers one proof request.
#[derive(Debug, Clone, PartialEq)]
pub enum ProofOutcome {
    /// Report a well-formed agent proof.
    Success,
    /// Report success with this payload.
    Payload(Value),
    /// Report an error.
    Error(String),
    /// Stay pending forever.
    Pending,
    /// Never assign a proof id.
    NoId,
}

/// Script for a [`MockAgent`].
#[derive(Debug, Clone)]
pub struct MockScript {
    pub version: String,

    /// Metadata pushed when the collection surface opens, keyed by platform.
    pub metadata: HashMap<String, (Value, i64)>,

    /// Outcomes for successive proof requests; [`ProofOutcome::Success`] once exhausted.
    pub outcomes: VecDeque<ProofOutcome>,

    /// Polls answered with `pending` before the outcome is reported.
    pub pending_polls: u32,

    /// Delay before answering each status poll.
    pub status_delay_ms: u64,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            version: "0.0.0-mock".to_string(),
            metadata: HashMap::new(),
            outcomes: VecDeque::new(),
            pending_polls: 0,
            status_delay_ms: 0,
        }
    }
}

impl MockScript {
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Push `entries` for `platform` whenever its surface is opened.
    pub fn with_metadata(mut self, platform: impl Into<String>, entries: Value, expires_at_ms: i64) -> Self {
        self.metadata.insert(platform.into(), (entries, expires_at_ms));
        self
    }

    pub fn with_outcomes(mut self, outcomes: Vec<ProofOutcome>) -> Self {
        self.outcomes = outcomes.into();
        self
    }

    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    pub fn with_status_delay_ms(mut self, ms: u64) -> Self {
        self.status_delay_ms = ms;
        self
    }
}

struct ActiveProof {
    outcome: ProofOutcome,
    payload: Value,
    polls: u32,
}

/// Agent double that answers over an [`AgentPort`] and records what it was sent.
pub struct MockAgent {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    handle: JoinHandle<()>,
}

impl MockAgent {
    /// Serve `port` until every transport handle is dropped.
    pub fn spawn(mut port: AgentPort, mut script: MockScript) -> Self {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();

        let handle = tokio::spawn(async move {
            let mut proofs: HashMap<String, ActiveProof> = HashMap::new();
            let mut counter = 0u32;

            while let Some(message) = port.recv().await {
                if let Ok(mut log) = log.lock() {
                    log.push(message.clone());
                }

                match message {
                    OutboundMessage::FetchExtensionVersion => {
                        port.push(InboundMessage::ExtensionVersionResponse {
                            data: VersionData {
                                version: script.version.clone(),
                            },
                        });
                    }
                    OutboundMessage::OpenNewTab { platform, .. } => {
                        if let Some((entries, expires_at)) = script.metadata.get(&platform) {
                            if let Ok(metadata) = serde_json::from_value(entries.clone()) {
                                port.push(InboundMessage::MetadataMessagesResponse {
                                    data: MetadataPush {
                                        platform,
                                        metadata,
                                        expires_at: *expires_at,
                                    },
                                });
                            }
                        }
                    }
                    OutboundMessage::GenerateProof {
                        intent_hash,
                        original_index,
                        proof_index,
                        ..
                    } => {
                        counter += 1;
                        let id = format!("proof-{}", counter);
                        let outcome = script.outcomes.pop_front().unwrap_or(ProofOutcome::Success);
                        let payload = match &outcome {
                            ProofOutcome::Payload(payload) => payload.clone(),
                            _ => sample_agent_proof(&intent_hash, original_index, proof_index.unwrap_or(0)),
                        };
                        let assign = outcome != ProofOutcome::NoId;
                        proofs.insert(
                            id.clone(),
                            ActiveProof {
                                outcome,
                                payload,
                                polls: 0,
                            },
                        );
                        if assign {
                            port.push(InboundMessage::FetchProofRequestIdResponse {
                                data: ProofRequestId { proof_id: id },
                            });
                        }
                    }
                    OutboundMessage::FetchProofById { proof_id } => {
                        let Some(active) = proofs.get_mut(&proof_id) else {
                            continue;
                        };
                        active.polls += 1;

                        let mut request = NotaryRequest {
                            id: Some(proof_id.clone()),
                            ..NotaryRequest::default()
                        };
                        if active.polls > script.pending_polls {
                            match &active.outcome {
                                ProofOutcome::Success | ProofOutcome::Payload(_) => {
                                    request.status = ProofStatus::Success;
                                    request.proof = Some(active.payload.clone());
                                }
                                ProofOutcome::Error(message) => {
                                    request.status = ProofStatus::Error;
                                    request.error = Some(Value::String(message.clone()));
                                }
                                ProofOutcome::Pending | ProofOutcome::NoId => {}
                            }
                        }

                        if script.status_delay_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(script.status_delay_ms)).await;
                        }
                        port.push(InboundMessage::FetchProofByIdResponse {
                            data: ProofStatusData {
                                request_history: RequestHistory {
                                    notary_request: Some(request),
                                    notary_requests: Vec::new(),
                                },
                            },
                        });
                    }
                }
            }
        });

        Self { sent, handle }
    }

    /// Every message received so far.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Proof requests received so far.
    pub fn proof_requests(&self) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|m| matches!(m, OutboundMessage::GenerateProof { .. }))
            .collect()
    }
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A well-formed proof in the agent's own shape.
///
/// The request coordinates are embedded in `parameters` so tests can tell
/// sub-proofs apart.
pub fn sample_agent_proof(intent_hash: &str, original_index: u32, proof_index: u32) -> Value {
    let parameters = json!({
        "intentHash": intent_hash,
        "originalIndex": original_index,
        "proofIndex": proof_index,
    });
    json!({
        "claim": {
            "provider": "http",
            "parameters": parameters.to_string(),
            "context": {"extractedParameters": {"paymentIndex": original_index.to_string()}},
            "identifier": format!("0x{}", "11".repeat(32)),
            "owner": format!("0x{}", "22".repeat(20)),
            "timestampS": 1_700_000_000,
            "epoch": 1
        },
        "signatures": {
            "claimSignature": (0..65).map(|i| (i as u8).wrapping_mul(3)).collect::<Vec<u8>>()
        }
    })
}
