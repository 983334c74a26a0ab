//! Message channel to the proof-generating agent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rampkit_core::{RampError, Result, B256};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::protocol::{InboundMessage, OutboundMessage};

/// Tracing target for the debug message sink.
pub const AGENT_TARGET: &str = "rampkit::agent";

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Log every message in both directions.
    pub debug: bool,

    /// Capacity of the outbound queue and the inbound fan-out.
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            debug: false,
            channel_capacity: 100,
        }
    }
}

impl TransportConfig {
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Handle used by SDK components to talk to the agent.
///
/// Clones share the same channels. Inbound messages fan out to every
/// subscriber in arrival order.
#[derive(Clone)]
pub struct AgentTransport {
    outbound: mpsc::Sender<OutboundMessage>,
    inbound: broadcast::Sender<InboundMessage>,
    disposed: Arc<AtomicBool>,
    debug: bool,
}

/// The agent's end of the transport.
///
/// Whatever hosts the agent bridge reads outbound requests from here and
/// pushes the agent's replies back in.
pub struct AgentPort {
    outbound: mpsc::Receiver<OutboundMessage>,
    inbound: broadcast::Sender<InboundMessage>,
    disposed: Arc<AtomicBool>,
    debug: bool,
}

impl AgentTransport {
    /// Create a connected transport and agent port.
    pub fn new(config: TransportConfig) -> (Self, AgentPort) {
        let capacity = config.channel_capacity.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, _) = broadcast::channel(capacity);
        let disposed = Arc::new(AtomicBool::new(false));

        let transport = Self {
            outbound: outbound_tx,
            inbound: inbound_tx.clone(),
            disposed: disposed.clone(),
            debug: config.debug,
        };
        let port = AgentPort {
            outbound: outbound_rx,
            inbound: inbound_tx,
            disposed,
            debug: config.debug,
        };

        (transport, port)
    }

    /// Whether the agent can currently be reached.
    pub fn is_available(&self) -> bool {
        !self.disposed.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Ask the agent for its version. The reply arrives as an
    /// [`InboundMessage::ExtensionVersionResponse`].
    pub async fn request_version(&self) -> Result<()> {
        self.send(OutboundMessage::FetchExtensionVersion).await
    }

    /// Open the metadata collection surface for `platform`.
    pub async fn open_collection_surface(&self, action_type: &str, platform: &str) -> Result<()> {
        self.send(OutboundMessage::OpenNewTab {
            action_type: action_type.to_string(),
            platform: platform.to_string(),
        })
        .await
    }

    /// Request a proof for the payment the agent listed at `original_index`.
    ///
    /// `proof_index` is set only for sub-proofs after the first.
    pub async fn request_proof(
        &self,
        platform: &str,
        intent_hash: B256,
        original_index: u32,
        proof_index: Option<u32>,
    ) -> Result<()> {
        self.send(OutboundMessage::GenerateProof {
            platform: platform.to_string(),
            intent_hash: alloy_primitives::hex::encode_prefixed(intent_hash),
            original_index,
            proof_index,
        })
        .await
    }

    /// Ask for the current status of a proof request.
    pub async fn poll_proof(&self, proof_id: &str) -> Result<()> {
        self.send(OutboundMessage::FetchProofById {
            proof_id: proof_id.to_string(),
        })
        .await
    }

    /// Receive every inbound message pushed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }

    /// Stop delivering inbound messages and refuse further sends.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            debug!(target: AGENT_TARGET, "transport disposed");
        }
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RampError::TransportUnavailable(
                "transport has been disposed".to_string(),
            ));
        }
        if self.debug {
            debug!(target: AGENT_TARGET, direction = "outbound", message = ?message);
        }
        self.outbound
            .send(message)
            .await
            .map_err(|_| RampError::TransportUnavailable("agent is not connected".to_string()))
    }
}

impl AgentPort {
    /// Next request sent by the SDK. `None` once every transport handle is dropped.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.outbound.recv().await
    }

    /// Deliver an agent message to all subscribers.
    ///
    /// Returns false if the message was dropped because the transport was
    /// disposed or nobody is listening.
    pub fn push(&self, message: InboundMessage) -> bool {
        if self.disposed.load(Ordering::Acquire) {
            return false;
        }
        if self.debug {
            debug!(target: AGENT_TARGET, direction = "inbound", message = ?message);
        }
        self.inbound.send(message).is_ok()
    }

    /// Deliver a raw JSON message from the agent.
    pub fn push_raw(&self, raw: &str) -> Result<bool> {
        let message: InboundMessage = serde_json::from_str(raw)?;
        Ok(self.push(message))
    }
}

/// Next inbound message, skipping over any lag.
///
/// Returns `None` once the transport is gone.
pub async fn next_inbound(rx: &mut broadcast::Receiver<InboundMessage>) -> Option<InboundMessage> {
    loop {
        match rx.recv().await {
            Ok(message) => return Some(message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(target: AGENT_TARGET, skipped, "inbound listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::VersionData;

    #[tokio::test]
    async fn test_outbound_reaches_port() {
        let (transport, mut port) = AgentTransport::new(TransportConfig::default());
        assert!(transport.is_available());

        transport
            .request_proof("wise", B256::repeat_byte(0xab), 3, None)
            .await
            .unwrap();

        match port.recv().await.unwrap() {
            OutboundMessage::GenerateProof {
                platform,
                intent_hash,
                original_index,
                proof_index,
            } => {
                assert_eq!(platform, "wise");
                assert_eq!(intent_hash, format!("0x{}", "ab".repeat(32)));
                assert_eq!(original_index, 3);
                assert_eq!(proof_index, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inbound_fans_out() {
        let (transport, port) = AgentTransport::new(TransportConfig::default().with_debug(true));
        let mut a = transport.subscribe();
        let mut b = transport.subscribe();

        assert!(port.push_raw(r#"{"type":"extension_version_response","data":{"version":"1.2.0"}}"#).unwrap());

        let expected = InboundMessage::ExtensionVersionResponse {
            data: VersionData {
                version: "1.2.0".into(),
            },
        };
        assert_eq!(next_inbound(&mut a).await.unwrap(), expected);
        assert_eq!(next_inbound(&mut b).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_dispose_stops_traffic() {
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        let _rx = transport.subscribe();

        transport.dispose();
        assert!(!transport.is_available());
        assert!(matches!(
            transport.request_version().await,
            Err(RampError::TransportUnavailable(_))
        ));
        assert!(!port.push(InboundMessage::ExtensionVersionResponse {
            data: VersionData {
                version: "1".into()
            }
        }));
    }

    #[tokio::test]
    async fn test_unavailable_without_agent() {
        let (transport, port) = AgentTransport::new(TransportConfig::default());
        drop(port);
        assert!(!transport.is_available());
        assert!(matches!(
            transport.poll_proof("p").await,
            Err(RampError::TransportUnavailable(_))
        ));
    }

    #[test]
    fn test_malformed_raw_message() {
        let (_transport, port) = AgentTransport::new(TransportConfig::default());
        assert!(matches!(
            port.push_raw("{\"type\":\"nope\"}"),
            Err(RampError::Serialization(_))
        ));
    }
}
