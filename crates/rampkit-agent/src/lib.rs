//! # Rampkit Agent
//!
//! Messaging with the browser agent that collects payment metadata and
//! generates proofs.
//!
//! This crate provides:
//! - [`AgentTransport`] - typed request/response channel to the agent
//! - [`ProofFlow`] - request, wait and poll state machine for proofs
//! - [`protocol`] - the agent wire messages

pub mod flow;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod protocol;
pub mod transport;

pub use flow::{
    FlowConfig, FlowState, ProgressCallback, ProofFlow, ProofProgress, ProofRequest, ProofStage,
};
pub use protocol::{InboundMessage, MetadataPush, NotaryRequest, OutboundMessage, ProofStatus};
pub use transport::{next_inbound, AgentPort, AgentTransport, TransportConfig, AGENT_TARGET};
