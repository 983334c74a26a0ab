//! Agent message protocol.
//!
//! Every message is a flat JSON record discriminated by `type`.

use rampkit_core::MetadataEntry;
use serde::{Deserialize, Serialize};

/// Messages sent to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    /// Ask the agent for its version.
    FetchExtensionVersion,

    /// Open the UI surface that collects payment metadata.
    OpenNewTab { action_type: String, platform: String },

    /// Generate one proof for a listed payment.
    GenerateProof {
        platform: String,
        intent_hash: String,
        original_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proof_index: Option<u32>,
    },

    /// Poll the status of a proof request.
    FetchProofById { proof_id: String },
}

/// Messages received from the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    ExtensionVersionResponse { data: VersionData },
    MetadataMessagesResponse { data: MetadataPush },
    FetchProofRequestIdResponse { data: ProofRequestId },
    FetchProofByIdResponse { data: ProofStatusData },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionData {
    pub version: String,
}

/// Payment metadata pushed for one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPush {
    pub platform: String,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
    /// Absolute expiry in epoch milliseconds; 0 never expires.
    #[serde(default)]
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequestId {
    pub proof_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofStatusData {
    pub request_history: RequestHistory,
}

/// Agent-side record of proof requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHistory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notary_request: Option<NotaryRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notary_requests: Vec<NotaryRequest>,
}

impl RequestHistory {
    /// The request this status refers to. Entries carrying a different id
    /// than `proof_id` are never returned; among listed requests an exact id
    /// match wins, else the newest entry without an id.
    pub fn resolve(&self, proof_id: Option<&str>) -> Option<&NotaryRequest> {
        let refers_to = |request: &&NotaryRequest| match (proof_id, request.id.as_deref()) {
            (Some(tracked), Some(id)) => tracked == id,
            _ => true,
        };
        if let Some(request) = &self.notary_request {
            return Some(request).filter(refers_to);
        }
        proof_id
            .and_then(|id| {
                self.notary_requests
                    .iter()
                    .find(|r| r.id.as_deref() == Some(id))
            })
            .or_else(|| self.notary_requests.iter().rev().find(refers_to))
    }
}

/// One proof request as reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotaryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub status: ProofStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl NotaryRequest {
    /// Human-readable error reported by the agent.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "agent reported an error without details".to_string(),
        }
    }
}

/// Status of a proof request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    #[default]
    Pending,
    Success,
    Error,
    /// Any status string we do not know; treated as pending.
    #[serde(other)]
    Unknown,
}

impl ProofStatus {
    /// Returns true if no further status changes are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProofStatus::Success | ProofStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_wire_format() {
        let msg = OutboundMessage::GenerateProof {
            platform: "zelle".into(),
            intent_hash: "0xabc".into(),
            original_index: 2,
            proof_index: Some(1),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "generate_proof",
                "platform": "zelle",
                "intentHash": "0xabc",
                "originalIndex": 2,
                "proofIndex": 1
            })
        );

        let first = OutboundMessage::GenerateProof {
            platform: "wise".into(),
            intent_hash: "0xabc".into(),
            original_index: 0,
            proof_index: None,
        };
        assert!(serde_json::to_value(&first).unwrap().get("proofIndex").is_none());

        assert_eq!(
            serde_json::to_value(OutboundMessage::FetchExtensionVersion).unwrap(),
            json!({"type": "fetch_extension_version"})
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::OpenNewTab {
                action_type: "transfer_wise".into(),
                platform: "wise".into()
            })
            .unwrap(),
            json!({"type": "open_new_tab", "actionType": "transfer_wise", "platform": "wise"})
        );
    }

    #[test]
    fn test_inbound_parsing() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "type": "metadata_messages_response",
            "data": {
                "platform": "wise",
                "metadata": [{"originalIndex": 0, "hidden": false, "amount": "5", "date": "1"}],
                "expiresAt": 1_700_000_000_000i64
            }
        }))
        .unwrap();
        match msg {
            InboundMessage::MetadataMessagesResponse { data } => {
                assert_eq!(data.platform, "wise");
                assert_eq!(data.metadata.len(), 1);
                assert_eq!(data.expires_at, 1_700_000_000_000);
            }
            other => panic!("unexpected {:?}", other),
        }

        let msg: InboundMessage = serde_json::from_value(json!({
            "type": "fetch_proof_request_id_response",
            "data": {"proofId": "p-1"}
        }))
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::FetchProofRequestIdResponse {
                data: ProofRequestId { proof_id: "p-1".into() }
            }
        );
    }

    #[test]
    fn test_status_resolution() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "type": "fetch_proof_by_id_response",
            "data": {"requestHistory": {"notaryRequests": [
                {"id": "a", "status": "error", "error": "boom"},
                {"id": "b", "status": "processing"}
            ]}}
        }))
        .unwrap();
        let InboundMessage::FetchProofByIdResponse { data } = msg else {
            panic!("wrong variant");
        };
        let history = data.request_history;

        let a = history.resolve(Some("a")).unwrap();
        assert_eq!(a.status, ProofStatus::Error);
        assert_eq!(a.error_message(), "boom");

        let newest = history.resolve(None).unwrap();
        assert_eq!(newest.status, ProofStatus::Unknown);
        assert!(!newest.status.is_terminal());

        assert!(history.resolve(Some("zzz")).is_none());
    }

    #[test]
    fn test_single_request_for_other_id_ignored() {
        let history = RequestHistory {
            notary_request: Some(NotaryRequest {
                id: Some("p1".into()),
                status: ProofStatus::Success,
                ..NotaryRequest::default()
            }),
            notary_requests: Vec::new(),
        };
        assert!(history.resolve(Some("p2")).is_none());
        assert_eq!(history.resolve(Some("p1")).map(|r| r.status), Some(ProofStatus::Success));

        let anonymous = RequestHistory {
            notary_request: Some(NotaryRequest {
                status: ProofStatus::Error,
                ..NotaryRequest::default()
            }),
            notary_requests: Vec::new(),
        };
        assert_eq!(anonymous.resolve(Some("p2")).map(|r| r.status), Some(ProofStatus::Error));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = serde_json::from_value::<InboundMessage>(json!({"type": "hello"}));
        assert!(result.is_err());
    }
}
