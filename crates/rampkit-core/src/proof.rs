//! Payment proof data model.
//!
//! A [`Proof`] is an attestation produced by the agent (or supplied directly by a
//! caller) that an off-chain payment happened. It is immutable once built and
//! encodes deterministically through [`crate::codec`].

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// The provider-specific assertion being attested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimInfo {
    /// Provider name (e.g. "http").
    pub provider: String,

    /// Provider parameters, usually JSON.
    pub parameters: String,

    /// Extra context, usually JSON. May be empty.
    #[serde(default)]
    pub context: String,
}

/// Fixed-size claim fields covered by the attestor signatures.
///
/// `timestamp_s` and `epoch` are carried as signed integers so that values the
/// agent reports out of range are preserved until encoding rejects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedClaimData {
    pub identifier: B256,
    pub owner: Address,
    pub timestamp_s: i64,
    pub epoch: i64,
}

/// Claim data plus the ordered attestor signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedClaim {
    pub claim: SignedClaimData,
    pub signatures: Vec<Bytes>,
}

/// A complete payment proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    pub claim_info: ClaimInfo,
    pub signed_claim: SignedClaim,
    #[serde(default)]
    pub is_appclip_proof: bool,
}

impl Proof {
    /// Build a proof from its parts.
    pub fn new(claim_info: ClaimInfo, signed_claim: SignedClaim) -> Self {
        Self {
            claim_info,
            signed_claim,
            is_appclip_proof: false,
        }
    }

    /// Mark the proof as produced by an app clip.
    pub fn with_appclip(mut self, is_appclip_proof: bool) -> Self {
        self.is_appclip_proof = is_appclip_proof;
        self
    }

    /// A proof without signatures, or with an empty one, cannot be verified on-chain.
    pub fn is_usable(&self) -> bool {
        let signatures = &self.signed_claim.signatures;
        !signatures.is_empty() && signatures.iter().all(|s| !s.is_empty())
    }
}
