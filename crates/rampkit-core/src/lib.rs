//! # Rampkit Core
//!
//! Core primitives shared by the rampkit crates.
//!
//! This crate provides:
//! - [`Proof`] - an attested off-chain payment
//! - [`codec`] - ABI-exact proof encoding for the on-chain verifier
//! - [`parse_agent_proof`] - normalisation of agent proof payloads
//! - [`PlatformCatalog`] - platform routes and required proof counts
//! - [`RampError`] - error taxonomy

pub mod catalog;
pub mod codec;
pub mod error;
pub mod fulfillment;
pub mod metadata;
pub mod payload;
pub mod proof;

// Re-exports for convenience
pub use catalog::{PlatformCatalog, PlatformMethod};
pub use codec::{
    canonicalize_context, derive_claim_identifier, encode_many, encode_single,
    encode_with_method_tag, ProofBytes,
};
pub use error::{RampError, Result};
pub use fulfillment::{DepositPaymentMethod, FulfillmentInputs};
pub use metadata::{MetadataEntry, MetadataRecord};
pub use payload::parse_agent_proof;
pub use proof::{ClaimInfo, Proof, SignedClaim, SignedClaimData};

pub use alloy_primitives::{Address, Bytes, B256, U256};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::catalog::{PlatformCatalog, PlatformMethod};
    pub use crate::codec::ProofBytes;
    pub use crate::error::{RampError, Result};
    pub use crate::fulfillment::FulfillmentInputs;
    pub use crate::metadata::{MetadataEntry, MetadataRecord};
    pub use crate::proof::{ClaimInfo, Proof, SignedClaim, SignedClaimData};
}
