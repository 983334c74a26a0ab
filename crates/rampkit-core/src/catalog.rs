//! Static platform catalog.
//!
//! Maps a payment platform (and optional variant index) to the action the agent
//! must open and the number of sub-proofs a payment on that route needs.

use serde::{Deserialize, Serialize};

use crate::error::{RampError, Result};

/// How one platform variant is proven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformMethod {
    /// Action the agent opens to collect payment metadata.
    pub action_identifier: String,

    /// Variant name (the platform itself for single-variant platforms).
    pub variant_identifier: String,

    /// Number of sub-proofs one payment requires. Always >= 1.
    pub required_proof_count: u32,
}

struct Variant {
    id: &'static str,
    action: &'static str,
    proofs: u32,
}

struct Platform {
    id: &'static str,
    variants: &'static [Variant],
}

static PLATFORMS: &[Platform] = &[
    Platform {
        id: "venmo",
        variants: &[Variant { id: "venmo", action: "transfer_venmo", proofs: 1 }],
    },
    Platform {
        id: "cashapp",
        variants: &[Variant { id: "cashapp", action: "transfer_cashapp", proofs: 1 }],
    },
    Platform {
        id: "revolut",
        variants: &[Variant { id: "revolut", action: "transfer_revolut", proofs: 1 }],
    },
    Platform {
        id: "wise",
        variants: &[Variant { id: "wise", action: "transfer_wise", proofs: 1 }],
    },
    Platform {
        id: "mercadopago",
        variants: &[Variant { id: "mercadopago", action: "transfer_mercadopago", proofs: 1 }],
    },
    Platform {
        id: "paypal",
        variants: &[Variant { id: "paypal", action: "transfer_paypal", proofs: 1 }],
    },
    Platform {
        id: "monzo",
        variants: &[Variant { id: "monzo", action: "transfer_monzo", proofs: 1 }],
    },
    Platform {
        id: "zelle",
        variants: &[
            Variant { id: "citi", action: "transfer_zelle", proofs: 1 },
            Variant { id: "chase", action: "transfer_zelle", proofs: 2 },
            Variant { id: "bofa", action: "transfer_zelle", proofs: 1 },
        ],
    },
];

/// Lookup over the built-in platform table.
pub struct PlatformCatalog;

impl PlatformCatalog {
    /// Resolve a platform route. `variant_index` defaults to 0.
    pub fn resolve(platform: &str, variant_index: Option<usize>) -> Result<PlatformMethod> {
        let index = variant_index.unwrap_or(0);
        let entry = Self::find(platform)?;
        let variant = entry.variants.get(index).ok_or_else(|| {
            RampError::validation(format!(
                "platform '{}' has {} variant(s); index {} is out of range",
                entry.id,
                entry.variants.len(),
                index
            ))
        })?;

        Ok(PlatformMethod {
            action_identifier: variant.action.to_string(),
            variant_identifier: variant.id.to_string(),
            required_proof_count: variant.proofs,
        })
    }

    /// All known platform identifiers.
    pub fn platforms() -> Vec<&'static str> {
        PLATFORMS.iter().map(|p| p.id).collect()
    }

    /// Variant identifiers for one platform, in index order.
    pub fn variants(platform: &str) -> Result<Vec<&'static str>> {
        Ok(Self::find(platform)?.variants.iter().map(|v| v.id).collect())
    }

    fn find(platform: &str) -> Result<&'static Platform> {
        let wanted = platform.trim().to_ascii_lowercase();
        PLATFORMS
            .iter()
            .find(|p| p.id == wanted)
            .ok_or_else(|| RampError::validation(format!("unknown platform '{}'", platform)))
    }
}
