//! ABI codec for payment proofs.
//!
//! The verifier contract consumes proofs as the tuple
//! `(ClaimInfo claimInfo, SignedClaim signedClaim, bool isAppclipProof)` using the
//! standard head/tail ABI layout. Several proofs are laid out as consecutive
//! call parameters, and a payment-method tag may be prepended with tight
//! (unpadded) packing.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{hex, keccak256, Bytes, B256, U256};
use alloy_sol_types::SolType;
use serde::{Deserialize, Serialize};

use crate::error::{RampError, Result};
use crate::proof::{ClaimInfo, Proof};

mod abi {
    alloy_sol_types::sol! {
        #[derive(Debug, PartialEq, Eq)]
        struct ClaimInfo {
            string provider;
            string parameters;
            string context;
        }

        #[derive(Debug, PartialEq, Eq)]
        struct CompleteClaimData {
            bytes32 identifier;
            address owner;
            uint32 timestampS;
            uint32 epoch;
        }

        #[derive(Debug, PartialEq, Eq)]
        struct SignedClaim {
            CompleteClaimData claim;
            bytes[] signatures;
        }

        #[derive(Debug, PartialEq, Eq)]
        struct ReclaimProof {
            ClaimInfo claimInfo;
            SignedClaim signedClaim;
            bool isAppclipProof;
        }
    }
}

const WORD: usize = 32;

/// Canonical encoded proof bytes, rendered as `0x`-prefixed hex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofBytes(Bytes);

impl ProofBytes {
    /// Raw bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unwrap into the underlying byte buffer.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Vec<u8>> for ProofBytes {
    fn from(bytes: Vec<u8>) -> Self {
        ProofBytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for ProofBytes {
    fn from(bytes: Bytes) -> Self {
        ProofBytes(bytes)
    }
}

impl fmt::Display for ProofBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_prefixed(self.as_slice()))
    }
}

impl FromStr for ProofBytes {
    type Err = RampError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s
            .strip_prefix("0x")
            .ok_or_else(|| RampError::validation("proof bytes must be 0x-prefixed hex"))?;
        let bytes = hex::decode(raw)
            .map_err(|e| RampError::validation(format!("invalid proof hex: {}", e)))?;
        Ok(ProofBytes::from(bytes))
    }
}

fn to_u32(field: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        RampError::validation(format!(
            "{} {} is outside the uint32 range 0..={}",
            field,
            value,
            u32::MAX
        ))
    })
}

fn to_abi(proof: &Proof) -> Result<abi::ReclaimProof> {
    let claim = &proof.signed_claim.claim;
    let timestamp_s = to_u32("timestampS", claim.timestamp_s)?;
    let epoch = to_u32("epoch", claim.epoch)?;

    Ok(abi::ReclaimProof {
        claimInfo: abi::ClaimInfo {
            provider: proof.claim_info.provider.clone(),
            parameters: proof.claim_info.parameters.clone(),
            context: proof.claim_info.context.clone(),
        },
        signedClaim: abi::SignedClaim {
            claim: abi::CompleteClaimData {
                identifier: claim.identifier,
                owner: claim.owner,
                timestampS: timestamp_s,
                epoch,
            },
            signatures: proof.signed_claim.signatures.clone(),
        },
        isAppclipProof: proof.is_appclip_proof,
    })
}

/// Encode one proof as `abi.encode(proof)`.
pub fn encode_single(proof: &Proof) -> Result<ProofBytes> {
    let value = to_abi(proof)?;
    Ok(ProofBytes::from(<abi::ReclaimProof as SolType>::abi_encode(
        &value,
    )))
}

/// Encode proofs as consecutive parameters, i.e. `abi.encode(p1, p2, ...)`.
///
/// Every proof is validated before any bytes are produced.
pub fn encode_many(proofs: &[Proof]) -> Result<ProofBytes> {
    if proofs.is_empty() {
        return Err(RampError::validation("at least one proof is required"));
    }

    let values = proofs.iter().map(to_abi).collect::<Result<Vec<_>>>()?;

    // A lone dynamic tuple encodes as [offset = 0x20][tail]; keep the tails.
    let tails: Vec<Vec<u8>> = values
        .iter()
        .map(|value| {
            let mut encoded = <abi::ReclaimProof as SolType>::abi_encode(value);
            encoded.drain(..WORD);
            encoded
        })
        .collect();

    let total = WORD * tails.len() + tails.iter().map(Vec::len).sum::<usize>();
    let mut out = Vec::with_capacity(total);

    let mut offset = WORD * tails.len();
    for tail in &tails {
        out.extend_from_slice(&U256::from(offset).to_be_bytes::<WORD>());
        offset += tail.len();
    }
    for tail in tails {
        out.extend_from_slice(&tail);
    }

    Ok(ProofBytes::from(out))
}

/// Tightly pack `(uint8 methodTag, bytes proof)`: one tag byte, then the proof bytes.
pub fn encode_with_method_tag(proof: &ProofBytes, method_tag: u8) -> ProofBytes {
    let mut out = Vec::with_capacity(proof.len() + 1);
    out.push(method_tag);
    out.extend_from_slice(proof.as_slice());
    ProofBytes::from(out)
}

/// Normalise a JSON context string: object keys sorted, no insignificant whitespace.
///
/// An empty (or all-whitespace) context stays empty.
pub fn canonicalize_context(context: &str) -> Result<String> {
    if context.trim().is_empty() {
        return Ok(String::new());
    }

    let value: serde_json::Value = serde_json::from_str(context)
        .map_err(|e| RampError::validation(format!("claim context is not valid JSON: {}", e)))?;

    Ok(sorted(value).to_string())
}

fn sorted(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sorted).collect())
        }
        other => other,
    }
}

/// Keccak-256 of `"{provider}\n{parameters}\n{canonical context}"`.
pub fn derive_claim_identifier(claim_info: &ClaimInfo) -> Result<B256> {
    let context = canonicalize_context(&claim_info.context)?;
    let preimage = format!(
        "{}\n{}\n{}",
        claim_info.provider, claim_info.parameters, context
    );
    Ok(keccak256(preimage.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::{SignedClaim, SignedClaimData};
    use alloy_primitives::Address;
    use sha2::{Digest, Sha256};

    fn proof_with(provider: &str, timestamp_s: i64, epoch: i64) -> Proof {
        Proof::new(
            ClaimInfo {
                provider: provider.into(),
                parameters: "{\"method\":\"GET\"}".into(),
                context: "{\"contextAddress\":\"0x0\"}".into(),
            },
            SignedClaim {
                claim: SignedClaimData {
                    identifier: B256::repeat_byte(0x42),
                    owner: Address::repeat_byte(0x07),
                    timestamp_s,
                    epoch,
                },
                signatures: vec![Bytes::from(vec![0x1b; 65]), Bytes::from(vec![0x1c; 3])],
            },
        )
    }

    fn word(bytes: &[u8], at: usize) -> U256 {
        U256::from_be_slice(&bytes[at..at + WORD])
    }

    #[test]
    fn test_encode_single_deterministic() {
        let proof = proof_with("http", 1_700_000_000, 1);
        let a = encode_single(&proof).unwrap();
        let b = encode_single(&proof.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len() % WORD, 0);
    }

    #[test]
    fn test_encode_single_layout() {
        let proof = proof_with("http", 1_700_000_000, 7).with_appclip(true);
        let encoded = encode_single(&proof).unwrap();
        let bytes = encoded.as_slice();

        // Outer offset to the dynamic tuple.
        assert_eq!(word(bytes, 0), U256::from(0x20));

        let body = WORD;
        // claimInfo head offset, then signedClaim offset, then the bool.
        assert_eq!(word(bytes, body), U256::from(3 * WORD));
        assert_eq!(word(bytes, body + 2 * WORD), U256::from(1));

        // claimInfo: three string offsets, then provider length + padded data.
        let claim_info = body + 3 * WORD;
        assert_eq!(word(bytes, claim_info), U256::from(3 * WORD));
        let provider = claim_info + 3 * WORD;
        assert_eq!(word(bytes, provider), U256::from(4));
        assert_eq!(&bytes[provider + WORD..provider + WORD + 4], b"http");
        assert!(bytes[provider + WORD + 4..provider + 2 * WORD]
            .iter()
            .all(|b| *b == 0));

        // signedClaim: static claim inline, then the signatures offset.
        let signed_claim = body + word(bytes, body + WORD).to::<usize>();
        assert_eq!(&bytes[signed_claim..signed_claim + WORD], &[0x42; 32]);
        assert_eq!(
            &bytes[signed_claim + WORD + 12..signed_claim + 2 * WORD],
            &[0x07; 20]
        );
        assert_eq!(word(bytes, signed_claim + 2 * WORD), U256::from(1_700_000_000u64));
        assert_eq!(word(bytes, signed_claim + 3 * WORD), U256::from(7));
        assert_eq!(word(bytes, signed_claim + 4 * WORD), U256::from(5 * WORD));

        // bytes[]: length 2, then two offsets relative to the array data.
        let signatures = signed_claim + 5 * WORD;
        assert_eq!(word(bytes, signatures), U256::from(2));
        assert_eq!(word(bytes, signatures + WORD), U256::from(2 * WORD));
        let first = signatures + WORD + 2 * WORD;
        assert_eq!(word(bytes, first), U256::from(65));
    }

    #[test]
    fn test_range_enforcement() {
        let max = u32::MAX as i64;
        assert!(encode_single(&proof_with("http", 0, 0)).is_ok());
        assert!(encode_single(&proof_with("http", max, max)).is_ok());

        for bad in [max + 1, -1] {
            let err = encode_single(&proof_with("http", bad, 0)).unwrap_err();
            assert!(matches!(err, RampError::Validation { .. }));
            let err = encode_single(&proof_with("http", 0, bad)).unwrap_err();
            assert!(matches!(err, RampError::Validation { .. }));
        }
    }

    #[test]
    fn test_encode_many_matches_parameter_encoding() {
        let p1 = proof_with("http", 1_700_000_000, 1);
        let p2 = proof_with("reclaim-http", 1_700_000_500, 2).with_appclip(true);

        let ours = encode_many(&[p1.clone(), p2.clone()]).unwrap();
        let reference = <(abi::ReclaimProof, abi::ReclaimProof) as SolType>::abi_encode_params(&(
            to_abi(&p1).unwrap(),
            to_abi(&p2).unwrap(),
        ));
        assert_eq!(ours.as_slice(), reference.as_slice());
    }

    #[test]
    fn test_encode_many_single_equals_encode_single() {
        let p = proof_with("http", 1, 1);
        assert_eq!(encode_many(&[p.clone()]).unwrap(), encode_single(&p).unwrap());
    }

    #[test]
    fn test_encode_many_rejects_before_encoding() {
        let ok = proof_with("http", 1, 1);
        let bad = proof_with("http", -1, 1);
        assert!(encode_many(&[ok, bad]).is_err());
        assert!(encode_many(&[]).is_err());
    }

    #[test]
    fn test_method_tag_packing() {
        let proof = encode_single(&proof_with("http", 1, 1)).unwrap();
        let tagged = encode_with_method_tag(&proof, 0xa5);
        assert_eq!(tagged.len(), proof.len() + 1);
        assert_eq!(tagged.as_slice()[0], 0xa5);
        assert_eq!(&tagged.as_slice()[1..], proof.as_slice());
    }

    #[test]
    fn test_proof_bytes_hex() {
        let bytes = ProofBytes::from(vec![0x00, 0xff, 0x10]);
        assert_eq!(bytes.to_string(), "0x00ff10");
        assert_eq!("0x00ff10".parse::<ProofBytes>().unwrap(), bytes);
        assert!("00ff10".parse::<ProofBytes>().is_err());
    }

    #[test]
    fn test_canonical_context() {
        assert_eq!(canonicalize_context("").unwrap(), "");
        assert_eq!(
            canonicalize_context("{ \"b\": 1, \"a\": {\"d\": 2, \"c\": [3]} }").unwrap(),
            "{\"a\":{\"c\":[3],\"d\":2},\"b\":1}"
        );
        assert!(matches!(
            canonicalize_context("{not json"),
            Err(RampError::Validation { .. })
        ));
    }

    #[test]
    fn test_identifier_ignores_context_formatting() {
        let a = ClaimInfo {
            provider: "http".into(),
            parameters: "{}".into(),
            context: "{\"b\":1,\"a\":2}".into(),
        };
        let b = ClaimInfo {
            context: "{ \"a\": 2, \"b\": 1 }".into(),
            ..a.clone()
        };
        assert_eq!(
            derive_claim_identifier(&a).unwrap(),
            derive_claim_identifier(&b).unwrap()
        );
    }

    #[test]
    fn test_identifier_uses_keccak() {
        let info = ClaimInfo {
            provider: "http".into(),
            parameters: "{}".into(),
            context: String::new(),
        };
        let identifier = derive_claim_identifier(&info).unwrap();
        assert_eq!(identifier, keccak256("http\n{}\n".as_bytes()));

        let generic = Sha256::digest("http\n{}\n".as_bytes());
        assert_ne!(identifier.as_slice(), generic.as_slice());
    }

    #[test]
    fn test_identifier_rejects_bad_context() {
        let info = ClaimInfo {
            provider: "http".into(),
            parameters: "{}".into(),
            context: "{oops".into(),
        };
        assert!(derive_claim_identifier(&info).is_err());
    }
}
