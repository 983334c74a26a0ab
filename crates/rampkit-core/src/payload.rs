//! Normalisation of loosely-typed proof payloads reported by the agent.
//!
//! Accepted proof shapes:
//! - canonical: `{claimInfo, signedClaim: {claim, signatures}, isAppclipProof?}`
//! - agent: `{claim: {provider, parameters, context, identifier, owner, timestampS, epoch}, signatures}`
//! - either of the above serialized into a JSON string
//!
//! Accepted signature shapes: `0x`-prefixed hex strings, arrays of byte values,
//! and objects keyed by contiguous byte indices (`{"0": 12, "1": 250, ...}`).
//! Anything else is rejected with [`RampError::Validation`].

use std::str::FromStr;

use alloy_primitives::{hex, Address, Bytes, B256};
use serde_json::{Map, Value};

use crate::error::{RampError, Result};
use crate::proof::{ClaimInfo, Proof, SignedClaim, SignedClaimData};

/// Convert an agent payload into a canonical [`Proof`].
pub fn parse_agent_proof(payload: &Value) -> Result<Proof> {
    let proof = match payload {
        Value::String(raw) => {
            let inner: Value = serde_json::from_str(raw)
                .map_err(|e| RampError::validation(format!("proof payload string is not JSON: {}", e)))?;
            if inner.is_string() {
                return Err(RampError::validation("proof payload is doubly string-encoded"));
            }
            parse_agent_proof(&inner)
        }
        Value::Object(obj) if obj.contains_key("claimInfo") && obj.contains_key("signedClaim") => {
            parse_canonical(obj)
        }
        Value::Object(obj) if obj.contains_key("claim") => parse_agent_shape(obj),
        _ => Err(RampError::validation(
            "unrecognised proof payload shape (expected claimInfo/signedClaim or claim/signatures)",
        )),
    }?;

    if !proof.is_usable() {
        return Err(RampError::validation("proof payload carries no signatures"));
    }
    Ok(proof)
}

fn parse_canonical(obj: &Map<String, Value>) -> Result<Proof> {
    let info = object(obj, "claimInfo")?;
    let signed = object(obj, "signedClaim")?;
    let claim = object(signed, "claim")?;
    let signatures = field(signed, "signatures")?;

    Ok(Proof {
        claim_info: claim_info(info)?,
        signed_claim: SignedClaim {
            claim: claim_data(claim)?,
            signatures: signature_list(signatures)?,
        },
        is_appclip_proof: obj
            .get("isAppclipProof")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn parse_agent_shape(obj: &Map<String, Value>) -> Result<Proof> {
    let claim = object(obj, "claim")?;
    let signatures = match field(obj, "signatures")? {
        Value::Object(sigs) if sigs.contains_key("claimSignature") => {
            vec![signature(field(sigs, "claimSignature")?)?]
        }
        other => signature_list(other)?,
    };

    Ok(Proof {
        claim_info: claim_info(claim)?,
        signed_claim: SignedClaim {
            claim: claim_data(claim)?,
            signatures,
        },
        is_appclip_proof: false,
    })
}

fn claim_info(obj: &Map<String, Value>) -> Result<ClaimInfo> {
    Ok(ClaimInfo {
        provider: string(obj, "provider")?,
        parameters: string(obj, "parameters")?,
        context: match obj.get("context") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(context @ Value::Object(_)) => context.to_string(),
            Some(_) => return Err(RampError::validation("context must be a string")),
        },
    })
}

fn claim_data(obj: &Map<String, Value>) -> Result<SignedClaimData> {
    let identifier = string(obj, "identifier")?;
    let owner = string(obj, "owner")?;

    Ok(SignedClaimData {
        identifier: B256::from_str(&identifier)
            .map_err(|e| RampError::validation(format!("invalid claim identifier: {}", e)))?,
        owner: Address::from_str(&owner)
            .map_err(|e| RampError::validation(format!("invalid claim owner: {}", e)))?,
        timestamp_s: integer(obj, "timestampS")?,
        epoch: integer(obj, "epoch")?,
    })
}

fn signature_list(value: &Value) -> Result<Vec<Bytes>> {
    match value {
        // A bare byte array is a single signature, not a list of them.
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_number) => {
            Ok(vec![signature(value)?])
        }
        Value::Array(items) => items.iter().map(signature).collect(),
        _ => Ok(vec![signature(value)?]),
    }
}

/// Normalise one signature into bytes.
pub fn signature(value: &Value) -> Result<Bytes> {
    match value {
        Value::String(s) => {
            let raw = s
                .strip_prefix("0x")
                .ok_or_else(|| RampError::validation("signature hex must be 0x-prefixed"))?;
            hex::decode(raw)
                .map(Bytes::from)
                .map_err(|e| RampError::validation(format!("invalid signature hex: {}", e)))
        }
        Value::Array(items) => items.iter().map(byte).collect::<Result<Vec<u8>>>().map(Bytes::from),
        Value::Object(map) => {
            let mut indexed = map
                .iter()
                .map(|(k, v)| {
                    let index = k.parse::<usize>().map_err(|_| {
                        RampError::validation(format!("signature key '{}' is not a byte index", k))
                    })?;
                    Ok((index, byte(v)?))
                })
                .collect::<Result<Vec<(usize, u8)>>>()?;
            indexed.sort_by_key(|(index, _)| *index);

            if indexed.iter().enumerate().any(|(pos, (index, _))| pos != *index) {
                return Err(RampError::validation("signature byte indices are not contiguous"));
            }
            Ok(Bytes::from(indexed.into_iter().map(|(_, b)| b).collect::<Vec<u8>>()))
        }
        _ => Err(RampError::validation(
            "signature must be a hex string, byte array or index-keyed byte map",
        )),
    }
}

fn byte(value: &Value) -> Result<u8> {
    value
        .as_u64()
        .and_then(|n| u8::try_from(n).ok())
        .ok_or_else(|| RampError::validation(format!("signature byte {} is not in 0..=255", value)))
}

fn field<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    obj.get(key)
        .ok_or_else(|| RampError::validation(format!("proof payload is missing '{}'", key)))
}

fn object<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a Map<String, Value>> {
    field(obj, key)?
        .as_object()
        .ok_or_else(|| RampError::validation(format!("'{}' must be an object", key)))
}

fn string(obj: &Map<String, Value>, key: &str) -> Result<String> {
    field(obj, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RampError::validation(format!("'{}' must be a string", key)))
}

fn integer(obj: &Map<String, Value>, key: &str) -> Result<i64> {
    match field(obj, key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| RampError::validation(format!("'{}' must be an integer", key)))
}
