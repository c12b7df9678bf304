// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! JIT instance tokens: a short-lived signed credential handed to a freshly
//! created instance so it can register itself as a runner (spec §4.4, §6).
//!
//! Claims are a compact JSON object, signed HMAC-SHA256 with the
//! controller's signing secret (SPEC_FULL.md §B — the spec names "signed
//! token" but not a mechanism).

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::GarmError;
use crate::ids::{EntityId, ScaleSetId};

type HmacSha256 = Hmac<Sha256>;

/// The claim set bound into a JIT token: instance name, owning entity and
/// scale set, and an absolute expiration (spec §6: "expiration =
/// `runner_bootstrap_timeout`").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitClaims {
    pub instance_name: String,
    pub entity_id: EntityId,
    pub scale_set_id: ScaleSetId,
    pub expires_at_unix: i64,
}

fn b64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn b64_decode(s: &str) -> Result<Vec<u8>, GarmError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| GarmError::BadRequest(format!("malformed token segment: {e}")))
}

/// Sign `claims` into a compact `<claims>.<signature>` token.
pub fn sign(claims: &JitClaims, secret: &[u8]) -> Result<String, GarmError> {
    let claims_json =
        serde_json::to_vec(claims).map_err(|e| GarmError::BadRequest(format!("failed to encode claims: {e}")))?;
    let claims_b64 = b64_encode(&claims_json);

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| GarmError::BadRequest(format!("invalid signing key: {e}")))?;
    mac.update(claims_b64.as_bytes());
    let signature_b64 = b64_encode(&mac.finalize().into_bytes());

    Ok(format!("{claims_b64}.{signature_b64}"))
}

/// Verify `token`'s signature and expiration against `now_unix`, returning
/// its claims on success.
pub fn verify(token: &str, secret: &[u8], now_unix: i64) -> Result<JitClaims, GarmError> {
    let (claims_b64, signature_b64) = token
        .split_once('.')
        .ok_or_else(|| GarmError::Unauthorized("malformed JIT token".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| GarmError::BadRequest(format!("invalid signing key: {e}")))?;
    mac.update(claims_b64.as_bytes());
    let expected_signature = b64_decode(signature_b64)?;
    mac.verify_slice(&expected_signature)
        .map_err(|_| GarmError::Unauthorized("JIT token signature mismatch".to_string()))?;

    let claims_json = b64_decode(claims_b64)?;
    let claims: JitClaims = serde_json::from_slice(&claims_json)
        .map_err(|e| GarmError::Unauthorized(format!("malformed JIT token claims: {e}")))?;

    if claims.expires_at_unix <= now_unix {
        return Err(GarmError::Unauthorized("JIT token expired".to_string()));
    }

    Ok(claims)
}

#[cfg(test)]
#[path = "jit_token_tests.rs"]
mod tests;
