// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

use super::*;

fn sample_claims() -> JitClaims {
    JitClaims {
        instance_name: "garm-runner-1".to_string(),
        entity_id: EntityId::new(),
        scale_set_id: ScaleSetId::new(),
        expires_at_unix: 1_000,
    }
}

#[test]
fn sign_then_verify_round_trips_claims() {
    let claims = sample_claims();
    let token = sign(&claims, b"controller-secret").unwrap();
    let verified = verify(&token, b"controller-secret", 500).unwrap();
    assert_eq!(verified, claims);
}

#[test]
fn verify_rejects_expired_token() {
    let claims = sample_claims();
    let token = sign(&claims, b"controller-secret").unwrap();
    let err = verify(&token, b"controller-secret", 1_001).unwrap_err();
    assert!(matches!(err, GarmError::Unauthorized(_)));
}

#[test]
fn verify_rejects_wrong_secret() {
    let claims = sample_claims();
    let token = sign(&claims, b"controller-secret").unwrap();
    let err = verify(&token, b"wrong-secret", 500).unwrap_err();
    assert!(matches!(err, GarmError::Unauthorized(_)));
}

#[test]
fn verify_rejects_tampered_claims() {
    let claims = sample_claims();
    let token = sign(&claims, b"controller-secret").unwrap();
    let (_, sig) = token.split_once('.').unwrap();
    let tampered_claims = JitClaims {
        instance_name: "attacker-controlled".to_string(),
        ..claims
    };
    let tampered_claims_b64 =
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(serde_json::to_vec(&tampered_claims).unwrap());
    let tampered_token = format!("{tampered_claims_b64}.{sig}");
    let err = verify(&tampered_token, b"controller-secret", 500).unwrap_err();
    assert!(matches!(err, GarmError::Unauthorized(_)));
}

#[test]
fn verify_rejects_malformed_token() {
    let err = verify("not-a-valid-token", b"controller-secret", 0).unwrap_err();
    assert!(matches!(err, GarmError::Unauthorized(_)));
}
