// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

use garm_core::{AuthMethod, ForgeKind, JobConclusion, SecretBytes};

use super::*;

fn endpoint() -> ForgeEndpoint {
    ForgeEndpoint {
        name: "github.com".to_string(),
        forge_kind: ForgeKind::Github,
        base_url: "https://github.com".to_string(),
        api_base_url: "https://api.github.com".to_string(),
        upload_base_url: None,
        ca_cert_bundle: None,
    }
}

fn credentials(secret: Vec<u8>) -> ForgeCredentials {
    ForgeCredentials {
        id: garm_core::CredentialsId(1),
        name: "acme-pat".to_string(),
        forge_kind: ForgeKind::Github,
        auth_method: AuthMethod::Pat,
        endpoint_name: "github.com".to_string(),
        secret: SecretBytes::new(secret),
        generation: 0,
    }
}

fn entity() -> ForgeEntity {
    ForgeEntity {
        id: garm_core::EntityId::new(),
        kind: garm_core::EntityKind::Repository { owner: "acme".to_string(), name: "widgets".to_string() },
        credentials_id: garm_core::CredentialsId(1),
        endpoint_name: "github.com".to_string(),
        webhook_secret: SecretBytes::new(vec![9; 16]),
        pool_balancer_type: Default::default(),
    }
}

#[tokio::test]
async fn factory_builds_a_client_from_a_pat_secret() {
    let factory = HttpForgeClientFactory;
    let client = factory.build(&entity(), &credentials(b"ghp_token".to_vec()), &endpoint()).await;
    assert!(client.is_ok());
}

#[tokio::test]
async fn factory_rejects_non_utf8_secret() {
    let factory = HttpForgeClientFactory;
    let err = factory.build(&entity(), &credentials(vec![0xff, 0xfe]), &endpoint()).await.unwrap_err();
    assert!(matches!(err, GarmError::BadRequest(_)));
}

#[test]
fn decode_runner_extracts_pool_label_and_scale_set_field() {
    let scale_set_id = uuid::Uuid::new_v4();
    let raw: RawRunner = serde_json::from_value(serde_json::json!({
        "id": 7,
        "name": "runner-a",
        "busy": true,
        "labels": [{"name": "self-hosted"}, {"name": "runner-pool-id:deadbeef"}],
        "runner_scale_set_id": scale_set_id.to_string(),
    }))
    .expect("decode raw runner");

    let runner = decode_runner(raw);
    assert_eq!(runner.name, "runner-a");
    assert!(runner.busy);
    assert_eq!(runner.pool_id.as_deref(), Some("runner-pool-id:deadbeef"));
    assert_eq!(runner.scale_set_id, Some(ScaleSetId::from(scale_set_id)));
}

#[test]
fn decode_runner_tolerates_missing_scale_set_field() {
    let raw: RawRunner = serde_json::from_value(serde_json::json!({
        "id": 1,
        "name": "runner-b",
        "busy": false,
    }))
    .expect("decode raw runner");

    let runner = decode_runner(raw);
    assert!(runner.pool_id.is_none());
    assert!(runner.scale_set_id.is_none());
}

#[test]
fn decode_message_job_completed_round_trips_conclusion() {
    let job_id = uuid::Uuid::new_v4();
    let raw: RawMessage = serde_json::from_value(serde_json::json!({
        "message_id": 42,
        "message_type": "job_completed",
        "body": {"job_id": job_id.to_string(), "conclusion": "success"},
    }))
    .expect("decode raw message");

    let message = decode_message(raw).expect("decode message");
    assert_eq!(message.message_id, 42);
    match message.body {
        ScaleSetMessageBody::JobCompleted { job_id: decoded, conclusion } => {
            assert_eq!(decoded, JobId::from(job_id));
            assert_eq!(conclusion, JobConclusion::Success);
        }
        other => panic!("unexpected body: {other:?}"),
    }
}

#[test]
fn decode_message_rejects_unknown_message_type() {
    let raw: RawMessage = serde_json::from_value(serde_json::json!({
        "message_id": 1,
        "message_type": "something_new",
        "body": {},
    }))
    .expect("decode raw message");

    let err = decode_message(raw).unwrap_err();
    assert!(matches!(err, GarmError::BadRequest(_)));
}

#[test]
fn decode_message_job_available_parses_labels() {
    let job_id = uuid::Uuid::new_v4();
    let raw: RawMessage = serde_json::from_value(serde_json::json!({
        "message_id": 5,
        "message_type": "job_available",
        "body": {"job_id": job_id.to_string(), "run_id": 99, "labels": ["self-hosted", "linux"]},
    }))
    .expect("decode raw message");

    let message = decode_message(raw).expect("decode message");
    match message.body {
        ScaleSetMessageBody::JobAvailable { job_id: decoded, run_id, labels } => {
            assert_eq!(decoded, JobId::from(job_id));
            assert_eq!(run_id, 99);
            assert_eq!(labels, vec!["self-hosted".to_string(), "linux".to_string()]);
        }
        other => panic!("unexpected body: {other:?}"),
    }
}
