// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

use super::*;

#[test]
fn create_payload_round_trips_through_json() {
    let shell = IdentityShell::by_name("inst-1");
    let change = ChangePayload::delete(EntityType::Instance, shell);
    assert_eq!(change.entity_type, EntityType::Instance);
    assert_eq!(change.operation, Operation::Delete);
    assert_eq!(change.payload["name"], "inst-1");
    assert!(change.payload.get("id").is_none() || change.payload["id"].is_null());
}

#[test]
fn entity_id_extraction_roundtrips() {
    let id = Uuid::new_v4();
    let shell = IdentityShell::by_id(id);
    let change = ChangePayload::delete(EntityType::ScaleSet, shell);
    assert_eq!(change.entity_id(), Some(id));
}

#[test]
fn credentials_id_extraction_from_arbitrary_payload() {
    let change = ChangePayload::create(
        EntityType::Repository,
        serde_json::json!({"id": Uuid::new_v4().to_string(), "credentials_id": 7}),
    );
    assert_eq!(change.credentials_id(), Some(7));
}

#[test]
fn is_forge_entity_groups_repo_org_enterprise() {
    assert!(EntityType::Repository.is_forge_entity());
    assert!(EntityType::Organization.is_forge_entity());
    assert!(EntityType::Enterprise.is_forge_entity());
    assert!(!EntityType::Instance.is_forge_entity());
    assert!(!EntityType::Pool.is_forge_entity());
}
