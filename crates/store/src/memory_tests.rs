// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

use garm_core::{
    Bus, EntityType, Filter, ForgeEndpoint, ForgeKind, Operation, ScaleSet, ScaleSetId,
    ScaleSetState, ScaleSetStatistics,
};

use super::*;

fn endpoint(name: &str) -> ForgeEndpoint {
    ForgeEndpoint {
        name: name.to_string(),
        forge_kind: ForgeKind::Github,
        base_url: "https://github.com".to_string(),
        api_base_url: "https://api.github.com".to_string(),
        upload_base_url: None,
        ca_cert_bundle: None,
    }
}

fn scale_set(entity_id: EntityId) -> ScaleSet {
    ScaleSet {
        id: ScaleSetId::new(),
        entity_id,
        provider_name: "lxd".to_string(),
        image: "ubuntu:22.04".to_string(),
        flavor: "small".to_string(),
        os_type: garm_core::OsType::Linux,
        os_arch: garm_core::OsArch::Amd64,
        tags: vec![],
        min_idle_runners: 0,
        max_runners: 10,
        extra_specs: Default::default(),
        github_runner_group: None,
        last_message_id: 0,
        desired_runner_count: 0,
        state: ScaleSetState::Pending,
        statistics: ScaleSetStatistics::default(),
    }
}

#[tokio::test]
async fn create_emits_bus_event_with_equal_payload() {
    let bus = Bus::new();
    let mut consumer = bus
        .register_consumer("test-consumer", Filter::by_entity_type(vec![EntityType::Endpoint]))
        .expect("register consumer");
    let store = MemoryStore::new(&bus, "test-producer").expect("build store");

    store.create_endpoint(endpoint("github.com")).await.expect("create");

    let event = tokio::time::timeout(std::time::Duration::from_secs(1), consumer.recv())
        .await
        .expect("no timeout")
        .expect("event");
    assert_eq!(event.entity_type, EntityType::Endpoint);
    assert_eq!(event.operation, Operation::Create);
    assert_eq!(event.payload["name"], "github.com");
}

#[tokio::test]
async fn delete_endpoint_emits_name_only_shell() {
    let bus = Bus::new();
    let mut consumer = bus
        .register_consumer("test-consumer", Filter::by_entity_type(vec![EntityType::Endpoint]))
        .expect("register consumer");
    let store = MemoryStore::new(&bus, "test-producer").expect("build store");

    store.create_endpoint(endpoint("github.com")).await.expect("create");
    consumer.recv().await.expect("create event");

    store.delete_endpoint("github.com").await.expect("delete");
    let event = consumer.recv().await.expect("delete event");
    assert_eq!(event.operation, Operation::Delete);
    assert_eq!(event.payload["name"], "github.com");
    assert!(event.payload.get("base_url").is_none());
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let bus = Bus::new();
    let store = MemoryStore::new(&bus, "test-producer").expect("build store");
    store.create_endpoint(endpoint("github.com")).await.expect("create");
    let err = store.create_endpoint(endpoint("github.com")).await.unwrap_err();
    assert!(matches!(err, GarmError::Duplicate(_)));
}

#[tokio::test]
async fn scale_set_last_message_id_rejects_regression() {
    let bus = Bus::new();
    let store = MemoryStore::new(&bus, "test-producer").expect("build store");
    let entity_id = EntityId::new();
    let ss = scale_set(entity_id);
    let id = ss.id;
    store.create_scale_set(ss).await.expect("create");

    store.set_scale_set_last_message_id(id, 5).await.expect("advance");
    let err = store.set_scale_set_last_message_id(id, 3).await.unwrap_err();
    assert!(matches!(err, GarmError::BadRequest(_)));

    let updated = store.get_scale_set(id).await.expect("get");
    assert_eq!(updated.last_message_id, 5);
}

#[tokio::test]
async fn create_scale_set_instance_binds_owner() {
    let bus = Bus::new();
    let store = MemoryStore::new(&bus, "test-producer").expect("build store");
    let entity_id = EntityId::new();
    let ss = scale_set(entity_id);
    let ss_id = ss.id;
    store.create_scale_set(ss).await.expect("create scale set");

    let instance = Instance {
        id: InstanceId::new(),
        name: "runner-1".to_string(),
        owner: garm_core::InstanceOwner::Pool { pool_id: garm_core::PoolId::new() },
        provider_id: None,
        agent_id: None,
        os_type: garm_core::OsType::Linux,
        os_arch: garm_core::OsArch::Amd64,
        status: garm_core::InstanceStatus::PendingCreate,
        runner_status: garm_core::RunnerStatus::Pending,
        addresses: vec![],
        provider_fault: None,
        status_messages: vec![],
            running_since_unix: None,
        delete_attempts: 0,
    };
    let created = store.create_scale_set_instance(ss_id, instance).await.expect("create instance");
    assert_eq!(created.owner, garm_core::InstanceOwner::ScaleSet { scale_set_id: ss_id });
}

#[tokio::test]
async fn entity_events_are_pruned_by_retention() {
    let bus = Bus::new();
    let now = std::sync::Arc::new(parking_lot::Mutex::new(0i64));
    let now_clone = now.clone();
    let store = MemoryStore::with_clock(&bus, "test-producer", move || *now_clone.lock()).expect("build store");
    let entity_id = EntityId::new();

    store.add_entity_event(entity_id, "status", EventLevel::Info, "first", 1).await.expect("add");
    *now.lock() = 2 * 86_400;
    store.add_entity_event(entity_id, "status", EventLevel::Info, "second", 1).await.expect("add");

    // Both events pruned against the *current* add's clock reading; only the
    // event within the 1-day retention window of the latest write survives.
    let inner = store.inner.lock();
    let events = inner.entity_events.get(&entity_id).expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "second");
}
