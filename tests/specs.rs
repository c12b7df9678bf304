// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Cross-crate integration scenarios exercising the whole control plane
//! pipeline end-to-end against an in-memory `Store` and stub forge/provider
//! doubles, since there is no running forge or compute provider in this
//! repo's test environment (SPEC_FULL.md §A.4, spec §8 scenarios S1-S6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use garm_core::{
    Bus, ControllerInfo, CredentialsId, EntityId, EntityKind, EntityType, Filter, ForgeEntity,
    Instance, InstanceId, InstanceOwner, InstanceStatus, OsArch, OsType, Operation, PoolBalancerType,
    RunnerStatus, ScaleSet, ScaleSetId, ScaleSetState, ScaleSetStatistics, SecretBytes,
};
use garm_controlplane::forge::ScaleSetMessageBody;
use garm_controlplane::stub_forge::StubForgeClient;
use garm_controlplane::{instance_manager, scale_set};
use garm_provider::{BaseParams, BootstrapInstance, Provider, ProviderError, ProviderInstance, ProviderInstanceStatus};
use garm_store::{MemoryStore, Store};

fn sample_entity() -> ForgeEntity {
    ForgeEntity {
        id: EntityId::new(),
        kind: EntityKind::Repository { owner: "acme".to_string(), name: "widgets".to_string() },
        credentials_id: CredentialsId(1),
        endpoint_name: "github.com".to_string(),
        webhook_secret: SecretBytes::new(b"hook-secret".to_vec()),
        pool_balancer_type: PoolBalancerType::RoundRobin,
    }
}

fn sample_scale_set(entity_id: EntityId, desired: u32, min_idle: u32, max: u32) -> ScaleSet {
    ScaleSet {
        id: ScaleSetId::new(),
        entity_id,
        provider_name: "lxd".to_string(),
        image: "ubuntu:22.04".to_string(),
        flavor: "small".to_string(),
        os_type: OsType::Linux,
        os_arch: OsArch::Amd64,
        tags: vec![],
        min_idle_runners: min_idle,
        max_runners: max,
        extra_specs: HashMap::new(),
        github_runner_group: None,
        last_message_id: 0,
        desired_runner_count: desired,
        state: ScaleSetState::Pending,
        statistics: ScaleSetStatistics::default(),
    }
}

/// S1: bus create/delete round trip (spec §8 "S1 bus create→delete").
#[tokio::test]
async fn s1_bus_emits_create_then_delete_for_instance() {
    let bus = Bus::new();
    let producer = bus.register_producer("store").unwrap();
    let mut consumer = bus
        .register_consumer(
            "watcher",
            Filter::all(vec![
                Filter::by_entity_type(vec![EntityType::Instance]),
                Filter::any(vec![
                    Filter::by_operation(vec![Operation::Create]),
                    Filter::by_operation(vec![Operation::Update]),
                    Filter::by_operation(vec![Operation::Delete]),
                ]),
            ]),
        )
        .unwrap();

    let instance = sample_instance(ScaleSetId::new());
    producer.notify(garm_core::ChangePayload::create(EntityType::Instance, &instance)).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), consumer.recv()).await.unwrap().unwrap();
    assert_eq!(event.operation, Operation::Create);
    assert_eq!(event.entity_id(), Some(instance.id.as_uuid()));

    producer
        .notify(garm_core::ChangePayload::delete(EntityType::Instance, garm_core::IdentityShell::by_name(instance.name.clone())))
        .await
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(1), consumer.recv()).await.unwrap().unwrap();
    assert_eq!(event.operation, Operation::Delete);
    assert_eq!(event.payload.get("name").and_then(|v| v.as_str()), Some(instance.name.as_str()));
}

fn sample_instance(scale_set_id: ScaleSetId) -> Instance {
    Instance {
        id: InstanceId::new(),
        name: "inst-1".to_string(),
        owner: InstanceOwner::ScaleSet { scale_set_id },
        provider_id: None,
        agent_id: None,
        os_type: OsType::Linux,
        os_arch: OsArch::Amd64,
        status: InstanceStatus::PendingCreate,
        runner_status: RunnerStatus::Pending,
        addresses: vec![],
        provider_fault: None,
        status_messages: vec![],
        running_since_unix: None,
        delete_attempts: 0,
    }
}

fn worker_ctx(store: Arc<dyn Store>, forge: StubForgeClient, entity: ForgeEntity) -> scale_set::ScaleSetWorkerContext {
    scale_set::ScaleSetWorkerContext {
        store,
        forge_client: Arc::new(forge),
        entity,
        bootstrap_timeout: Duration::from_secs(3600),
        now_unix: Arc::new(|| 0),
    }
}

/// S2: message session advance is monotonic and persisted (spec §8 "S2").
#[tokio::test]
async fn s2_message_session_advances_last_message_id() {
    let bus = Bus::new();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&bus, "store").unwrap());
    let entity = sample_entity();
    let mut scale_set = sample_scale_set(entity.id, 0, 0, 10);
    scale_set.last_message_id = 100;
    let scale_set = store.create_scale_set(scale_set).await.unwrap();

    let forge = StubForgeClient::new();
    forge.seed_messages(vec![
        garm_controlplane::forge::ScaleSetMessage {
            message_id: 101,
            body: ScaleSetMessageBody::ScaleSetStatistics {
                desired_runner_count: 1,
                statistics: ScaleSetStatistics::default(),
            },
        },
        garm_controlplane::forge::ScaleSetMessage {
            message_id: 102,
            body: ScaleSetMessageBody::ScaleSetStatistics {
                desired_runner_count: 2,
                statistics: ScaleSetStatistics::default(),
            },
        },
    ]);

    let mut consumer = bus.register_consumer("watch-scale-set", Filter::by_entity_type(vec![EntityType::ScaleSet])).unwrap();

    let handle = scale_set::spawn(worker_ctx(store.clone(), forge, entity), scale_set.clone());

    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(2), consumer.recv()).await.unwrap().unwrap();
        assert_eq!(event.entity_type, EntityType::ScaleSet);
    }

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let current = store.get_scale_set(scale_set.id).await.unwrap();
            if current.last_message_id == 102 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("last_message_id should reach 102");

    handle.stop().await;
}

/// S3: desired→create (spec §8 "S3"). One tick should create the delta
/// between `target_runner_count()` and existing non-terminal instances.
#[tokio::test]
async fn s3_reconcile_creates_instances_to_reach_desired_count() {
    let bus = Bus::new();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&bus, "store").unwrap());
    let entity = sample_entity();
    let scale_set = sample_scale_set(entity.id, 3, 0, 10);
    let scale_set = store.create_scale_set(scale_set).await.unwrap();

    // One pre-existing running instance; reconcile must create exactly 2 more.
    let mut existing = sample_instance(scale_set.id);
    existing.status = InstanceStatus::Running;
    store.create_scale_set_instance(scale_set.id, existing).await.unwrap();

    let forge = StubForgeClient::new();
    let handle = scale_set::spawn(worker_ctx(store.clone(), forge, entity), scale_set.clone());

    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let instances = store.list_all_instances().await.unwrap();
            let pending_create = instances.iter().filter(|i| i.status == InstanceStatus::PendingCreate).count();
            if pending_create == 2 {
                let names: std::collections::HashSet<_> = instances.iter().map(|i| i.name.clone()).collect();
                assert_eq!(names.len(), instances.len(), "instance names must be unique");
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("reconcile should create 2 pending_create instances");

    handle.stop().await;
}

struct MockProvider {
    fail_n_times: AtomicU32,
    always_fail: bool,
}

impl MockProvider {
    fn succeeding() -> Self {
        Self { fail_n_times: AtomicU32::new(0), always_fail: false }
    }

    fn failing_n_times(n: u32) -> Self {
        Self { fail_n_times: AtomicU32::new(n), always_fail: false }
    }

    fn always_failing() -> Self {
        Self { fail_n_times: AtomicU32::new(0), always_fail: true }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_instance(
        &self,
        _pool_id: &str,
        instance_id: &str,
        _args: &BootstrapInstance,
        _base_params: &BaseParams,
    ) -> Result<ProviderInstance, ProviderError> {
        Ok(ProviderInstance {
            provider_id: format!("p-{instance_id}"),
            name: instance_id.to_string(),
            os_type: OsType::Linux,
            os_arch: OsArch::Amd64,
            status: ProviderInstanceStatus::Running,
            addresses: vec!["10.0.0.5".to_string()],
            fault: None,
        })
    }

    async fn get_instance(&self, _pool_id: &str, instance_id: &str) -> Result<ProviderInstance, ProviderError> {
        Ok(ProviderInstance {
            provider_id: format!("p-{instance_id}"),
            name: instance_id.to_string(),
            os_type: OsType::Linux,
            os_arch: OsArch::Amd64,
            status: ProviderInstanceStatus::Running,
            addresses: vec![],
            fault: None,
        })
    }

    async fn delete_instance(&self, _pool_id: &str, _instance_id: &str) -> Result<(), ProviderError> {
        if self.always_fail {
            return Err(ProviderError::PluginFailed { code: 1, stderr: "boom".to_string() });
        }
        let remaining = self.fail_n_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_n_times.fetch_sub(1, Ordering::SeqCst);
            return Err(ProviderError::PluginFailed { code: 1, stderr: "transient".to_string() });
        }
        Ok(())
    }

    async fn list_instances(&self, _pool_id: &str) -> Result<Vec<ProviderInstance>, ProviderError> {
        Ok(vec![])
    }

    async fn remove_all_instances(&self, _pool_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn start_instance(&self, _pool_id: &str, _instance_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn stop_instance(&self, _pool_id: &str, _instance_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn manager_ctx(store: Arc<dyn Store>, provider: Arc<dyn Provider>, entity_id: EntityId) -> instance_manager::InstanceManagerContext {
    instance_manager::InstanceManagerContext {
        store,
        provider,
        controller_info: ControllerInfo::new("garm", "https://meta", "https://callback", "https://hooks", SecretBytes::new(b"k".to_vec())),
        entity_id,
        pool_id: "pool-1".to_string(),
        forge_url: "https://github.com".to_string(),
        bootstrap_tools: vec![],
        flavor: "small".to_string(),
        image: "ubuntu:22.04".to_string(),
        extra_specs: HashMap::new(),
        github_runner_group: None,
        bootstrap_timeout: Duration::from_secs(3600),
        status_message_retention: 50,
        now_unix: Arc::new(|| 0),
    }
}

/// S4: provider success path, then delete to terminal (spec §8 "S4").
#[tokio::test]
async fn s4_provider_success_then_delete() {
    let bus = Bus::new();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&bus, "store").unwrap());
    let entity = sample_entity();
    let scale_set = store.create_scale_set(sample_scale_set(entity.id, 0, 0, 10)).await.unwrap();
    let instance = store.create_scale_set_instance(scale_set.id, sample_instance(scale_set.id)).await.unwrap();

    let provider: Arc<dyn Provider> = Arc::new(MockProvider::succeeding());
    let handle = instance_manager::spawn(manager_ctx(store.clone(), provider, entity.id), instance.clone());

    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let row = store.get_instance(instance.id).await.unwrap();
            if row.status == InstanceStatus::Running {
                assert_eq!(row.provider_id.as_deref(), Some(format!("p-{}", instance.name).as_str()));
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("instance should reach running");

    let mut to_delete = store.get_instance(instance.id).await.unwrap();
    to_delete.transition(InstanceStatus::PendingDelete).unwrap();
    let to_delete = store.update_instance(to_delete).await.unwrap();
    handle.send_update(to_delete).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let row = store.get_instance(instance.id).await.unwrap();
            if row.status == InstanceStatus::Deleted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("instance should reach deleted");

    handle.stop().await;
}

/// S5: provider retries with increasing backoff, eventually succeeds
/// (spec §8 "S5").
#[tokio::test]
async fn s5_provider_retries_then_succeeds() {
    let bus = Bus::new();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&bus, "store").unwrap());
    let entity = sample_entity();
    let scale_set = store.create_scale_set(sample_scale_set(entity.id, 0, 0, 10)).await.unwrap();
    let mut instance = store.create_scale_set_instance(scale_set.id, sample_instance(scale_set.id)).await.unwrap();
    instance.status = InstanceStatus::PendingDelete;
    let instance = store.update_instance(instance).await.unwrap();

    let provider: Arc<dyn Provider> = Arc::new(MockProvider::failing_n_times(2));
    let started = std::time::Instant::now();
    let handle = instance_manager::spawn(manager_ctx(store.clone(), provider, entity.id), instance.clone());

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let row = store.get_instance(instance.id).await.unwrap();
            if row.status == InstanceStatus::Deleted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("instance should eventually reach deleted");

    // Backoff schedule is 1s then 2s (delete_backoff(0), delete_backoff(1));
    // two retries means at least 3s of accumulated sleep.
    assert!(started.elapsed() >= Duration::from_secs(3));

    handle.stop().await;
}

/// S6: force delete swallows provider errors and always reaches terminal
/// (spec §8 "S6"), recording an error event on the owning entity.
#[tokio::test]
async fn s6_force_delete_swallows_errors() {
    let bus = Bus::new();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&bus, "store").unwrap());
    let entity = sample_entity();
    let scale_set = store.create_scale_set(sample_scale_set(entity.id, 0, 0, 10)).await.unwrap();
    let mut instance = store.create_scale_set_instance(scale_set.id, sample_instance(scale_set.id)).await.unwrap();
    instance.status = InstanceStatus::PendingForceDelete;
    let instance = store.update_instance(instance).await.unwrap();

    let provider: Arc<dyn Provider> = Arc::new(MockProvider::always_failing());
    let handle = instance_manager::spawn(manager_ctx(store.clone(), provider, entity.id), instance.clone());

    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let row = store.get_instance(instance.id).await.unwrap();
            if row.status == InstanceStatus::Deleted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("force delete should reach deleted despite provider failures");

    handle.stop().await;
}

/// Universal property 1 (spec §8): re-registering the same producer/consumer
/// id is rejected.
#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let bus = Bus::new();
    let _producer = bus.register_producer("dup").unwrap();
    let err = bus.register_producer("dup").unwrap_err();
    assert!(matches!(err, garm_core::BusError::AlreadyRegistered(_)));

    let _consumer = bus.register_consumer("dup-consumer", Filter::everything()).unwrap();
    let err = bus.register_consumer("dup-consumer", Filter::everything()).unwrap_err();
    assert!(matches!(err, garm_core::BusError::AlreadyRegistered(_)));
}

/// Universal property 7 (spec §8): a consolidation sweep never touches
/// instances still in `pending_create`/`creating`.
#[tokio::test]
async fn consolidation_ignores_instances_still_creating() {
    let bus = Bus::new();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&bus, "store").unwrap());
    let entity = sample_entity();
    let scale_set = store.create_scale_set(sample_scale_set(entity.id, 0, 0, 10)).await.unwrap();
    let creating = store.create_scale_set_instance(scale_set.id, sample_instance(scale_set.id)).await.unwrap();
    assert_eq!(creating.status, InstanceStatus::PendingCreate);

    let forge = StubForgeClient::new();
    // No forge runners at all; a naive sweep would mark this orphaned.
    let handle = scale_set::spawn(worker_ctx(store.clone(), forge.clone(), entity.clone()), scale_set.clone());
    handle.send_consolidate(vec![]).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let row = store.get_instance(creating.id).await.unwrap();
    assert_eq!(row.status, InstanceStatus::PendingCreate, "still-creating instances must survive consolidation");

    handle.stop().await;
}
