// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! The Entity Controller & Entity Worker (spec §4.2): one cooperative task
//! per forge entity, owning that entity's [`ScaleSetController`] and running
//! the periodic runner-consolidation sweep that feeds it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use garm_core::{
    Bus, ChangePayload, EntityId, EntityType, Filter, ForgeCredentials, ForgeEndpoint, ForgeEntity,
    GarmError, Operation,
};
use garm_store::{EventLevel, Store};

use crate::caches::ToolsCache;
use crate::forge::{ForgeClient, ForgeRunner};
use crate::scale_set::{ScaleSetController, ScaleSetWorkerContext};

/// How often an Entity Worker lists the forge's runners and reconciles them
/// against local instance rows (spec §4.2; a slower cadence than the
/// Scale-Set Worker's own 10s reconciliation loop since this is a
/// leak/orphan safety net rather than the primary create/delete signal).
pub const CONSOLIDATE_INTERVAL: Duration = Duration::from_secs(30);

/// Retention for the status events a consolidation sweep records on
/// failure (SPEC_FULL.md §B "bounded status-event retention").
const CONSOLIDATE_EVENT_RETENTION_DAYS: u32 = 7;

/// Builds a [`ForgeClient`] for one entity's current credentials, so an
/// Entity Worker can rebuild its client when the credentials row it depends
/// on rotates (spec §4.2: "on a credentials change... rebuild its forge
/// client").
#[async_trait]
pub trait ForgeClientFactory: Send + Sync {
    async fn build(
        &self,
        entity: &ForgeEntity,
        credentials: &ForgeCredentials,
        endpoint: &ForgeEndpoint,
    ) -> Result<Arc<dyn ForgeClient>, GarmError>;
}

enum Message {
    Updated(ForgeEntity),
    Stop,
}

pub struct EntityWorkerHandle {
    id: EntityId,
    tx: mpsc::Sender<Message>,
    task: JoinHandle<()>,
}

impl EntityWorkerHandle {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn send_update(&self, entity: ForgeEntity) {
        let _ = self.tx.send(Message::Updated(entity)).await;
    }

    pub async fn stop(self) {
        let _ = self.tx.send(Message::Stop).await;
        let _ = self.task.await;
    }
}

pub struct EntityWorkerContext {
    pub store: Arc<dyn Store>,
    pub bus: Bus,
    pub forge_factory: Arc<dyn ForgeClientFactory>,
    pub tools_cache: Arc<ToolsCache>,
    /// Forwarded to every [`ScaleSetWorkerContext`] this worker constructs
    /// (spec §4.3 consolidation ingress).
    pub bootstrap_timeout: Duration,
    pub now_unix: Arc<dyn Fn() -> i64 + Send + Sync>,
}

/// Resolve `entity`'s current credentials and endpoint and build a forge
/// client for it.
async fn build_client(
    ctx: &EntityWorkerContext,
    entity: &ForgeEntity,
) -> Result<Arc<dyn ForgeClient>, GarmError> {
    let credentials = ctx.store.get_credentials(entity.credentials_id).await?;
    let endpoint = ctx.store.get_endpoint(&entity.endpoint_name).await?;
    ctx.forge_factory.build(entity, &credentials, &endpoint).await
}

fn scale_set_ctx_factory(
    ctx: &EntityWorkerContext,
    forge_client: Arc<dyn ForgeClient>,
    entity: ForgeEntity,
) -> impl Fn() -> ScaleSetWorkerContext {
    let store = ctx.store.clone();
    let bootstrap_timeout = ctx.bootstrap_timeout;
    let now_unix = ctx.now_unix.clone();
    move || ScaleSetWorkerContext {
        store: store.clone(),
        forge_client: forge_client.clone(),
        entity: entity.clone(),
        bootstrap_timeout,
        now_unix: now_unix.clone(),
    }
}

fn bus_filter(entity: &ForgeEntity) -> Filter {
    let entity_id = entity.id.as_uuid();
    let credentials_id = entity.credentials_id.0;
    Filter::any(vec![
        Filter::all(vec![Filter::by_entity_type(vec![entity.entity_type()]), Filter::by_entity(entity_id)]),
        Filter::callback(move |p| {
            // A `ForgeCredentials` payload carries its own numeric id as
            // `id`, not `credentials_id` (that field belongs to entities
            // that reference a credentials row, e.g. `ForgeEntity`), so the
            // match here is against `id`, not `Filter::by_credentials`.
            p.entity_type == EntityType::Credentials
                && p.payload.get("id").and_then(|v| v.as_i64()) == Some(credentials_id)
        }),
        Filter::callback(move |p| {
            if p.entity_type != EntityType::ScaleSet {
                return false;
            }
            match p.operation {
                // Delete payloads carry only {id, name}; an entity_id match is
                // impossible, so let every scale-set delete through and rely
                // on the Scale-Set Controller's own id-keyed no-op.
                Operation::Delete => true,
                Operation::Create | Operation::Update => {
                    p.payload.get("entity_id").and_then(|v| v.as_str()).and_then(|s| uuid::Uuid::parse_str(s).ok())
                        == Some(entity_id)
                }
            }
        }),
    ])
}

/// Start the worker for `entity`. Per spec §4.2, this returns only after the
/// Scale-Set Controller it owns has started a worker for every scale set
/// already persisted for this entity.
pub async fn spawn(ctx: EntityWorkerContext, entity: ForgeEntity) -> Result<EntityWorkerHandle, GarmError> {
    let id = entity.id;
    let forge_client = build_client(&ctx, &entity).await?;

    let scale_set_controller = Arc::new(ScaleSetController::new());
    let scale_sets = ctx.store.list_scale_sets(id).await?;
    let ctx_factory = scale_set_ctx_factory(&ctx, forge_client.clone(), entity.clone());
    scale_set_controller.start(ctx_factory, scale_sets).await;

    let mut consumer = ctx
        .bus
        .register_consumer(format!("entity-worker-{id}"), bus_filter(&entity))
        .map_err(|err| GarmError::Conflict(err.to_string()))?;

    let (tx, rx) = mpsc::channel(8);
    let task = tokio::spawn(async move {
        run(ctx, entity, forge_client, scale_set_controller, &mut consumer, rx).await;
    });

    Ok(EntityWorkerHandle { id, tx, task })
}

async fn run(
    ctx: EntityWorkerContext,
    mut entity: ForgeEntity,
    mut forge_client: Arc<dyn ForgeClient>,
    scale_set_controller: Arc<ScaleSetController>,
    consumer: &mut garm_core::Consumer,
    mut rx: mpsc::Receiver<Message>,
) {
    let mut tick = tokio::time::interval(CONSOLIDATE_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(Message::Updated(next)) => {
                        if next.credentials_id != entity.credentials_id {
                            match build_client(&ctx, &next).await {
                                Ok(client) => forge_client = client,
                                Err(err) => tracing::warn!(entity = %next.id, error = %err, "entity worker: failed to rebuild forge client after rotation"),
                            }
                        }
                        consumer.set_filter(bus_filter(&next));
                        entity = next;
                    }
                    Some(Message::Stop) | None => {
                        scale_set_controller.stop_all().await;
                        return;
                    }
                }
            }
            event = consumer.recv() => {
                match event {
                    Some(event) => handle_bus_event(&ctx, &mut entity, &mut forge_client, &scale_set_controller, event).await,
                    None => continue,
                }
            }
            _ = tick.tick() => {
                consolidate(&ctx, &entity, &forge_client, &scale_set_controller).await;
            }
        }
    }
}

async fn handle_bus_event(
    ctx: &EntityWorkerContext,
    entity: &mut ForgeEntity,
    forge_client: &mut Arc<dyn ForgeClient>,
    scale_set_controller: &Arc<ScaleSetController>,
    event: ChangePayload,
) {
    match event.entity_type {
        t if t == entity.entity_type() => {
            if event.operation == Operation::Update {
                if let Ok(next) = serde_json::from_value::<ForgeEntity>(event.payload) {
                    if next.credentials_id != entity.credentials_id {
                        match build_client(ctx, &next).await {
                            Ok(client) => *forge_client = client,
                            Err(err) => tracing::warn!(entity = %next.id, error = %err, "entity worker: failed to rebuild forge client after rotation"),
                        }
                    }
                    *entity = next;
                }
            }
        }
        EntityType::Credentials => {
            if event.operation == Operation::Update {
                if let Ok(credentials) = serde_json::from_value::<ForgeCredentials>(event.payload) {
                    if credentials.id == entity.credentials_id {
                        match build_client(ctx, entity).await {
                            Ok(client) => *forge_client = client,
                            Err(err) => tracing::warn!(entity = %entity.id, error = %err, "entity worker: failed to rebuild forge client"),
                        }
                    }
                }
            }
        }
        EntityType::ScaleSet => match event.operation {
            Operation::Create | Operation::Update => {
                if let Ok(scale_set) = serde_json::from_value::<garm_core::ScaleSet>(event.payload) {
                    let ctx_factory = scale_set_ctx_factory(ctx, forge_client.clone(), entity.clone());
                    scale_set_controller.dispatch_create_or_update(ctx_factory, scale_set);
                }
            }
            Operation::Delete => {
                if let Some(id) = event.entity_id() {
                    scale_set_controller.dispatch_delete(garm_core::ScaleSetId::from(id)).await;
                }
            }
        },
        _ => {}
    }
}

/// List every forge runner for `entity`, partition by embedded scale-set id
/// (spec §4.2: `ConsolidateRunnerState(map[scaleSetID][]Runner)`), and
/// forward each partition to its worker. Pool-labeled runners (spec §9's
/// partitioning-only Open Question decision) are counted but otherwise
/// dropped — there is no pool reconciler in scope to hand them to.
async fn consolidate(
    ctx: &EntityWorkerContext,
    entity: &ForgeEntity,
    forge_client: &Arc<dyn ForgeClient>,
    scale_set_controller: &ScaleSetController,
) {
    let runners = match forge_client.list_runners(entity).await {
        Ok(runners) => runners,
        Err(err) => {
            tracing::warn!(entity = %entity.id, error = %err, "entity worker: consolidation sweep failed to list runners");
            let _ = ctx
                .store
                .add_entity_event(
                    entity.id,
                    "consolidation_error",
                    EventLevel::Error,
                    &format!("failed to list forge runners: {err}"),
                    CONSOLIDATE_EVENT_RETENTION_DAYS,
                )
                .await;
            return;
        }
    };

    let mut by_scale_set: HashMap<garm_core::ScaleSetId, Vec<ForgeRunner>> = HashMap::new();
    let mut pool_only = 0usize;
    for runner in runners {
        match runner.scale_set_id {
            Some(id) => by_scale_set.entry(id).or_default().push(runner),
            None if runner.pool_id.is_some() => pool_only += 1,
            None => {}
        }
    }
    if pool_only > 0 {
        tracing::debug!(entity = %entity.id, count = pool_only, "entity worker: ignoring pool-labeled runners, no pool reconciler in scope");
    }

    if let Err(tools_err) = refresh_tools(ctx, entity, forge_client).await {
        tracing::warn!(entity = %entity.id, error = %tools_err, "entity worker: failed to refresh tools cache");
    }

    for (scale_set_id, runners) in by_scale_set {
        scale_set_controller.dispatch_consolidate(scale_set_id, runners).await;
    }
}

async fn refresh_tools(ctx: &EntityWorkerContext, entity: &ForgeEntity, forge_client: &Arc<dyn ForgeClient>) -> Result<(), GarmError> {
    let tools = forge_client.list_tools(entity).await?;
    ctx.tools_cache.set(entity.id, tools);
    Ok(())
}

/// Owns every [`EntityWorkerHandle`] in the process, keyed by entity id
/// (spec §4.2: "At startup, load every Repository/Organization/Enterprise
/// row, spawn an Entity Worker per row").
pub struct EntityController {
    store: Arc<dyn Store>,
    bus: Bus,
    forge_factory: Arc<dyn ForgeClientFactory>,
    tools_cache: Arc<ToolsCache>,
    bootstrap_timeout: Duration,
    now_unix: Arc<dyn Fn() -> i64 + Send + Sync>,
    workers: Mutex<HashMap<EntityId, EntityWorkerHandle>>,
}

impl EntityController {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Bus,
        forge_factory: Arc<dyn ForgeClientFactory>,
        tools_cache: Arc<ToolsCache>,
        bootstrap_timeout: Duration,
        now_unix: Arc<dyn Fn() -> i64 + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            forge_factory,
            tools_cache,
            bootstrap_timeout,
            now_unix,
            workers: Mutex::new(HashMap::new()),
        })
    }

    fn worker_ctx(&self) -> EntityWorkerContext {
        EntityWorkerContext {
            store: self.store.clone(),
            bus: self.bus.clone(),
            forge_factory: self.forge_factory.clone(),
            tools_cache: self.tools_cache.clone(),
            bootstrap_timeout: self.bootstrap_timeout,
            now_unix: self.now_unix.clone(),
        }
    }

    /// Load every persisted entity and spawn its worker, then start reacting
    /// to entity create/update/delete events on the bus.
    pub async fn start(self: &Arc<Self>) -> Result<(), GarmError> {
        for entity in self.store.list_entities().await? {
            self.spawn_worker(entity).await?;
        }
        self.spawn_dispatch_loop()?;
        Ok(())
    }

    async fn spawn_worker(&self, entity: ForgeEntity) -> Result<(), GarmError> {
        let id = entity.id;
        if self.workers.lock().contains_key(&id) {
            return Ok(());
        }
        let handle = spawn(self.worker_ctx(), entity).await?;
        self.workers.lock().insert(id, handle);
        Ok(())
    }

    fn spawn_dispatch_loop(self: &Arc<Self>) -> Result<(), GarmError> {
        let filter = Filter::all(vec![
            Filter::by_entity_type(vec![EntityType::Repository, EntityType::Organization, EntityType::Enterprise]),
            Filter::by_operation(vec![Operation::Create, Operation::Update, Operation::Delete]),
        ]);
        let mut consumer = self
            .bus
            .register_consumer("entity-controller", filter)
            .map_err(|err| GarmError::Conflict(err.to_string()))?;
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(event) = consumer.recv().await {
                controller.handle_event(event).await;
            }
        });
        Ok(())
    }

    async fn handle_event(&self, event: ChangePayload) {
        match event.operation {
            Operation::Create => {
                if let Ok(entity) = serde_json::from_value::<ForgeEntity>(event.payload) {
                    if let Err(err) = self.spawn_worker(entity).await {
                        tracing::warn!(error = %err, "entity controller: failed to spawn worker");
                    }
                }
            }
            Operation::Update => {
                if let Ok(entity) = serde_json::from_value::<ForgeEntity>(event.payload) {
                    let id = entity.id;
                    let handle = {
                        let workers = self.workers.lock();
                        workers.get(&id).map(|h| h.tx.clone())
                    };
                    if let Some(tx) = handle {
                        let _ = tx.send(Message::Updated(entity)).await;
                    } else if let Err(err) = self.spawn_worker(entity).await {
                        tracing::warn!(error = %err, "entity controller: failed to spawn worker for unseen entity update");
                    }
                }
            }
            Operation::Delete => {
                if let Some(id) = event.entity_id() {
                    let handle = self.workers.lock().remove(&EntityId::from(id));
                    if let Some(handle) = handle {
                        handle.stop().await;
                    }
                }
            }
        }
    }

    /// Stop every entity worker (spec §5: bounded by the process's overall
    /// 60s hard shutdown cap, enforced by the caller).
    pub async fn stop_all(&self) {
        let handles: Vec<_> = self.workers.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop().await;
        }
    }
}

#[cfg(test)]
#[path = "entity_tests.rs"]
mod tests;
