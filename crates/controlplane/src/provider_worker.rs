// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! The Provider Worker: one per process, owning every live Instance Manager
//! and forwarding Store mutations of `Instance`/`ScaleSet` rows to them
//! (spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use garm_core::{
    Bus, ChangePayload, EntityId, EntityType, ForgeEndpoint, ForgeEntity, GarmError, Instance,
    InstanceId, ScaleSet, ScaleSetId,
};
use garm_provider::ProviderRegistry;
use garm_store::Store;

use crate::caches::{BusCache, ToolsCache};
use crate::error::ControlPlaneError;
use crate::instance_manager::{self, InstanceManagerContext};

/// Static knobs every spawned Instance Manager shares (spec §4.4, §6).
pub struct ProviderWorkerConfig {
    pub bootstrap_timeout: std::time::Duration,
    pub status_message_retention: usize,
}

pub struct ProviderWorker {
    store: Arc<dyn Store>,
    providers: Arc<ProviderRegistry>,
    config: ProviderWorkerConfig,
    tools_cache: Arc<ToolsCache>,
    scale_sets: BusCache<ScaleSetId, ScaleSet>,
    entities: BusCache<EntityId, ForgeEntity>,
    endpoints: BusCache<String, ForgeEndpoint>,
    managers: Mutex<HashMap<InstanceId, instance_manager::InstanceManagerHandle>>,
}

impl ProviderWorker {
    /// Build a worker and seed its read-through caches from `store` (spec
    /// §4.4: "at startup, load every `ScaleSet` and `Instance` row"). The
    /// per-entity tools cache is owned by (and refreshed by) the Entity
    /// Worker's consolidation loop (spec §4.5); this worker only reads it.
    pub async fn new(
        bus: &Bus,
        store: Arc<dyn Store>,
        providers: Arc<ProviderRegistry>,
        tools_cache: Arc<ToolsCache>,
        config: ProviderWorkerConfig,
    ) -> Result<Arc<Self>, ControlPlaneError> {
        let scale_sets =
            BusCache::spawn(bus, "provider-worker-scale-sets", vec![EntityType::ScaleSet], |p: &ChangePayload| {
                p.entity_id().map(ScaleSetId::from)
            })?;
        for scale_set in store.list_all_scale_sets().await? {
            scale_sets.seed(scale_set.id, scale_set);
        }

        let entities = BusCache::spawn(
            bus,
            "provider-worker-entities",
            vec![EntityType::Repository, EntityType::Organization, EntityType::Enterprise],
            |p: &ChangePayload| p.entity_id().map(EntityId::from),
        )?;
        for entity in store.list_entities().await? {
            entities.seed(entity.id, entity);
        }

        let endpoints =
            BusCache::spawn(bus, "provider-worker-endpoints", vec![EntityType::Endpoint], |p: &ChangePayload| {
                p.payload.get("name").and_then(|v| v.as_str()).map(str::to_string)
            })?;
        for endpoint in store.list_endpoints().await? {
            endpoints.seed(endpoint.name.clone(), endpoint);
        }

        let worker = Arc::new(Self {
            store,
            providers,
            config,
            tools_cache,
            scale_sets,
            entities,
            endpoints,
            managers: Mutex::new(HashMap::new()),
        });

        for instance in worker.store.list_all_instances().await? {
            if !instance.status.is_terminal() {
                worker.ensure_manager(instance).await;
            }
        }

        Ok(worker)
    }

    /// Subscribe to the bus for `Instance` mutations and forward them to
    /// per-instance managers for the lifetime of the returned
    /// [`watch::Sender`]'s corresponding receiver staying open; drop the
    /// returned handle to stop the loop.
    pub fn spawn_dispatch_loop(self: &Arc<Self>, bus: &Bus) -> Result<watch::Sender<()>, ControlPlaneError> {
        let filter = garm_core::Filter::by_entity_type(vec![EntityType::Instance]);
        let mut consumer = bus
            .register_consumer("provider-worker-instances", filter)
            .map_err(|e| ControlPlaneError::Fatal(e.to_string()))?;
        let (quit_tx, mut quit_rx) = watch::channel(());
        let worker = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = quit_rx.changed() => break,
                    event = consumer.recv() => {
                        let Some(event) = event else { break };
                        worker.handle_instance_event(event).await;
                    }
                }
            }
        });
        Ok(quit_tx)
    }

    async fn handle_instance_event(&self, event: ChangePayload) {
        match event.operation {
            garm_core::Operation::Delete => {
                // Deletes carry only an identity shell; the manager already
                // reaches `Deleted` by observing the prior `Update` with
                // `status = pending_delete`/`pending_force_delete`, so there
                // is nothing further to forward here.
            }
            garm_core::Operation::Create | garm_core::Operation::Update => {
                match serde_json::from_value::<Instance>(event.payload) {
                    Ok(instance) => self.dispatch(instance).await,
                    Err(err) => tracing::warn!(error = %err, "provider worker: failed to decode instance payload"),
                }
            }
        }
    }

    async fn dispatch(&self, instance: Instance) {
        if instance.status.is_terminal() {
            self.managers.lock().remove(&instance.id);
            return;
        }
        // Clone the sender out from under the lock so the mutex isn't held
        // across the `await` below.
        let live_sender = self.managers.lock().get(&instance.id).filter(|h| !h.is_finished()).map(|h| h.sender());
        match live_sender {
            Some(sender) => {
                if let Err(err) = sender.send_update(instance.clone()).await {
                    tracing::warn!(instance = %instance.name, error = %err, "provider worker: failed to forward update");
                }
            }
            None => self.ensure_manager(instance).await,
        }
    }

    async fn ensure_manager(&self, instance: Instance) {
        let id = instance.id;
        let name = instance.name.clone();
        match self.build_context(&instance).await {
            Ok(ctx) => {
                let handle = instance_manager::spawn(ctx, instance);
                self.managers.lock().insert(id, handle);
            }
            Err(err) => {
                tracing::warn!(instance = %name, error = %err, "provider worker: could not build manager context");
            }
        }
    }

    async fn build_context(&self, instance: &Instance) -> Result<InstanceManagerContext, ControlPlaneError> {
        let scale_set_id = match instance.owner {
            garm_core::InstanceOwner::ScaleSet { scale_set_id } => scale_set_id,
            garm_core::InstanceOwner::Pool { .. } => {
                return Err(ControlPlaneError::Fatal(
                    "provider worker only drives scale-set-owned instances".to_string(),
                ));
            }
        };
        let scale_set = self
            .scale_sets
            .get(&scale_set_id)
            .ok_or_else(|| GarmError::NotFound(format!("scale set {scale_set_id} not cached")))?;
        let entity = self
            .entities
            .get(&scale_set.entity_id)
            .ok_or_else(|| GarmError::NotFound(format!("entity {} not cached", scale_set.entity_id)))?;
        let endpoint = self
            .endpoints
            .get(&entity.endpoint_name)
            .ok_or_else(|| GarmError::NotFound(format!("endpoint {} not cached", entity.endpoint_name)))?;
        let provider = self.providers.get(&scale_set.provider_name)?;
        let controller_info = self.store.controller_info().await?;

        Ok(InstanceManagerContext {
            store: self.store.clone(),
            provider,
            controller_info,
            entity_id: entity.id,
            pool_id: scale_set.id.to_string(),
            forge_url: endpoint.base_url.clone(),
            bootstrap_tools: self.tools_cache.get(entity.id),
            flavor: scale_set.flavor.clone(),
            image: scale_set.image.clone(),
            extra_specs: scale_set.extra_specs.clone(),
            github_runner_group: scale_set.github_runner_group.clone(),
            bootstrap_timeout: self.config.bootstrap_timeout,
            status_message_retention: self.config.status_message_retention,
            now_unix: Arc::new(|| {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0)
            }),
        })
    }
}

#[cfg(test)]
#[path = "provider_worker_tests.rs"]
mod tests;
