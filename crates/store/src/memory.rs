// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! An in-memory reference implementation of [`crate::Store`] (SPEC_FULL.md
//! §C). Exists so the control plane is runnable and testable without a real
//! SQL backend; not a production persistence layer.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use garm_core::{
    Bus, ChangePayload, ControllerInfo, CredentialsId, EntityId, EntityType, ForgeCredentials,
    ForgeEndpoint, ForgeEntity, GarmError, IdentityShell, Instance, InstanceId, Job, JobId, Pool,
    PoolId, Producer, ScaleSet, ScaleSetId, Template, TemplateId, User, UserId,
};

use crate::store_trait::{EventLevel, Store};

#[derive(Debug, Clone)]
struct RetainedEvent {
    #[allow(dead_code)]
    kind: String,
    #[allow(dead_code)]
    level: EventLevel,
    #[allow(dead_code)]
    message: String,
    created_at_unix: i64,
    retention_days: u32,
}

#[derive(Default)]
struct Inner {
    endpoints: HashMap<String, ForgeEndpoint>,
    credentials: HashMap<CredentialsId, ForgeCredentials>,
    entities: HashMap<EntityId, ForgeEntity>,
    templates: HashMap<TemplateId, Template>,
    pools: HashMap<PoolId, Pool>,
    scale_sets: HashMap<ScaleSetId, ScaleSet>,
    instances: HashMap<InstanceId, Instance>,
    jobs: HashMap<JobId, Job>,
    users: HashMap<UserId, User>,
    controller_info: Option<ControllerInfo>,
    entity_events: HashMap<EntityId, Vec<RetainedEvent>>,
    next_credentials_id: i64,
}

/// An in-memory [`Store`] that emits a [`ChangePayload`] on the bus for
/// every committed mutation, within the call that performs the mutation
/// (spec §5: "Store→Bus is strictly per-row ordered").
pub struct MemoryStore {
    inner: Mutex<Inner>,
    producer: Producer,
    clock: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl MemoryStore {
    /// Register a bus producer under `producer_id` and build an empty store.
    pub fn new(bus: &Bus, producer_id: impl Into<String>) -> Result<Self, GarmError> {
        let producer = bus
            .register_producer(producer_id)
            .map_err(|e| GarmError::Conflict(e.to_string()))?;
        Ok(Self {
            inner: Mutex::new(Inner::default()),
            producer,
            clock: Box::new(|| {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0)
            }),
        })
    }

    /// Build a store with an injected clock, for deterministic retention tests.
    pub fn with_clock(
        bus: &Bus,
        producer_id: impl Into<String>,
        clock: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Result<Self, GarmError> {
        let mut store = Self::new(bus, producer_id)?;
        store.clock = Box::new(clock);
        Ok(store)
    }

    async fn emit(&self, payload: ChangePayload) {
        if let Err(err) = self.producer.notify(payload).await {
            tracing::warn!(error = %err, "memory store: failed to notify change bus");
        }
    }

    fn prune_events(events: &mut Vec<RetainedEvent>, now: i64) {
        events.retain(|e| now - e.created_at_unix < e.retention_days as i64 * 86_400);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_endpoints(&self) -> Result<Vec<ForgeEndpoint>, GarmError> {
        Ok(self.inner.lock().endpoints.values().cloned().collect())
    }

    async fn get_endpoint(&self, name: &str) -> Result<ForgeEndpoint, GarmError> {
        self.inner
            .lock()
            .endpoints
            .get(name)
            .cloned()
            .ok_or_else(|| GarmError::NotFound(format!("endpoint {name}")))
    }

    async fn create_endpoint(&self, endpoint: ForgeEndpoint) -> Result<ForgeEndpoint, GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.endpoints.contains_key(&endpoint.name) {
                return Err(GarmError::Duplicate(format!("endpoint {}", endpoint.name)));
            }
            inner.endpoints.insert(endpoint.name.clone(), endpoint.clone());
        }
        self.emit(ChangePayload::create(EntityType::Endpoint, &endpoint)).await;
        Ok(endpoint)
    }

    async fn update_endpoint(&self, endpoint: ForgeEndpoint) -> Result<ForgeEndpoint, GarmError> {
        {
            let mut inner = self.inner.lock();
            if !inner.endpoints.contains_key(&endpoint.name) {
                return Err(GarmError::NotFound(format!("endpoint {}", endpoint.name)));
            }
            inner.endpoints.insert(endpoint.name.clone(), endpoint.clone());
        }
        self.emit(ChangePayload::update(EntityType::Endpoint, &endpoint)).await;
        Ok(endpoint)
    }

    async fn delete_endpoint(&self, name: &str) -> Result<(), GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.endpoints.remove(name).is_none() {
                return Err(GarmError::NotFound(format!("endpoint {name}")));
            }
        }
        self.emit(ChangePayload::delete(EntityType::Endpoint, IdentityShell::by_name(name)))
            .await;
        Ok(())
    }

    async fn list_credentials(&self) -> Result<Vec<ForgeCredentials>, GarmError> {
        Ok(self.inner.lock().credentials.values().cloned().collect())
    }

    async fn get_credentials(&self, id: CredentialsId) -> Result<ForgeCredentials, GarmError> {
        self.inner
            .lock()
            .credentials
            .get(&id)
            .cloned()
            .ok_or_else(|| GarmError::NotFound(format!("credentials {id}")))
    }

    async fn create_credentials(&self, mut credentials: ForgeCredentials) -> Result<ForgeCredentials, GarmError> {
        {
            let mut inner = self.inner.lock();
            inner.next_credentials_id += 1;
            credentials.id = CredentialsId(inner.next_credentials_id);
            inner.credentials.insert(credentials.id, credentials.clone());
        }
        self.emit(ChangePayload::create(EntityType::Credentials, &credentials)).await;
        Ok(credentials)
    }

    async fn update_credentials(&self, credentials: ForgeCredentials) -> Result<ForgeCredentials, GarmError> {
        {
            let mut inner = self.inner.lock();
            if !inner.credentials.contains_key(&credentials.id) {
                return Err(GarmError::NotFound(format!("credentials {}", credentials.id)));
            }
            inner.credentials.insert(credentials.id, credentials.clone());
        }
        self.emit(ChangePayload::update(EntityType::Credentials, &credentials)).await;
        Ok(credentials)
    }

    async fn delete_credentials(&self, id: CredentialsId) -> Result<(), GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.credentials.remove(&id).is_none() {
                return Err(GarmError::NotFound(format!("credentials {id}")));
            }
        }
        // Per spec §9 open question: a credential delete carries only id/name.
        self.emit(ChangePayload::delete(EntityType::Credentials, IdentityShell::by_id(Uuid::nil())))
            .await;
        Ok(())
    }

    async fn list_entities(&self) -> Result<Vec<ForgeEntity>, GarmError> {
        Ok(self.inner.lock().entities.values().cloned().collect())
    }

    async fn get_entity(&self, id: EntityId) -> Result<ForgeEntity, GarmError> {
        self.inner
            .lock()
            .entities
            .get(&id)
            .cloned()
            .ok_or_else(|| GarmError::NotFound(format!("entity {id}")))
    }

    async fn create_entity(&self, entity: ForgeEntity) -> Result<ForgeEntity, GarmError> {
        let entity_type = entity.entity_type();
        {
            let mut inner = self.inner.lock();
            if inner.entities.contains_key(&entity.id) {
                return Err(GarmError::Duplicate(format!("entity {}", entity.id)));
            }
            inner.entities.insert(entity.id, entity.clone());
        }
        self.emit(ChangePayload::create(entity_type, &entity)).await;
        Ok(entity)
    }

    async fn update_entity(&self, entity: ForgeEntity) -> Result<ForgeEntity, GarmError> {
        let entity_type = entity.entity_type();
        {
            let mut inner = self.inner.lock();
            if !inner.entities.contains_key(&entity.id) {
                return Err(GarmError::NotFound(format!("entity {}", entity.id)));
            }
            inner.entities.insert(entity.id, entity.clone());
        }
        self.emit(ChangePayload::update(entity_type, &entity)).await;
        Ok(entity)
    }

    async fn delete_entity(&self, id: EntityId) -> Result<(), GarmError> {
        let entity_type = {
            let mut inner = self.inner.lock();
            let entity = inner.entities.remove(&id).ok_or_else(|| GarmError::NotFound(format!("entity {id}")))?;
            inner.entity_events.remove(&id);
            entity.entity_type()
        };
        self.emit(ChangePayload::delete(entity_type, IdentityShell::by_id(*id))).await;
        Ok(())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, GarmError> {
        Ok(self.inner.lock().templates.values().cloned().collect())
    }

    async fn get_template(&self, id: TemplateId) -> Result<Template, GarmError> {
        self.inner
            .lock()
            .templates
            .get(&id)
            .cloned()
            .ok_or_else(|| GarmError::NotFound(format!("template {id}")))
    }

    async fn create_template(&self, template: Template) -> Result<Template, GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.templates.contains_key(&template.id) {
                return Err(GarmError::Duplicate(format!("template {}", template.id)));
            }
            inner.templates.insert(template.id, template.clone());
        }
        self.emit(ChangePayload::create(EntityType::Template, &template)).await;
        Ok(template)
    }

    async fn update_template(&self, template: Template) -> Result<Template, GarmError> {
        {
            let mut inner = self.inner.lock();
            if !inner.templates.contains_key(&template.id) {
                return Err(GarmError::NotFound(format!("template {}", template.id)));
            }
            inner.templates.insert(template.id, template.clone());
        }
        self.emit(ChangePayload::update(EntityType::Template, &template)).await;
        Ok(template)
    }

    async fn delete_template(&self, id: TemplateId) -> Result<(), GarmError> {
        {
            let mut inner = self.inner.lock();
            let template = inner.templates.get(&id).ok_or_else(|| GarmError::NotFound(format!("template {id}")))?;
            if !template.is_deletable() {
                return Err(GarmError::BadRequest(format!("template {id} is a system template")));
            }
            inner.templates.remove(&id);
        }
        self.emit(ChangePayload::delete(EntityType::Template, IdentityShell::by_id(*id))).await;
        Ok(())
    }

    async fn list_pools(&self, entity_id: EntityId) -> Result<Vec<Pool>, GarmError> {
        Ok(self.inner.lock().pools.values().filter(|p| p.entity_id == entity_id).cloned().collect())
    }

    async fn get_pool(&self, id: PoolId) -> Result<Pool, GarmError> {
        self.inner.lock().pools.get(&id).cloned().ok_or_else(|| GarmError::NotFound(format!("pool {id}")))
    }

    async fn create_pool(&self, pool: Pool) -> Result<Pool, GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.pools.contains_key(&pool.id) {
                return Err(GarmError::Duplicate(format!("pool {}", pool.id)));
            }
            inner.pools.insert(pool.id, pool.clone());
        }
        self.emit(ChangePayload::create(EntityType::Pool, &pool)).await;
        Ok(pool)
    }

    async fn update_pool(&self, pool: Pool) -> Result<Pool, GarmError> {
        {
            let mut inner = self.inner.lock();
            if !inner.pools.contains_key(&pool.id) {
                return Err(GarmError::NotFound(format!("pool {}", pool.id)));
            }
            inner.pools.insert(pool.id, pool.clone());
        }
        self.emit(ChangePayload::update(EntityType::Pool, &pool)).await;
        Ok(pool)
    }

    async fn delete_pool(&self, id: PoolId) -> Result<(), GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.pools.remove(&id).is_none() {
                return Err(GarmError::NotFound(format!("pool {id}")));
            }
        }
        self.emit(ChangePayload::delete(EntityType::Pool, IdentityShell::by_id(*id))).await;
        Ok(())
    }

    async fn list_scale_sets(&self, entity_id: EntityId) -> Result<Vec<ScaleSet>, GarmError> {
        Ok(self.inner.lock().scale_sets.values().filter(|s| s.entity_id == entity_id).cloned().collect())
    }

    async fn list_all_scale_sets(&self) -> Result<Vec<ScaleSet>, GarmError> {
        Ok(self.inner.lock().scale_sets.values().cloned().collect())
    }

    async fn get_scale_set(&self, id: ScaleSetId) -> Result<ScaleSet, GarmError> {
        self.inner.lock().scale_sets.get(&id).cloned().ok_or_else(|| GarmError::NotFound(format!("scale set {id}")))
    }

    async fn create_scale_set(&self, scale_set: ScaleSet) -> Result<ScaleSet, GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.scale_sets.contains_key(&scale_set.id) {
                return Err(GarmError::Duplicate(format!("scale set {}", scale_set.id)));
            }
            inner.scale_sets.insert(scale_set.id, scale_set.clone());
        }
        self.emit(ChangePayload::create(EntityType::ScaleSet, &scale_set)).await;
        Ok(scale_set)
    }

    async fn update_scale_set(&self, scale_set: ScaleSet) -> Result<ScaleSet, GarmError> {
        {
            let mut inner = self.inner.lock();
            if !inner.scale_sets.contains_key(&scale_set.id) {
                return Err(GarmError::NotFound(format!("scale set {}", scale_set.id)));
            }
            inner.scale_sets.insert(scale_set.id, scale_set.clone());
        }
        self.emit(ChangePayload::update(EntityType::ScaleSet, &scale_set)).await;
        Ok(scale_set)
    }

    async fn delete_scale_set(&self, id: ScaleSetId) -> Result<(), GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.scale_sets.remove(&id).is_none() {
                return Err(GarmError::NotFound(format!("scale set {id}")));
            }
        }
        self.emit(ChangePayload::delete(EntityType::ScaleSet, IdentityShell::by_id(*id))).await;
        Ok(())
    }

    async fn set_scale_set_last_message_id(&self, id: ScaleSetId, last_message_id: i64) -> Result<(), GarmError> {
        let updated = {
            let mut inner = self.inner.lock();
            let scale_set =
                inner.scale_sets.get_mut(&id).ok_or_else(|| GarmError::NotFound(format!("scale set {id}")))?;
            scale_set.advance_message_id(last_message_id)?;
            scale_set.clone()
        };
        self.emit(ChangePayload::update(EntityType::ScaleSet, &updated)).await;
        Ok(())
    }

    async fn set_scale_set_desired_runner_count(&self, id: ScaleSetId, desired: u32) -> Result<(), GarmError> {
        let updated = {
            let mut inner = self.inner.lock();
            let scale_set =
                inner.scale_sets.get_mut(&id).ok_or_else(|| GarmError::NotFound(format!("scale set {id}")))?;
            scale_set.desired_runner_count = desired;
            scale_set.clone()
        };
        self.emit(ChangePayload::update(EntityType::ScaleSet, &updated)).await;
        Ok(())
    }

    async fn create_scale_set_instance(&self, scale_set_id: ScaleSetId, mut instance: Instance) -> Result<Instance, GarmError> {
        use garm_core::InstanceOwner;
        instance.owner = InstanceOwner::ScaleSet { scale_set_id };
        {
            let mut inner = self.inner.lock();
            if !inner.scale_sets.contains_key(&scale_set_id) {
                return Err(GarmError::NotFound(format!("scale set {scale_set_id}")));
            }
            if inner.instances.contains_key(&instance.id) {
                return Err(GarmError::Duplicate(format!("instance {}", instance.id)));
            }
            inner.instances.insert(instance.id, instance.clone());
        }
        self.emit(ChangePayload::create(EntityType::Instance, &instance)).await;
        Ok(instance)
    }

    async fn get_instance(&self, id: InstanceId) -> Result<Instance, GarmError> {
        self.inner.lock().instances.get(&id).cloned().ok_or_else(|| GarmError::NotFound(format!("instance {id}")))
    }

    async fn update_instance(&self, instance: Instance) -> Result<Instance, GarmError> {
        {
            let mut inner = self.inner.lock();
            if !inner.instances.contains_key(&instance.id) {
                return Err(GarmError::NotFound(format!("instance {}", instance.id)));
            }
            inner.instances.insert(instance.id, instance.clone());
        }
        self.emit(ChangePayload::update(EntityType::Instance, &instance)).await;
        Ok(instance)
    }

    async fn delete_instance(&self, id: InstanceId) -> Result<(), GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.instances.remove(&id).is_none() {
                return Err(GarmError::NotFound(format!("instance {id}")));
            }
        }
        self.emit(ChangePayload::delete(EntityType::Instance, IdentityShell::by_id(*id))).await;
        Ok(())
    }

    async fn list_all_instances(&self) -> Result<Vec<Instance>, GarmError> {
        Ok(self.inner.lock().instances.values().cloned().collect())
    }

    async fn create_or_update_job(&self, job: Job) -> Result<Job, GarmError> {
        let is_create = {
            let mut inner = self.inner.lock();
            let is_create = !inner.jobs.contains_key(&job.id);
            inner.jobs.insert(job.id, job.clone());
            is_create
        };
        if is_create {
            self.emit(ChangePayload::create(EntityType::Job, &job)).await;
        } else {
            self.emit(ChangePayload::update(EntityType::Job, &job)).await;
        }
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Job, GarmError> {
        self.inner.lock().jobs.get(&id).cloned().ok_or_else(|| GarmError::NotFound(format!("job {id}")))
    }

    async fn lock_job(&self, id: JobId, locker: Uuid) -> Result<Job, GarmError> {
        let job = {
            let mut inner = self.inner.lock();
            let job = inner.jobs.get_mut(&id).ok_or_else(|| GarmError::NotFound(format!("job {id}")))?;
            job.lock(locker)?;
            job.clone()
        };
        self.emit(ChangePayload::update(EntityType::Job, &job)).await;
        Ok(job)
    }

    async fn unlock_job(&self, id: JobId, locker: Uuid) -> Result<Job, GarmError> {
        let job = {
            let mut inner = self.inner.lock();
            let job = inner.jobs.get_mut(&id).ok_or_else(|| GarmError::NotFound(format!("job {id}")))?;
            job.unlock(locker)?;
            job.clone()
        };
        self.emit(ChangePayload::update(EntityType::Job, &job)).await;
        Ok(job)
    }

    async fn break_lock_job_is_queued(&self, id: JobId) -> Result<Job, GarmError> {
        let job = {
            let mut inner = self.inner.lock();
            let job = inner.jobs.get_mut(&id).ok_or_else(|| GarmError::NotFound(format!("job {id}")))?;
            job.break_lock_if_not_queued()?;
            job.clone()
        };
        self.emit(ChangePayload::update(EntityType::Job, &job)).await;
        Ok(job)
    }

    async fn list_users(&self) -> Result<Vec<User>, GarmError> {
        Ok(self.inner.lock().users.values().cloned().collect())
    }

    async fn get_user(&self, id: UserId) -> Result<User, GarmError> {
        self.inner.lock().users.get(&id).cloned().ok_or_else(|| GarmError::NotFound(format!("user {id}")))
    }

    async fn create_user(&self, user: User) -> Result<User, GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.users.contains_key(&user.id) {
                return Err(GarmError::Duplicate(format!("user {}", user.id)));
            }
            inner.users.insert(user.id, user.clone());
        }
        self.emit(ChangePayload::create(EntityType::User, &user)).await;
        Ok(user)
    }

    async fn update_user(&self, user: User) -> Result<User, GarmError> {
        {
            let mut inner = self.inner.lock();
            if !inner.users.contains_key(&user.id) {
                return Err(GarmError::NotFound(format!("user {}", user.id)));
            }
            inner.users.insert(user.id, user.clone());
        }
        self.emit(ChangePayload::update(EntityType::User, &user)).await;
        Ok(user)
    }

    async fn controller_info(&self) -> Result<ControllerInfo, GarmError> {
        self.inner.lock().controller_info.clone().ok_or_else(|| GarmError::NotFound("controller info".to_string()))
    }

    async fn init_controller(&self, info: ControllerInfo) -> Result<ControllerInfo, GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.controller_info.is_some() {
                return Err(GarmError::Conflict("controller already initialized".to_string()));
            }
            inner.controller_info = Some(info.clone());
        }
        self.emit(ChangePayload::create(EntityType::Controller, &info)).await;
        Ok(info)
    }

    async fn update_controller(&self, info: ControllerInfo) -> Result<ControllerInfo, GarmError> {
        {
            let mut inner = self.inner.lock();
            if inner.controller_info.is_none() {
                return Err(GarmError::NotFound("controller info".to_string()));
            }
            inner.controller_info = Some(info.clone());
        }
        self.emit(ChangePayload::update(EntityType::Controller, &info)).await;
        Ok(info)
    }

    async fn add_entity_event(
        &self,
        entity_id: EntityId,
        kind: &str,
        level: EventLevel,
        message: &str,
        retention_days: u32,
    ) -> Result<(), GarmError> {
        let now = (self.clock)();
        {
            let mut inner = self.inner.lock();
            let events = inner.entity_events.entry(entity_id).or_default();
            events.push(RetainedEvent {
                kind: kind.to_string(),
                level,
                message: message.to_string(),
                created_at_unix: now,
                retention_days,
            });
            Self::prune_events(events, now);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
