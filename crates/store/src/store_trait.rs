// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! The Store contract (spec §6): `List/Get/Create/Update/Delete` per entity
//! plus the job-lock and scale-set/instance operations the control plane
//! needs beyond plain CRUD. Dispatched by tagged variant per entity kind,
//! not by inheritance (spec §9 Design Notes).

use async_trait::async_trait;
use uuid::Uuid;

use garm_core::{
    ControllerInfo, CredentialsId, EntityId, ForgeCredentials, ForgeEndpoint, ForgeEntity,
    GarmError, Instance, InstanceId, Job, JobId, Pool, PoolId, ScaleSet, ScaleSetId, Template,
    TemplateId, User, UserId,
};

/// Severity of an `AddEntityEvent` status message (spec §4.2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

/// The persistence contract the control plane requires.
///
/// Every mutator emits exactly one `ChangePayload` on commit; deletes carry
/// only id/name (spec §6). Implementations MUST NOT emit the event before
/// the mutation is durable, and MUST emit it within the same commit
/// boundary (spec §5 ordering guarantee: "Store→Bus is strictly per-row
/// ordered").
#[async_trait]
pub trait Store: Send + Sync {
    // -- ForgeEndpoint (name-keyed) --
    async fn list_endpoints(&self) -> Result<Vec<ForgeEndpoint>, GarmError>;
    async fn get_endpoint(&self, name: &str) -> Result<ForgeEndpoint, GarmError>;
    async fn create_endpoint(&self, endpoint: ForgeEndpoint) -> Result<ForgeEndpoint, GarmError>;
    async fn update_endpoint(&self, endpoint: ForgeEndpoint) -> Result<ForgeEndpoint, GarmError>;
    async fn delete_endpoint(&self, name: &str) -> Result<(), GarmError>;

    // -- ForgeCredentials (numeric id) --
    async fn list_credentials(&self) -> Result<Vec<ForgeCredentials>, GarmError>;
    async fn get_credentials(&self, id: CredentialsId) -> Result<ForgeCredentials, GarmError>;
    async fn create_credentials(&self, credentials: ForgeCredentials) -> Result<ForgeCredentials, GarmError>;
    async fn update_credentials(&self, credentials: ForgeCredentials) -> Result<ForgeCredentials, GarmError>;
    async fn delete_credentials(&self, id: CredentialsId) -> Result<(), GarmError>;

    // -- ForgeEntity (Repository/Organization/Enterprise) --
    async fn list_entities(&self) -> Result<Vec<ForgeEntity>, GarmError>;
    async fn get_entity(&self, id: EntityId) -> Result<ForgeEntity, GarmError>;
    async fn create_entity(&self, entity: ForgeEntity) -> Result<ForgeEntity, GarmError>;
    async fn update_entity(&self, entity: ForgeEntity) -> Result<ForgeEntity, GarmError>;
    async fn delete_entity(&self, id: EntityId) -> Result<(), GarmError>;

    // -- Template --
    async fn list_templates(&self) -> Result<Vec<Template>, GarmError>;
    async fn get_template(&self, id: TemplateId) -> Result<Template, GarmError>;
    async fn create_template(&self, template: Template) -> Result<Template, GarmError>;
    async fn update_template(&self, template: Template) -> Result<Template, GarmError>;
    async fn delete_template(&self, id: TemplateId) -> Result<(), GarmError>;

    // -- Pool (legacy, spec §9 Open Questions: partitioning-only support) --
    async fn list_pools(&self, entity_id: EntityId) -> Result<Vec<Pool>, GarmError>;
    async fn get_pool(&self, id: PoolId) -> Result<Pool, GarmError>;
    async fn create_pool(&self, pool: Pool) -> Result<Pool, GarmError>;
    async fn update_pool(&self, pool: Pool) -> Result<Pool, GarmError>;
    async fn delete_pool(&self, id: PoolId) -> Result<(), GarmError>;

    // -- ScaleSet --
    async fn list_scale_sets(&self, entity_id: EntityId) -> Result<Vec<ScaleSet>, GarmError>;
    async fn list_all_scale_sets(&self) -> Result<Vec<ScaleSet>, GarmError>;
    async fn get_scale_set(&self, id: ScaleSetId) -> Result<ScaleSet, GarmError>;
    async fn create_scale_set(&self, scale_set: ScaleSet) -> Result<ScaleSet, GarmError>;
    async fn update_scale_set(&self, scale_set: ScaleSet) -> Result<ScaleSet, GarmError>;
    async fn delete_scale_set(&self, id: ScaleSetId) -> Result<(), GarmError>;
    async fn set_scale_set_last_message_id(&self, id: ScaleSetId, last_message_id: i64) -> Result<(), GarmError>;
    async fn set_scale_set_desired_runner_count(&self, id: ScaleSetId, desired: u32) -> Result<(), GarmError>;
    /// Create an Instance already bound to `scale_set_id` (I1), returned by
    /// the Scale-Set Worker's reconciliation loop (spec §4.3).
    async fn create_scale_set_instance(&self, scale_set_id: ScaleSetId, instance: Instance) -> Result<Instance, GarmError>;

    // -- Instance --
    async fn get_instance(&self, id: InstanceId) -> Result<Instance, GarmError>;
    async fn update_instance(&self, instance: Instance) -> Result<Instance, GarmError>;
    async fn delete_instance(&self, id: InstanceId) -> Result<(), GarmError>;
    async fn list_all_instances(&self) -> Result<Vec<Instance>, GarmError>;

    // -- Job (spec I5 locking protocol) --
    async fn create_or_update_job(&self, job: Job) -> Result<Job, GarmError>;
    async fn get_job(&self, id: JobId) -> Result<Job, GarmError>;
    async fn lock_job(&self, id: JobId, locker: Uuid) -> Result<Job, GarmError>;
    async fn unlock_job(&self, id: JobId, locker: Uuid) -> Result<Job, GarmError>;
    async fn break_lock_job_is_queued(&self, id: JobId) -> Result<Job, GarmError>;

    // -- User --
    async fn list_users(&self) -> Result<Vec<User>, GarmError>;
    async fn get_user(&self, id: UserId) -> Result<User, GarmError>;
    async fn create_user(&self, user: User) -> Result<User, GarmError>;
    async fn update_user(&self, user: User) -> Result<User, GarmError>;

    // -- ControllerInfo (singleton, spec §3 Lifecycle: "created once on first run") --
    async fn controller_info(&self) -> Result<ControllerInfo, GarmError>;
    async fn init_controller(&self, info: ControllerInfo) -> Result<ControllerInfo, GarmError>;
    async fn update_controller(&self, info: ControllerInfo) -> Result<ControllerInfo, GarmError>;

    // -- Bounded-retention status events (SPEC_FULL.md §B) --
    async fn add_entity_event(
        &self,
        entity_id: EntityId,
        kind: &str,
        level: EventLevel,
        message: &str,
        retention_days: u32,
    ) -> Result<(), GarmError>;
}
