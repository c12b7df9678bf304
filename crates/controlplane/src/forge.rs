// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! The forge client façade (spec §4.2, §4.3, §6): the REST surface the
//! Entity Worker's consolidation loop needs, plus the scale-set long-poll
//! message session the Scale-Set Worker drives. Represented as a small
//! capability-set trait rather than an inheritance hierarchy (spec §9).

use async_trait::async_trait;

use garm_core::{EntityId, ForgeEntity, GarmError, JobConclusion, JobId, ScaleSetId, ScaleSetStatistics};

/// A runner as reported by the forge's REST API, used by the Entity
/// Worker's consolidation loop (spec §4.2) to detect orphaned/leaked
/// runners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgeRunner {
    pub name: String,
    /// `runner-pool-id:<uuid>` label, present for pool-backed runners.
    pub pool_id: Option<String>,
    /// Embedded scale-set id, present for scale-set-backed runners.
    pub scale_set_id: Option<ScaleSetId>,
    pub busy: bool,
}

/// One decoded message from a scale set's long-poll queue (spec §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleSetMessage {
    pub message_id: i64,
    pub body: ScaleSetMessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleSetMessageBody {
    JobAvailable { job_id: JobId, run_id: i64, labels: Vec<String> },
    JobAssigned { job_id: JobId },
    JobStarted { job_id: JobId },
    JobCompleted { job_id: JobId, conclusion: JobConclusion },
    ScaleSetStatistics { desired_runner_count: u32, statistics: ScaleSetStatistics },
}

/// An established long-poll session against one scale set's message queue
/// (spec §4.3 step 1-2).
#[async_trait]
pub trait MessageSession: Send + Sync {
    /// Long-poll for messages after `last_message_id`. Returns an empty
    /// `Vec` on a server-defined timeout with no new data (spec §4.3 step
    /// 2); never blocks indefinitely — callers compose this with their own
    /// cancellation signal per spec §5.
    async fn get_messages(&self, last_message_id: i64) -> Result<Vec<ScaleSetMessage>, GarmError>;
}

/// The abstraction consumed by the Entity Worker and Scale-Set Worker
/// (spec §2 "Forge client façade").
#[async_trait]
pub trait ForgeClient: Send + Sync {
    /// List every runner registered on the forge for `entity` (spec §4.2
    /// consolidation).
    async fn list_runners(&self, entity: &ForgeEntity) -> Result<Vec<ForgeRunner>, GarmError>;

    /// Ask the forge to remove an orphaned runner by name (spec §4.2, §4.3
    /// "ask the forge to remove it").
    async fn remove_runner(&self, entity: &ForgeEntity, runner_name: &str) -> Result<(), GarmError>;

    /// Open (or re-open, after a 401/expired token) a message session for
    /// `scale_set_id` (spec §4.3 step 1).
    async fn create_session(
        &self,
        entity: &ForgeEntity,
        scale_set_id: ScaleSetId,
    ) -> Result<Box<dyn MessageSession>, GarmError>;

    /// Fetch the runner tool manifest (download URLs per os/arch) the
    /// Instance Manager bundles into `BootstrapInstance` (spec §4.4, §4.5
    /// `tools[entityID]` cache).
    async fn list_tools(&self, entity: &ForgeEntity) -> Result<Vec<serde_json::Value>, GarmError>;
}

/// Which credentials generation (spec §3, `ForgeCredentials.generation`) a
/// cached forge client was built from, so an Entity Worker can detect a
/// rotation and rebuild (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForgeClientVersion {
    pub entity_id: EntityId,
    pub credentials_generation: u64,
}
