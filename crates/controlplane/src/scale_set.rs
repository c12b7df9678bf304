// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! The Scale-Set Controller & Worker (spec §4.3): one cooperative task per
//! scale set, long-polling its forge message session and reconciling
//! desired runner count against live `Instance` rows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use garm_core::{
    EntityId, ForgeEntity, GarmError, Instance, InstanceId, InstanceOwner, InstanceStatus, JobId,
    JobScope, JobStatus, OsArch, OsType, RunnerStatus, ScaleSet, ScaleSetId, ScaleSetState,
};
use garm_store::Store;

use crate::forge::{ForgeClient, ForgeRunner, ScaleSetMessageBody};

/// How often the reconciliation step runs, independent of message arrival
/// (not specified numerically in spec §4.3; a tighter loop than the Entity
/// Worker's ~30s consolidation since this drives the create/delete signal
/// the Instance Managers act on).
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Base backoff before re-opening a message session after a transient poll
/// failure; doubles per consecutive failure, capped at `DEGRADED_RETRY_CAP`
/// (spec §4.3 "degraded ... exponential backoff capped at 5 min").
pub const DEGRADED_RETRY_BASE: Duration = Duration::from_secs(5);
pub const DEGRADED_RETRY_CAP: Duration = Duration::from_secs(300);

fn degraded_backoff(attempt: u32) -> Duration {
    DEGRADED_RETRY_BASE.saturating_mul(2u32.saturating_pow(attempt)).min(DEGRADED_RETRY_CAP)
}

enum Message {
    Updated(ScaleSet),
    Consolidate(Vec<ForgeRunner>),
    Stop,
}

pub struct ScaleSetWorkerHandle {
    id: ScaleSetId,
    tx: mpsc::Sender<Message>,
    task: JoinHandle<()>,
}

impl ScaleSetWorkerHandle {
    pub fn id(&self) -> ScaleSetId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn send_update(&self, scale_set: ScaleSet) {
        let _ = self.tx.send(Message::Updated(scale_set)).await;
    }

    /// Forward a batch of forge-observed runners for this scale set (spec
    /// §4.3 "Runner consolidation ingress"), fed by the Entity Worker's
    /// periodic consolidation loop (spec §4.2).
    pub async fn send_consolidate(&self, runners: Vec<ForgeRunner>) {
        let _ = self.tx.send(Message::Consolidate(runners)).await;
    }

    pub async fn stop(self) {
        let _ = self.tx.send(Message::Stop).await;
        let _ = self.task.await;
    }
}

pub struct ScaleSetWorkerContext {
    pub store: Arc<dyn Store>,
    pub forge_client: Arc<dyn ForgeClient>,
    pub entity: ForgeEntity,
    /// How long a locally-`Running` instance may go without a matching forge
    /// runner before consolidation treats it as orphaned rather than simply
    /// not-yet-registered (spec §4.3).
    pub bootstrap_timeout: Duration,
    pub now_unix: Arc<dyn Fn() -> i64 + Send + Sync>,
}

/// Spawn the worker for `scale_set`. Runs until `Stop` is received or the
/// owning [`garm_core::Bus`]-driven [`ScaleSetController`] drops its side of
/// the channel.
pub fn spawn(ctx: ScaleSetWorkerContext, scale_set: ScaleSet) -> ScaleSetWorkerHandle {
    let id = scale_set.id;
    let (tx, rx) = mpsc::channel(8);
    let task = tokio::spawn(run(ctx, scale_set, rx));
    ScaleSetWorkerHandle { id, tx, task }
}

async fn run(ctx: ScaleSetWorkerContext, mut scale_set: ScaleSet, mut rx: mpsc::Receiver<Message>) {
    let mut session = match open_session(&ctx, scale_set.id).await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(scale_set = %scale_set.id, error = %err, "scale-set worker: could not open initial session");
            None
        }
    };

    if scale_set.state == ScaleSetState::Pending {
        if let Err(err) = transition_state(&ctx, &mut scale_set, ScaleSetState::Active).await {
            tracing::warn!(scale_set = %scale_set.id, error = %err, "scale-set worker: failed to mark active");
        }
    }

    let mut reconcile_tick = tokio::time::interval(RECONCILE_INTERVAL);
    reconcile_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Consecutive transient-failure count, reset on a successful poll; drives
    // the degraded backoff schedule (spec §4.3 step 5).
    let mut degraded_attempt: u32 = 0;

    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(Message::Updated(next)) => scale_set = next,
                    Some(Message::Consolidate(runners)) => {
                        if let Err(err) = consolidate(&ctx, &scale_set, &runners).await {
                            tracing::warn!(scale_set = %scale_set.id, error = %err, "scale-set worker: consolidation failed");
                        }
                    }
                    Some(Message::Stop) | None => {
                        stop_and_drain(&ctx, &mut scale_set).await;
                        return;
                    }
                }
            }
            _ = reconcile_tick.tick() => {
                if let Err(err) = reconcile(&ctx, &scale_set).await {
                    tracing::warn!(scale_set = %scale_set.id, error = %err, "scale-set worker: reconciliation failed");
                }
            }
            poll_result = poll_once(&ctx, &mut session, scale_set.id, scale_set.last_message_id) => {
                match poll_result {
                    Ok(messages) => {
                        degraded_attempt = 0;
                        if scale_set.state == ScaleSetState::Degraded {
                            if let Err(err) = transition_state(&ctx, &mut scale_set, ScaleSetState::Active).await {
                                tracing::warn!(scale_set = %scale_set.id, error = %err, "scale-set worker: failed to recover");
                            }
                        }
                        if let Err(err) = process_messages(&ctx, &mut scale_set, messages).await {
                            tracing::warn!(scale_set = %scale_set.id, error = %err, "scale-set worker: failed to process messages");
                        }
                    }
                    Err(GarmError::Unauthorized(msg)) => {
                        // Spec §4.3 step 4: token expiry drops the session and
                        // re-acquires immediately, no degrade, no backoff.
                        tracing::warn!(scale_set = %scale_set.id, error = %msg, "scale-set worker: session unauthorized, re-acquiring");
                        session = None;
                    }
                    Err(err) => {
                        tracing::warn!(scale_set = %scale_set.id, error = %err, "scale-set worker: poll failed, degrading");
                        if scale_set.state == ScaleSetState::Active {
                            if let Err(e) = transition_state(&ctx, &mut scale_set, ScaleSetState::Degraded).await {
                                tracing::warn!(scale_set = %scale_set.id, error = %e, "scale-set worker: failed to mark degraded");
                            }
                        }
                        session = None;
                        tokio::time::sleep(degraded_backoff(degraded_attempt)).await;
                        degraded_attempt = degraded_attempt.saturating_add(1);
                    }
                }
            }
        }
    }
}

async fn stop_and_drain(ctx: &ScaleSetWorkerContext, scale_set: &mut ScaleSet) {
    if scale_set.state == ScaleSetState::Deleted {
        return;
    }
    if let Err(err) = transition_state(ctx, scale_set, ScaleSetState::Deleting).await {
        tracing::warn!(scale_set = %scale_set.id, error = %err, "scale-set worker: failed to mark deleting");
        return;
    }
    match ctx.store.list_all_instances().await {
        Ok(instances) => {
            for mut instance in owned_instances(instances, scale_set.id) {
                if instance.status.is_terminal() || !instance.status.counts_toward_desired() {
                    continue;
                }
                if instance.transition(InstanceStatus::PendingDelete).is_ok() {
                    let _ = ctx.store.update_instance(instance.clone()).await;
                }
            }
        }
        Err(err) => tracing::warn!(scale_set = %scale_set.id, error = %err, "scale-set worker: could not list instances to drain"),
    }
    if let Err(err) = transition_state(ctx, scale_set, ScaleSetState::Deleted).await {
        tracing::warn!(scale_set = %scale_set.id, error = %err, "scale-set worker: failed to mark deleted");
    }
}

async fn transition_state(ctx: &ScaleSetWorkerContext, scale_set: &mut ScaleSet, next: ScaleSetState) -> Result<(), GarmError> {
    if !scale_set.state.can_transition_to(next) {
        return Err(GarmError::Conflict(format!("scale set {} cannot transition from {} to {next}", scale_set.id, scale_set.state)));
    }
    scale_set.state = next;
    ctx.store.update_scale_set(scale_set.clone()).await.map(|_| ())
}

async fn open_session(
    ctx: &ScaleSetWorkerContext,
    scale_set_id: ScaleSetId,
) -> Result<Option<Box<dyn crate::forge::MessageSession>>, GarmError> {
    Ok(Some(ctx.forge_client.create_session(&ctx.entity, scale_set_id).await?))
}

/// Poll for new messages, re-opening the session first if a prior failure
/// tore it down. Returns the raw messages; the caller advances
/// `last_message_id` only after processing succeeds (spec §4.3 step 3).
async fn poll_once(
    ctx: &ScaleSetWorkerContext,
    session: &mut Option<Box<dyn crate::forge::MessageSession>>,
    scale_set_id: ScaleSetId,
    last_message_id: i64,
) -> Result<Vec<crate::forge::ScaleSetMessage>, GarmError> {
    if session.is_none() {
        *session = Some(ctx.forge_client.create_session(&ctx.entity, scale_set_id).await?);
    }
    let Some(active) = session.as_ref() else {
        return Err(GarmError::Conflict("scale-set message session unexpectedly absent after establishing it".to_string()));
    };
    active.get_messages(last_message_id).await
}

/// Process each message in arrival order, advancing and persisting
/// `last_message_id` after *each one* individually (spec §4.3 step 3: "only
/// after successful processing, advance `last_message_id` and persist" —
/// scenario S2 requires one ScaleSet update event per message, not one for
/// the whole batch).
async fn process_messages(
    ctx: &ScaleSetWorkerContext,
    scale_set: &mut ScaleSet,
    messages: Vec<crate::forge::ScaleSetMessage>,
) -> Result<(), GarmError> {
    for message in &messages {
        apply_message(ctx, scale_set, &message.body).await?;
        scale_set.advance_message_id(message.message_id)?;
        ctx.store.set_scale_set_last_message_id(scale_set.id, message.message_id).await?;
    }
    Ok(())
}

async fn apply_message(ctx: &ScaleSetWorkerContext, scale_set: &mut ScaleSet, body: &ScaleSetMessageBody) -> Result<(), GarmError> {
    let entity_id = ctx.entity.id;
    match body {
        ScaleSetMessageBody::JobAvailable { job_id, run_id, labels } => {
            let job = garm_core::Job {
                id: *job_id,
                run_id: *run_id,
                status: JobStatus::Queued,
                conclusion: None,
                labels: labels.clone(),
                locked_by: None,
                scope: scope_for(entity_id, &ctx.entity.kind),
            };
            ctx.store.create_or_update_job(job).await.map(|_| ())
        }
        ScaleSetMessageBody::JobAssigned { job_id } => lock_job(ctx, *job_id, entity_id).await,
        ScaleSetMessageBody::JobStarted { job_id } => set_job_status(ctx, *job_id, JobStatus::InProgress, None).await,
        ScaleSetMessageBody::JobCompleted { job_id, conclusion } => {
            set_job_status(ctx, *job_id, JobStatus::Completed, Some(*conclusion)).await?;
            unlock_job(ctx, *job_id, entity_id).await
        }
        ScaleSetMessageBody::ScaleSetStatistics { desired_runner_count, statistics } => {
            ctx.store.set_scale_set_desired_runner_count(scale_set.id, *desired_runner_count).await?;
            scale_set.desired_runner_count = *desired_runner_count;
            scale_set.statistics = *statistics;
            ctx.store.update_scale_set(scale_set.clone()).await.map(|_| ())
        }
    }
}

fn scope_for(entity_id: EntityId, kind: &garm_core::EntityKind) -> JobScope {
    let id = entity_id.as_uuid();
    match kind {
        garm_core::EntityKind::Repository { .. } => JobScope::Repository { entity_id: id },
        garm_core::EntityKind::Organization { .. } => JobScope::Organization { entity_id: id },
        garm_core::EntityKind::Enterprise { .. } => JobScope::Enterprise { entity_id: id },
    }
}

async fn lock_job(ctx: &ScaleSetWorkerContext, job_id: JobId, entity_id: EntityId) -> Result<(), GarmError> {
    match ctx.store.get_job(job_id).await {
        Ok(mut job) => {
            job.lock(entity_id.as_uuid())?;
            ctx.store.create_or_update_job(job).await.map(|_| ())
        }
        Err(GarmError::NotFound(_)) => {
            tracing::warn!(job = %job_id, "scale-set worker: job assigned before it was ever seen as available");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

async fn unlock_job(ctx: &ScaleSetWorkerContext, job_id: JobId, entity_id: EntityId) -> Result<(), GarmError> {
    match ctx.store.get_job(job_id).await {
        Ok(mut job) => {
            job.unlock(entity_id.as_uuid())?;
            ctx.store.create_or_update_job(job).await.map(|_| ())
        }
        Err(GarmError::NotFound(_)) => Ok(()),
        Err(err) => Err(err),
    }
}

async fn set_job_status(
    ctx: &ScaleSetWorkerContext,
    job_id: JobId,
    status: JobStatus,
    conclusion: Option<garm_core::JobConclusion>,
) -> Result<(), GarmError> {
    match ctx.store.get_job(job_id).await {
        Ok(mut job) => {
            job.status = status;
            if conclusion.is_some() {
                job.conclusion = conclusion;
            }
            ctx.store.create_or_update_job(job).await.map(|_| ())
        }
        Err(GarmError::NotFound(_)) => Ok(()),
        Err(err) => Err(err),
    }
}

fn owned_instances(instances: Vec<Instance>, scale_set_id: ScaleSetId) -> Vec<Instance> {
    instances
        .into_iter()
        .filter(|i| matches!(i.owner, InstanceOwner::ScaleSet { scale_set_id: sid } if sid == scale_set_id))
        .collect()
}

/// Clamp `desired_runner_count + min_idle_runners` against live
/// (non-terminal) instances, creating or marking-for-delete as needed (spec
/// §4.3's reconciliation formula).
async fn reconcile(ctx: &ScaleSetWorkerContext, scale_set: &ScaleSet) -> Result<(), GarmError> {
    let all_instances = ctx.store.list_all_instances().await?;
    let owned = owned_instances(all_instances, scale_set.id);
    let existing = owned.iter().filter(|i| i.status.counts_toward_desired()).count() as u32;
    let target = scale_set.target_runner_count();

    if target > existing {
        for _ in 0..(target - existing) {
            let instance = Instance {
                id: InstanceId::new(),
                name: format!("{}-{}", scale_set.id, uuid::Uuid::new_v4()),
                owner: InstanceOwner::ScaleSet { scale_set_id: scale_set.id },
                provider_id: None,
                agent_id: None,
                os_type: scale_set.os_type,
                os_arch: scale_set.os_arch,
                status: InstanceStatus::PendingCreate,
                runner_status: RunnerStatus::Pending,
                addresses: vec![],
                provider_fault: None,
                status_messages: vec![],
                running_since_unix: None,
                delete_attempts: 0,
            };
            ctx.store.create_scale_set_instance(scale_set.id, instance).await?;
        }
    } else if existing > target {
        let mut surplus = existing - target;
        let owned: Vec<Instance> = owned.into_iter().filter(|i| i.status.counts_toward_desired()).collect();

        // Preference order idle -> creating -> running-unassigned (spec
        // §4.3), ties within a bucket broken oldest-created first. No
        // creation timestamp is persisted on `Instance`, so name order (a
        // random suffix appended to a stable scale-set prefix) stands in as
        // the tie-break, same as the bucket ordering used elsewhere here.
        let idle: Vec<Instance> = owned
            .iter()
            .filter(|i| i.status == InstanceStatus::Running && i.runner_status == RunnerStatus::Idle)
            .cloned()
            .collect();
        let creating: Vec<Instance> = owned
            .iter()
            .filter(|i| matches!(i.status, InstanceStatus::PendingCreate | InstanceStatus::Creating))
            .cloned()
            .collect();
        let running_unassigned: Vec<Instance> = owned
            .iter()
            .filter(|i| i.status == InstanceStatus::Running && i.runner_status != RunnerStatus::Idle && i.runner_status != RunnerStatus::Active)
            .cloned()
            .collect();

        for mut bucket in [idle, creating, running_unassigned] {
            if surplus == 0 {
                break;
            }
            bucket.sort_by(|a, b| a.name.cmp(&b.name));
            for mut instance in bucket {
                if surplus == 0 {
                    break;
                }
                if instance.transition(InstanceStatus::PendingDelete).is_ok() {
                    ctx.store.update_instance(instance.clone()).await?;
                    surplus -= 1;
                }
            }
        }
    }
    Ok(())
}

/// Reconcile forge-observed runners against local instance rows for this
/// scale set (spec §4.3 "Runner consolidation ingress").
///
/// A local instance that's been `Running` for longer than the bootstrap
/// timeout with no matching forge runner is orphaned and marked for
/// deletion. A forge runner with no matching local instance is leaked and
/// the forge is asked to remove it. Instances in `pending_create`/`creating`
/// are never touched here — they may simply not have registered yet.
async fn consolidate(ctx: &ScaleSetWorkerContext, scale_set: &ScaleSet, forge_runners: &[ForgeRunner]) -> Result<(), GarmError> {
    let forge_names: std::collections::HashSet<&str> = forge_runners.iter().map(|r| r.name.as_str()).collect();
    let now = (ctx.now_unix)();
    let bootstrap_timeout_secs = ctx.bootstrap_timeout.as_secs() as i64;

    let all_instances = ctx.store.list_all_instances().await?;
    let owned = owned_instances(all_instances, scale_set.id);
    let local_names: std::collections::HashSet<String> = owned.iter().map(|i| i.name.clone()).collect();

    for mut instance in owned {
        if matches!(instance.status, InstanceStatus::PendingCreate | InstanceStatus::Creating) {
            continue;
        }
        if instance.status != InstanceStatus::Running || forge_names.contains(instance.name.as_str()) {
            continue;
        }
        let running_since = instance.running_since_unix.unwrap_or(now);
        if now - running_since <= bootstrap_timeout_secs {
            continue;
        }
        if instance.transition(InstanceStatus::PendingDelete).is_ok() {
            ctx.store.update_instance(instance.clone()).await?;
        }
    }

    for runner in forge_runners {
        if runner.scale_set_id != Some(scale_set.id) {
            continue;
        }
        if local_names.contains(&runner.name) {
            continue;
        }
        if let Err(err) = ctx.forge_client.remove_runner(&ctx.entity, &runner.name).await {
            tracing::warn!(scale_set = %scale_set.id, runner = %runner.name, error = %err, "consolidation: failed to remove leaked forge runner");
        }
    }

    Ok(())
}

/// Owns every [`ScaleSetWorkerHandle`] for one entity, keyed by scale-set id
/// (spec §4.2/§4.3: the Entity Worker's Scale-Set Controller).
#[derive(Default)]
pub struct ScaleSetController {
    workers: Mutex<HashMap<ScaleSetId, ScaleSetWorkerHandle>>,
}

impl ScaleSetController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start one worker per scale set already persisted for this entity
    /// (spec §4.2 "Start returns only after Scale-Set Controller is up").
    pub async fn start(&self, ctx_factory: impl Fn() -> ScaleSetWorkerContext, scale_sets: Vec<ScaleSet>) {
        let mut workers = self.workers.lock();
        for scale_set in scale_sets {
            if workers.contains_key(&scale_set.id) {
                continue;
            }
            let handle = spawn(ctx_factory(), scale_set);
            workers.insert(handle.id(), handle);
        }
    }

    pub fn dispatch_create_or_update(&self, ctx_factory: impl FnOnce() -> ScaleSetWorkerContext, scale_set: ScaleSet) {
        let mut workers = self.workers.lock();
        match workers.get(&scale_set.id) {
            Some(handle) if !handle.is_finished() => {
                let handle_tx = handle.tx.clone();
                let scale_set_id = scale_set.id;
                tokio::spawn(async move {
                    let _ = handle_tx.send(Message::Updated(scale_set)).await;
                    let _ = scale_set_id;
                });
            }
            _ => {
                let handle = spawn(ctx_factory(), scale_set);
                workers.insert(handle.id(), handle);
            }
        }
    }

    /// Forward this scale set's partition of a consolidation sweep (spec
    /// §4.2's `ConsolidateRunnerState(map[scaleSetID][]Runner)`). A scale set
    /// with no matching worker (not yet started, or already stopped) is
    /// silently skipped.
    pub async fn dispatch_consolidate(&self, scale_set_id: ScaleSetId, runners: Vec<ForgeRunner>) {
        let tx = self.workers.lock().get(&scale_set_id).map(|h| h.tx.clone());
        if let Some(tx) = tx {
            let _ = tx.send(Message::Consolidate(runners)).await;
        }
    }

    pub async fn dispatch_delete(&self, scale_set_id: ScaleSetId) {
        let handle = self.workers.lock().remove(&scale_set_id);
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    /// Stop every worker this controller owns (spec §4.2 Stop ordering:
    /// Scale-Set Controller stops before the entity's own consumer/quit
    /// channel close).
    pub async fn stop_all(&self) {
        let handles: Vec<_> = self.workers.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop().await;
        }
    }
}

#[cfg(test)]
#[path = "scale_set_tests.rs"]
mod tests;
