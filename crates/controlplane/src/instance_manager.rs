// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! The Instance Manager: one cooperative task per instance, driving the
//! create/delete state machine against a Provider plugin (spec §4.4).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use garm_core::{
    delete_backoff, ControllerInfo, EntityId, GarmError, Instance, InstanceStatus, JitClaims,
};
use garm_provider::{BaseParams, BootstrapInstance, Provider, ProviderInstanceStatus};
use garm_store::Store;

/// Deadline for a single `send_update` call into a manager's mailbox
/// (spec §5: "Instance Manager update ingress: 10 s").
pub const UPDATE_INGRESS_DEADLINE: Duration = Duration::from_secs(10);

enum Message {
    Updated(Instance),
    Stop,
}

/// A handle the Provider Worker holds per live Instance Manager.
pub struct InstanceManagerHandle {
    name: String,
    tx: mpsc::Sender<Message>,
    task: JoinHandle<()>,
}

impl InstanceManagerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// A cheap `Clone`-able sender, for forwarding updates without holding
    /// the Provider Worker's manager-map lock across an `await`.
    pub fn sender(&self) -> InstanceManagerSender {
        InstanceManagerSender { name: self.name.clone(), tx: self.tx.clone() }
    }

    /// Forward a Store update to this manager. A closed channel (the
    /// manager has already exited) is treated as a no-op, never an error —
    /// spec §9's open question mandates this rather than surfacing "send to
    /// dead actor" as a caller-visible failure.
    pub async fn send_update(&self, instance: Instance) -> Result<(), GarmError> {
        self.sender().send_update(instance).await
    }

    /// Stop the manager and wait for its task to exit.
    pub async fn stop(self) {
        let _ = self.tx.send(Message::Stop).await;
        let _ = self.task.await;
    }
}

/// A clonable handle for pushing updates into a manager's mailbox, split out
/// from [`InstanceManagerHandle`] so callers don't need the owning
/// `JoinHandle` just to forward a message.
#[derive(Clone)]
pub struct InstanceManagerSender {
    name: String,
    tx: mpsc::Sender<Message>,
}

impl InstanceManagerSender {
    pub async fn send_update(&self, instance: Instance) -> Result<(), GarmError> {
        match tokio::time::timeout(UPDATE_INGRESS_DEADLINE, self.tx.send(Message::Updated(instance))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Ok(()),
            Err(_) => Err(GarmError::Conflict(format!("instance manager {} did not accept update within 10s", self.name))),
        }
    }
}

/// Dependencies an Instance Manager needs to drive its state machine,
/// grouped so [`spawn`] doesn't take an unwieldy parameter list.
pub struct InstanceManagerContext {
    pub store: Arc<dyn Store>,
    pub provider: Arc<dyn Provider>,
    pub controller_info: ControllerInfo,
    pub entity_id: EntityId,
    pub pool_id: String,
    pub forge_url: String,
    pub bootstrap_tools: Vec<serde_json::Value>,
    pub flavor: String,
    pub image: String,
    pub extra_specs: std::collections::HashMap<String, serde_json::Value>,
    pub github_runner_group: Option<String>,
    pub bootstrap_timeout: Duration,
    /// Number of `status_messages` entries retained per instance
    /// (SPEC_FULL.md §B bounded status-event retention).
    pub status_message_retention: usize,
    pub now_unix: Arc<dyn Fn() -> i64 + Send + Sync>,
}

/// Spawn a manager for `instance`, seeded with its current Store row.
pub fn spawn(ctx: InstanceManagerContext, instance: Instance) -> InstanceManagerHandle {
    let ctx = Arc::new(ctx);
    let name = instance.name.clone();
    let (tx, mut rx) = mpsc::channel(8);
    let initial = instance;
    let task = tokio::spawn(async move {
        let mut current = initial;
        if !drive_cancelable(&ctx, &mut current, &mut rx).await {
            return;
        }
        loop {
            if current.status.is_terminal() {
                break;
            }
            match rx.recv().await {
                Some(Message::Updated(next)) => {
                    current = next;
                    if !drive_cancelable(&ctx, &mut current, &mut rx).await {
                        return;
                    }
                }
                Some(Message::Stop) | None => break,
            }
        }
    });
    InstanceManagerHandle { name, tx, task }
}

/// Run `drive` on its own task so a `Stop` arriving mid-backoff can abort it
/// promptly, instead of waiting out the delete-retry schedule's up-to-5-minute
/// sleep (spec §5: every blocking wait must observe cancellation).
///
/// An `Updated` message arriving while `drive` is in flight is held and
/// applied once `drive` returns — the in-flight call keeps running against
/// the instance it started with, since its own state (create/delete retries)
/// isn't meaningfully resumable mid-flight. Returns `false` if the manager
/// should stop without waiting for `drive` to finish naturally.
async fn drive_cancelable(ctx: &Arc<InstanceManagerContext>, instance: &mut Instance, rx: &mut mpsc::Receiver<Message>) -> bool {
    let mut snapshot = instance.clone();
    let ctx_for_task = ctx.clone();
    let mut handle = tokio::spawn(async move {
        let result = drive(&ctx_for_task, &mut snapshot).await;
        (snapshot, result)
    });

    let mut queued_update = None;
    loop {
        tokio::select! {
            res = &mut handle => {
                match res {
                    Ok((driven, Ok(()))) => *instance = driven,
                    Ok((driven, Err(err))) => {
                        *instance = driven;
                        tracing::warn!(instance = %instance.name, error = %err, "instance manager: drive failed");
                    }
                    Err(join_err) => {
                        tracing::warn!(error = %join_err, "instance manager: drive task did not complete");
                    }
                }
                if let Some(update) = queued_update {
                    *instance = update;
                }
                return true;
            }
            msg = rx.recv() => {
                match msg {
                    Some(Message::Stop) | None => {
                        handle.abort();
                        return false;
                    }
                    Some(Message::Updated(next)) => queued_update = Some(next),
                }
            }
        }
    }
}

/// Drive `instance` forward by exactly one protocol step appropriate to its
/// current status, looping internally through the delete-retry backoff
/// schedule (spec §4.4) since that schedule is this manager's own concern,
/// not something that waits on further bus events.
async fn drive(ctx: &InstanceManagerContext, instance: &mut Instance) -> Result<(), GarmError> {
    match instance.status {
        InstanceStatus::PendingCreate => create(ctx, instance).await,
        InstanceStatus::PendingDelete | InstanceStatus::PendingForceDelete => delete_with_retries(ctx, instance).await,
        _ => Ok(()),
    }
}

async fn persist(ctx: &InstanceManagerContext, instance: &Instance) -> Result<(), GarmError> {
    ctx.store.update_instance(instance.clone()).await.map(|_| ())
}

async fn create(ctx: &InstanceManagerContext, instance: &mut Instance) -> Result<(), GarmError> {
    instance.transition(InstanceStatus::Creating)?;
    persist(ctx, instance).await?;

    let scale_set_id = match instance.owner {
        garm_core::InstanceOwner::ScaleSet { scale_set_id } => scale_set_id,
        garm_core::InstanceOwner::Pool { .. } => {
            return Err(GarmError::BadRequest("instance manager only drives scale-set instances".to_string()));
        }
    };

    let claims = JitClaims {
        instance_name: instance.name.clone(),
        entity_id: ctx.entity_id,
        scale_set_id,
        expires_at_unix: (ctx.now_unix)() + ctx.bootstrap_timeout.as_secs() as i64,
    };
    let jit_token = garm_core::jit_token::sign(&claims, ctx.controller_info.jit_signing_secret.expose())?;

    let base_params = BaseParams {
        metadata_url: ctx.controller_info.metadata_base_url.clone(),
        callback_url: ctx.controller_info.callback_base_url.clone(),
        webhook_url: ctx.controller_info.webhook_base_url.clone(),
        controller_id: ctx.controller_info.controller_id.to_string(),
    };
    let args = BootstrapInstance {
        name: instance.name.clone(),
        tools: ctx.bootstrap_tools.clone(),
        forge_url: ctx.forge_url.clone(),
        jit_token,
        os_type: instance.os_type,
        os_arch: instance.os_arch,
        flavor: ctx.flavor.clone(),
        image: ctx.image.clone(),
        extra_specs: ctx.extra_specs.clone(),
        github_runner_group: ctx.github_runner_group.clone(),
        base_params: base_params.clone(),
    };

    match ctx.provider.create_instance(&ctx.pool_id, &instance.name, &args, &base_params).await {
        Ok(provider_instance) if provider_instance.status == ProviderInstanceStatus::Error => {
            let fault = provider_instance.fault.clone().unwrap_or_else(|| "provider reported error status".to_string());
            tracing::warn!(instance = %instance.name, fault = %fault, "instance create: provider reported error");
            let _ = ctx.provider.delete_instance(&ctx.pool_id, &instance.name).await;
            instance.provider_fault = Some(fault.clone());
            instance.push_status_message(ctx.status_message_retention, fault, (ctx.now_unix)());
            instance.transition(InstanceStatus::Error)?;
            persist(ctx, instance).await
        }
        Ok(provider_instance) => {
            instance.provider_id = Some(provider_instance.provider_id);
            instance.addresses = provider_instance.addresses;
            instance.os_type = provider_instance.os_type;
            instance.os_arch = provider_instance.os_arch;
            instance.transition(InstanceStatus::Running)?;
            instance.running_since_unix = Some((ctx.now_unix)());
            persist(ctx, instance).await
        }
        Err(err) => {
            tracing::warn!(instance = %instance.name, error = %err, "instance create: provider call failed");
            let _ = ctx.provider.delete_instance(&ctx.pool_id, &instance.name).await;
            instance.provider_fault = Some(err.to_string());
            instance.push_status_message(ctx.status_message_retention, err.to_string(), (ctx.now_unix)());
            instance.transition(InstanceStatus::Error)?;
            persist(ctx, instance).await
        }
    }
}

async fn delete_with_retries(ctx: &InstanceManagerContext, instance: &mut Instance) -> Result<(), GarmError> {
    // PendingForceDelete has no Deleting intermediate in the DAG (I2): one
    // best-effort attempt, then unconditionally terminal.
    if instance.status == InstanceStatus::PendingForceDelete {
        let identifier = instance.delete_identifier().to_string();
        if let Err(err) = ctx.provider.delete_instance(&ctx.pool_id, &identifier).await {
            if !err.is_idempotent_success() {
                tracing::warn!(instance = %instance.name, error = %err, "force delete: swallowing provider error");
                let _ = ctx
                    .store
                    .add_entity_event(
                        ctx.entity_id,
                        "instance_force_delete_error",
                        garm_store::EventLevel::Error,
                        &format!("force delete of {} failed: {err}", instance.name),
                        7,
                    )
                    .await;
            }
        }
        instance.transition(InstanceStatus::Deleted)?;
        return persist(ctx, instance).await;
    }

    instance.transition(InstanceStatus::Deleting)?;
    persist(ctx, instance).await?;

    loop {
        let identifier = instance.delete_identifier().to_string();
        match ctx.provider.delete_instance(&ctx.pool_id, &identifier).await {
            Ok(()) => {
                instance.transition(InstanceStatus::Deleted)?;
                return persist(ctx, instance).await;
            }
            Err(err) => {
                tracing::warn!(instance = %instance.name, error = %err, "delete failed, will retry");
                let backoff = delete_backoff(instance.delete_attempts);
                instance.provider_fault = Some(err.to_string());
                instance.transition(InstanceStatus::PendingDelete)?;
                persist(ctx, instance).await?;
                tokio::time::sleep(backoff).await;
                instance.transition(InstanceStatus::Deleting)?;
                persist(ctx, instance).await?;
            }
        }
    }
}

#[cfg(test)]
#[path = "instance_manager_tests.rs"]
mod tests;
