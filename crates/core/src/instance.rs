// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Instances: the per-runner lifecycle row driven by the Instance Manager
//! state machine (spec §3, §4.4).

use serde::{Deserialize, Serialize};

use crate::error::GarmError;
use crate::ids::{InstanceId, PoolId, ScaleSetId};
use crate::pool::OsArch;
use crate::template::OsType;

/// Which grouping owns an [`Instance`] (I1: exactly one of pool or scale set,
/// never both, never neither).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstanceOwner {
    Pool { pool_id: PoolId },
    ScaleSet { scale_set_id: ScaleSetId },
}

/// Observable lifecycle status (spec §4.4's DAG). `Deleted` is terminal (I2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    PendingCreate,
    Creating,
    Running,
    PendingDelete,
    PendingForceDelete,
    Deleting,
    Deleted,
    Error,
}

crate::simple_display! {
    InstanceStatus {
        PendingCreate => "pending_create",
        Creating => "creating",
        Running => "running",
        PendingDelete => "pending_delete",
        PendingForceDelete => "pending_force_delete",
        Deleting => "deleting",
        Deleted => "deleted",
        Error => "error",
    }
}

impl InstanceStatus {
    /// `true` for every status the reconciler in spec §4.3 treats as "already
    /// accounted for" when computing `existing`.
    pub fn counts_toward_desired(self) -> bool {
        !matches!(
            self,
            InstanceStatus::PendingDelete
                | InstanceStatus::PendingForceDelete
                | InstanceStatus::Deleting
                | InstanceStatus::Deleted
                | InstanceStatus::Error
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Deleted)
    }

    /// Validate one edge of the DAG in spec §4.4. Force-delete can be
    /// requested from any non-terminal status.
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        if next == PendingForceDelete {
            return self != Deleted;
        }
        matches!(
            (self, next),
            (PendingCreate, Creating)
                | (Creating, Running)
                | (Creating, Error)
                | (Running, PendingDelete)
                | (PendingCreate, Error)
                | (Error, PendingDelete)
                // A scale-down can cancel a runner that has not finished
                // provisioning yet (spec §4.3 reconciliation preference
                // order names "creating" as a delete candidate).
                | (PendingCreate, PendingDelete)
                | (Creating, PendingDelete)
                | (PendingDelete, Deleting)
                | (Deleting, Deleted)
                | (Deleting, PendingDelete)
                | (PendingForceDelete, Deleted)
        )
    }
}

/// Runner registration status as last reported by the forge, independent of
/// [`InstanceStatus`] (the provider-side lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Pending,
    Idle,
    Active,
    Offline,
}

crate::simple_display! {
    RunnerStatus {
        Pending => "pending",
        Idle => "idle",
        Active => "active",
        Offline => "offline",
    }
}

/// A single bounded-retention status message attached to an instance, surfaced
/// to operators when a create/delete attempt fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub timestamp_unix: i64,
    pub message: String,
}

/// A compute instance backing (or about to back) a CI runner (spec §3, §4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub owner: InstanceOwner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<i64>,
    pub os_type: OsType,
    pub os_arch: OsArch,
    pub status: InstanceStatus,
    pub runner_status: RunnerStatus,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_fault: Option<String>,
    #[serde(default)]
    pub status_messages: Vec<StatusMessage>,
    /// Backoff attempt counter for the delete protocol's 1s,2s,4s,... schedule
    /// (spec §4.4, §5), reset to zero whenever a delete attempt succeeds.
    #[serde(default)]
    pub delete_attempts: u32,
    /// Unix timestamp of the most recent transition into `Running`, used by
    /// the Scale-Set Worker's consolidation ingress (spec §4.3) to tell a
    /// runner that simply hasn't registered yet from one that's been up
    /// longer than the bootstrap timeout with no matching forge runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_since_unix: Option<i64>,
}

/// The delete-retry schedule: 1s, doubling, capped at 5 minutes (spec §5).
pub fn delete_backoff(attempts: u32) -> std::time::Duration {
    let capped_shift = attempts.min(8);
    let secs = 1u64.saturating_shl(capped_shift);
    std::time::Duration::from_secs(secs.min(300))
}

impl Instance {
    /// The identifier the Provider plugin's delete call should use: prefer
    /// `provider_id`, fall back to `name` (spec §4.4 Delete protocol).
    pub fn delete_identifier(&self) -> &str {
        self.provider_id.as_deref().unwrap_or(&self.name)
    }

    /// Append a status message, retaining only the most recent `limit`
    /// entries (SPEC_FULL.md §B bounded status-event retention).
    pub fn push_status_message(&mut self, limit: usize, message: impl Into<String>, timestamp_unix: i64) {
        self.status_messages.push(StatusMessage {
            timestamp_unix,
            message: message.into(),
        });
        let len = self.status_messages.len();
        if len > limit {
            self.status_messages.drain(0..len - limit);
        }
    }

    /// Attempt a status transition, validating it against the DAG (I2).
    pub fn transition(&mut self, next: InstanceStatus) -> Result<(), GarmError> {
        if !self.status.can_transition_to(next) {
            return Err(GarmError::Conflict(format!(
                "instance {} cannot transition from {} to {next}",
                self.name, self.status
            )));
        }
        if next == InstanceStatus::PendingDelete && self.status == InstanceStatus::Deleting {
            self.delete_attempts += 1;
        }
        if next == InstanceStatus::Deleted {
            self.delete_attempts = 0;
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
