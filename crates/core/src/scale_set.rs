// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Scale sets: the dynamically reconciled successor to [`crate::pool::Pool`]
//! (spec §3, §4.3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, ScaleSetId};
use crate::pool::OsArch;
use crate::template::OsType;

/// Externally observed lifecycle state of a [`ScaleSet`] row (spec §4.3).
///
/// `pending -> active <-> degraded -> deleting -> deleted`. `degraded` loops
/// back to `active` once the message session recovers; `deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleSetState {
    Pending,
    Active,
    Degraded,
    Deleting,
    Deleted,
}

crate::simple_display! {
    ScaleSetState {
        Pending => "pending",
        Active => "active",
        Degraded => "degraded",
        Deleting => "deleting",
        Deleted => "deleted",
    }
}

impl ScaleSetState {
    /// Valid direct transitions per the state diagram in spec §4.3.
    pub fn can_transition_to(self, next: ScaleSetState) -> bool {
        use ScaleSetState::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Active, Degraded)
                | (Degraded, Active)
                | (Active, Deleting)
                | (Degraded, Deleting)
                | (Pending, Deleting)
                | (Deleting, Deleted)
        )
    }
}

/// Point-in-time counters the Scale-Set Worker reports for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSetStatistics {
    pub idle_runners: u32,
    pub busy_runners: u32,
    pub pending_runners: u32,
}

/// A dynamically reconciled group of runners for one entity (spec §3, §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleSet {
    pub id: ScaleSetId,
    pub entity_id: EntityId,
    pub provider_name: String,
    pub image: String,
    pub flavor: String,
    pub os_type: OsType,
    pub os_arch: OsArch,
    #[serde(default)]
    pub tags: Vec<String>,
    pub min_idle_runners: u32,
    pub max_runners: u32,
    #[serde(default)]
    pub extra_specs: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_runner_group: Option<String>,
    /// Monotonic non-decreasing cursor into the forge's message stream (I3).
    pub last_message_id: i64,
    pub desired_runner_count: u32,
    pub state: ScaleSetState,
    #[serde(default)]
    pub statistics: ScaleSetStatistics,
}

impl ScaleSet {
    /// Clamp `desired_runner_count + min_idle_runners` into `[0, max_runners]`,
    /// per the reconciliation formula in spec §4.3.
    pub fn target_runner_count(&self) -> u32 {
        (self.desired_runner_count + self.min_idle_runners).min(self.max_runners)
    }

    /// Attempt to persist a new `last_message_id`; rejects any value that
    /// would violate monotonicity (I3).
    pub fn advance_message_id(&mut self, new_id: i64) -> Result<(), crate::error::GarmError> {
        if new_id < self.last_message_id {
            return Err(crate::error::GarmError::BadRequest(format!(
                "message id {new_id} is behind current cursor {}",
                self.last_message_id
            )));
        }
        self.last_message_id = new_id;
        Ok(())
    }
}

#[cfg(test)]
#[path = "scale_set_tests.rs"]
mod tests;
