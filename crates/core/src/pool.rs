// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Legacy static-sized runner pools (spec §3; superseded by [`crate::scale_set::ScaleSet`]
//! for new deployments but kept for entities that have not migrated).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, PoolId};
use crate::template::OsType;

/// CPU architecture a pool's instances run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsArch {
    Amd64,
    Arm64,
}

crate::simple_display! {
    OsArch {
        Amd64 => "amd64",
        Arm64 => "arm64",
    }
}

/// A statically sized group of runners for one entity (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
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
    pub enabled: bool,
}

impl Pool {
    /// `runner-pool-id:<uuid>` label a Provider plugin embeds on instances
    /// belonging to this pool, used by Entity Worker consolidation (spec §4.2).
    pub fn pool_label(&self) -> String {
        format!("runner-pool-id:{}", self.id)
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
