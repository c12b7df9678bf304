// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! `ForgeEntity`: the repo/org/enterprise sum type (spec §3).

use serde::{Deserialize, Serialize};

use crate::forge::SecretBytes;
use crate::ids::{CredentialsId, EntityId};

/// How runners are balanced across multiple pools/scale-sets on one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolBalancerType {
    /// Spread runner demand roughly evenly across eligible pools.
    RoundRobin,
    /// Always prefer the first eligible pool.
    Pack,
}

impl Default for PoolBalancerType {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// The three shapes a forge entity can take.
///
/// Modeled as a single tagged enum rather than three structs plus a
/// discriminant field — the payload fields differ per variant (a
/// Repository needs `owner` + `name`, an Organization or Enterprise only
/// `name`) and callers almost always want to match on "which kind is this"
/// immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKind {
    Repository { owner: String, name: String },
    Organization { name: String },
    Enterprise { name: String },
}

impl EntityKind {
    /// The forge-facing display name used in `runner-pool-id:<uuid>` style
    /// labels and log lines (e.g. `"owner/name"` for a repository).
    pub fn display_name(&self) -> String {
        match self {
            EntityKind::Repository { owner, name } => format!("{owner}/{name}"),
            EntityKind::Organization { name } | EntityKind::Enterprise { name } => name.clone(),
        }
    }

    pub fn entity_type(&self) -> crate::change::EntityType {
        match self {
            EntityKind::Repository { .. } => crate::change::EntityType::Repository,
            EntityKind::Organization { .. } => crate::change::EntityType::Organization,
            EntityKind::Enterprise { .. } => crate::change::EntityType::Enterprise,
        }
    }
}

/// A forge entity: a repo, org, or enterprise GARM manages runners for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub credentials_id: CredentialsId,
    pub endpoint_name: String,
    pub webhook_secret: SecretBytes,
    #[serde(default)]
    pub pool_balancer_type: PoolBalancerType,
}

impl ForgeEntity {
    pub fn entity_type(&self) -> crate::change::EntityType {
        self.kind.entity_type()
    }
}

#[cfg(test)]
#[path = "entity_tests.rs"]
mod tests;
