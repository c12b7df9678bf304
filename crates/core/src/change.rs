// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! The mutation event carried on the [`crate::bus::Bus`] (spec §4.1).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every persisted entity kind the Store can emit a mutation for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Endpoint,
    Credentials,
    Repository,
    Organization,
    Enterprise,
    Template,
    Pool,
    ScaleSet,
    Instance,
    Job,
    User,
    Controller,
}

crate::simple_display! {
    EntityType {
        Endpoint => "endpoint",
        Credentials => "credentials",
        Repository => "repository",
        Organization => "organization",
        Enterprise => "enterprise",
        Template => "template",
        Pool => "pool",
        ScaleSet => "scale_set",
        Instance => "instance",
        Job => "job",
        User => "user",
        Controller => "controller",
    }
}

impl EntityType {
    /// The three `ForgeEntity` variants, grouped for filters like the Entity
    /// Controller's `entity_type ∈ {repo, org, enterprise}`.
    pub fn is_forge_entity(self) -> bool {
        matches!(self, EntityType::Repository | EntityType::Organization | EntityType::Enterprise)
    }
}

/// The kind of mutation that produced a [`ChangePayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

crate::simple_display! {
    Operation {
        Create => "create",
        Update => "update",
        Delete => "delete",
    }
}

/// An identity-only shell carried by delete payloads.
///
/// Per §9's open question, a credential delete emits only `{id, name}` —
/// downstream consumers must not assume the full object is present, so this
/// type deliberately has no fields beyond what every entity kind can supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityShell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IdentityShell {
    pub fn by_id(id: Uuid) -> Self {
        Self { id: Some(id), name: None }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self { id: None, name: Some(name.into()) }
    }
}

/// A typed mutation event: `{entity_type, operation, payload}` (spec §4.1).
///
/// `payload` is the post-mutation object for create/update, or an
/// [`IdentityShell`] for delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePayload {
    pub entity_type: EntityType,
    pub operation: Operation,
    pub payload: serde_json::Value,
}

impl ChangePayload {
    pub fn create(entity_type: EntityType, payload: impl Serialize) -> Self {
        Self {
            entity_type,
            operation: Operation::Create,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn update(entity_type: EntityType, payload: impl Serialize) -> Self {
        Self {
            entity_type,
            operation: Operation::Update,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn delete(entity_type: EntityType, identity: IdentityShell) -> Self {
        Self {
            entity_type,
            operation: Operation::Delete,
            payload: serde_json::to_value(identity).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Best-effort extraction of a `credentials_id`-shaped field from the
    /// payload, used by [`crate::bus::Filter::by_credentials`].
    pub fn credentials_id(&self) -> Option<i64> {
        self.payload.get("credentials_id").and_then(|v| v.as_i64())
    }

    /// Best-effort extraction of a `scale_set_id`-shaped field from the
    /// payload, used by [`crate::bus::Filter::by_scale_set`].
    pub fn scale_set_id(&self) -> Option<Uuid> {
        self.payload
            .get("scale_set_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Best-effort extraction of an `id` field from the payload.
    pub fn entity_id(&self) -> Option<Uuid> {
        self.payload.get("id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Best-effort extraction of a `user_id`-shaped field from the payload.
    pub fn user_id(&self) -> Option<Uuid> {
        self.payload
            .get("user_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Best-effort extraction of a `status`-shaped field from the payload.
    pub fn instance_status(&self) -> Option<String> {
        self.payload.get("status").and_then(|v| v.as_str()).map(str::to_string)
    }
}

#[cfg(test)]
#[path = "change_tests.rs"]
mod tests;
