// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Identifier newtypes for every persisted entity kind (spec §3).
//!
//! `ForgeCredentials` uses a numeric id and `ForgeEndpoint` is name-keyed;
//! everything else identifies itself with an opaque UUID.

crate::define_uuid_id! {
    /// Identifies a `ForgeEntity` (Repository, Organization, or Enterprise).
    pub struct EntityId;
}

crate::define_uuid_id! {
    /// Identifies a `Template`.
    pub struct TemplateId;
}

crate::define_uuid_id! {
    /// Identifies a `Pool`.
    pub struct PoolId;
}

crate::define_uuid_id! {
    /// Identifies a `ScaleSet`.
    pub struct ScaleSetId;
}

crate::define_uuid_id! {
    /// Identifies an `Instance`.
    pub struct InstanceId;
}

crate::define_uuid_id! {
    /// Identifies a `Job`.
    pub struct JobId;
}

crate::define_uuid_id! {
    /// Identifies a `User`.
    pub struct UserId;
}

crate::define_uuid_id! {
    /// Identifies the singleton `ControllerInfo` row (and doubles as the
    /// controller's own identity, e.g. `GARM_CONTROLLER_ID`).
    pub struct ControllerId;
}

/// `ForgeCredentials` identity: a numeric id, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CredentialsId(pub i64);

impl std::fmt::Display for CredentialsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for CredentialsId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
