// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Forge endpoints and credentials (spec §3).

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::ids::CredentialsId;

/// The code forge a [`crate::entity::ForgeEntity`] is registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForgeKind {
    Github,
    Gitea,
}

crate::simple_display! {
    ForgeKind {
        Github => "github",
        Gitea => "gitea",
    }
}

/// How a [`ForgeCredentials`] authenticates to its forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Personal access token.
    Pat,
    /// GitHub App installation credentials.
    App,
}

crate::simple_display! {
    AuthMethod {
        Pat => "pat",
        App => "app",
    }
}

/// A name-keyed forge endpoint: base URL, API URL, optional upload URL, and
/// CA bundle (spec §3). Name-keyed rather than UUID-keyed because operators
/// refer to endpoints by a human-chosen name (e.g. `"github.com"`, a Gitea
/// host) and endpoints are few and long-lived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeEndpoint {
    pub name: String,
    pub forge_kind: ForgeKind,
    pub base_url: String,
    pub api_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_bundle: Option<Vec<u8>>,
}

/// Secret material held only as an opaque, zeroizing wrapper (spec I4).
///
/// Plaintext exists only transiently in the process that decrypted it;
/// `Debug` never prints the contents.
#[derive(Clone, Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretBytes(REDACTED)")
    }
}

impl PartialEq for SecretBytes {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Forge credentials: forge kind, auth method, sealed secret, and a
/// monotonic generation counter bumped on every rotation so an Entity
/// Worker holding a stale forge client can detect it needs rebuilding
/// (spec §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeCredentials {
    pub id: CredentialsId,
    pub name: String,
    pub forge_kind: ForgeKind,
    pub auth_method: AuthMethod,
    pub endpoint_name: String,
    pub secret: SecretBytes,
    pub generation: u64,
}

impl ForgeCredentials {
    /// A new generation number after rotating `secret`.
    pub fn next_generation(&self) -> u64 {
        self.generation.saturating_add(1)
    }
}

#[cfg(test)]
#[path = "forge_tests.rs"]
mod tests;
