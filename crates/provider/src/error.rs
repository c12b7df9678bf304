// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Provider plugin invocation errors (spec §6, §7).

use thiserror::Error;

/// Errors raised invoking a provider plugin executable.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {0:?} not found in plugin directory")]
    UnknownProvider(String),

    #[error("failed to spawn provider plugin: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("provider plugin reported instance not found")]
    NotFound,

    #[error("provider plugin reported a duplicate instance")]
    Duplicate,

    #[error("provider plugin exited with code {code}: {stderr}")]
    PluginFailed { code: i32, stderr: String },

    #[error("provider plugin produced malformed output: {0}")]
    MalformedOutput(String),

    #[error("provider plugin timed out")]
    Timeout,
}

impl ProviderError {
    /// Whether the Instance Manager should treat this as "already gone" and
    /// proceed as if the operation succeeded (spec §7: Conflict/Duplicate are
    /// "treated as idempotent success" for providers).
    pub fn is_idempotent_success(&self) -> bool {
        matches!(self, ProviderError::NotFound | ProviderError::Duplicate)
    }
}
