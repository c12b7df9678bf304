// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Shared error taxonomy (spec §7).
//!
//! Every fallible operation in the control plane resolves to one of these
//! variants. The taxonomy determines retry behavior: `NotFound` and the
//! `*Request`/`*Type` variants are never retried, `Unauthorized` triggers a
//! credential refresh and one retry, `TransientForgeError` backs off and
//! retries without changing persisted status beyond `degraded`.

use thiserror::Error;

/// Error taxonomy shared by the Store contract, caches, and workers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GarmError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid entity type: {0}")]
    InvalidEntityType(String),

    #[error("invalid operation type: {0}")]
    InvalidOperationType(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("provider fault: {0}")]
    ProviderFault(String),

    #[error("transient forge error: {0}")]
    TransientForgeError(String),
}

impl GarmError {
    /// Whether this error should never be retried by the caller.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GarmError::NotFound(_)
                | GarmError::BadRequest(_)
                | GarmError::InvalidEntityType(_)
                | GarmError::InvalidOperationType(_)
        )
    }

    /// Whether this error should be retried with backoff without flipping
    /// the owning resource to a failed/error status.
    pub fn is_transient(&self) -> bool {
        matches!(self, GarmError::TransientForgeError(_))
    }
}
