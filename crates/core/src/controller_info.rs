// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! The singleton controller identity row (spec §3).

use serde::{Deserialize, Serialize};

use crate::forge::SecretBytes;
use crate::ids::ControllerId;

/// Created once on first run; every other component treats this as
/// read-only after `InitController` (spec §3 Lifecycle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub controller_id: ControllerId,
    pub hostname: String,
    pub metadata_base_url: String,
    pub callback_base_url: String,
    pub webhook_base_url: String,
    /// Key material for signing JIT instance tokens (SPEC_FULL.md §B).
    pub jit_signing_secret: SecretBytes,
}

impl ControllerInfo {
    pub fn new(
        hostname: impl Into<String>,
        metadata_base_url: impl Into<String>,
        callback_base_url: impl Into<String>,
        webhook_base_url: impl Into<String>,
        jit_signing_secret: SecretBytes,
    ) -> Self {
        Self {
            controller_id: ControllerId::new(),
            hostname: hostname.into(),
            metadata_base_url: metadata_base_url.into(),
            callback_base_url: callback_base_url.into(),
            webhook_base_url: webhook_base_url.into(),
            jit_signing_secret,
        }
    }
}

#[cfg(test)]
#[path = "controller_info_tests.rs"]
mod tests;
