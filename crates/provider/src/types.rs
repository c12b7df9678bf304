// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Wire types exchanged with a provider plugin over stdin/stdout (spec §6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use garm_core::{OsArch, OsType};

/// Controller-wide parameters passed to every plugin invocation, independent
/// of the specific operation (metadata/callback URLs live here rather than
/// in env vars since they're multi-valued strings, not simple scalars).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseParams {
    pub metadata_url: String,
    pub callback_url: String,
    pub webhook_url: String,
    pub controller_id: String,
}

/// The JSON payload piped to a plugin's stdin for `GARM_COMMAND=CreateInstance`
/// (spec §4.4 Create protocol, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapInstance {
    pub name: String,
    pub tools: Vec<serde_json::Value>,
    pub forge_url: String,
    pub jit_token: String,
    pub os_type: OsType,
    pub os_arch: OsArch,
    pub flavor: String,
    pub image: String,
    #[serde(default)]
    pub extra_specs: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_runner_group: Option<String>,
    pub base_params: BaseParams,
}

/// Provider-reported instance status, distinct from [`garm_core::InstanceStatus`]
/// (the provider only ever reports "did this succeed", not the full DAG).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderInstanceStatus {
    Running,
    Stopped,
    Error,
}

/// The JSON object a plugin writes to stdout on success (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub provider_id: String,
    pub name: String,
    pub os_type: OsType,
    pub os_arch: OsArch,
    pub status: ProviderInstanceStatus,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}
