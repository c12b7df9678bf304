// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! `garmd`'s own error taxonomy: failures in config loading, plugin
//! discovery, and startup/shutdown orchestration that sit above the
//! per-crate taxonomies in `garm_core`/`garm_store`/`garm_controlplane`
//! (SPEC_FULL.md §A.2).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("config error: {0}")]
    Config(String),

    #[error("provider plugin discovery failed: {0}")]
    PluginDiscovery(String),

    #[error(transparent)]
    Garm(#[from] garm_core::GarmError),

    #[error(transparent)]
    ControlPlane(#[from] garm_controlplane::ControlPlaneError),

    #[error("signal handling error: {0}")]
    Signal(#[from] std::io::Error),
}
