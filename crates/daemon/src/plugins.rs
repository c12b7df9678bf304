// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Provider plugin discovery (SPEC_FULL.md §B): scan a directory for one
//! executable per provider name and register each as an
//! [`garm_provider::ExecProvider`] (spec §6 "Provider plugin contract").

use std::path::Path;

use garm_provider::{ExecProvider, ProviderRegistry};

use crate::config::Config;
use crate::error::DaemonError;

/// Scan `config.providers_dir` for regular, executable files and register
/// one [`ExecProvider`] per entry, named after the file stem.
pub fn discover(config: &Config, controller_id: &str) -> Result<ProviderRegistry, DaemonError> {
    let mut registry = ProviderRegistry::new();
    let dir = &config.providers_dir;
    let entries = std::fs::read_dir(dir)
        .map_err(|err| DaemonError::PluginDiscovery(format!("reading providers dir {}: {err}", dir.display())))?;

    for entry in entries {
        let entry = entry.map_err(|err| DaemonError::PluginDiscovery(err.to_string()))?;
        let path = entry.path();
        if !is_executable_file(&path) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        let config_file = config.provider_config_file(name);
        let provider = ExecProvider::new(name, path.clone(), config_file, controller_id.to_string());
        registry.register(std::sync::Arc::new(provider));
    }

    Ok(registry)
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
#[path = "plugins_tests.rs"]
mod tests;
