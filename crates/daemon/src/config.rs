// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! `garmd`'s process configuration (SPEC_FULL.md §A.3): a TOML file
//! describing the controller's externally-reachable URLs, where provider
//! plugin executables live, and the handful of tuning knobs the control
//! plane needs. Every field may be overridden by an environment variable
//! for container deployments (see [`crate::env`]).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::env;
use crate::error::DaemonError;

fn default_bootstrap_timeout_secs() -> u64 {
    3600
}

fn default_status_message_retention() -> usize {
    50
}

fn default_hostname() -> String {
    "garm".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    pub metadata_base_url: String,
    pub callback_base_url: String,
    pub webhook_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub controller: ControllerConfig,

    /// Directory scanned at startup for one executable per provider name
    /// (SPEC_FULL.md §B "Provider plugin discovery").
    pub providers_dir: PathBuf,

    /// Per-provider config file path passed to the plugin via
    /// `GARM_PROVIDER_CONFIG_FILE` (spec §6), keyed by provider name.
    /// A provider discovered in `providers_dir` with no entry here falls
    /// back to `providers_dir/<name>.toml`.
    #[serde(default)]
    pub provider_config_files: HashMap<String, PathBuf>,

    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default = "default_bootstrap_timeout_secs")]
    pub bootstrap_timeout_secs: u64,

    #[serde(default = "default_status_message_retention")]
    pub status_message_retention: usize,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self, DaemonError> {
        let raw = std::fs::read_to_string(path).map_err(|err| DaemonError::Config(format!("reading {}: {err}", path.display())))?;
        let mut config: Config =
            toml::from_str(&raw).map_err(|err| DaemonError::Config(format!("parsing {}: {err}", path.display())))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(dir) = env::state_dir() {
            self.state_dir = Some(dir);
        }
        if let Some(level) = env::log_level() {
            self.log_level = Some(level);
        }
        if let Some(url) = env::metadata_base_url() {
            self.controller.metadata_base_url = url;
        }
        if let Some(url) = env::callback_base_url() {
            self.controller.callback_base_url = url;
        }
        if let Some(url) = env::webhook_base_url() {
            self.controller.webhook_base_url = url;
        }
        if let Some(timeout) = env::bootstrap_timeout() {
            self.bootstrap_timeout_secs = timeout.as_secs();
        }
        if let Some(dir) = env::providers_dir() {
            self.providers_dir = dir;
        }
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// The config file a discovered provider named `name` should be invoked
    /// with, honoring an explicit override before falling back to the
    /// `providers_dir/<name>.toml` convention.
    pub fn provider_config_file(&self, name: &str) -> PathBuf {
        self.provider_config_files.get(name).cloned().unwrap_or_else(|| self.providers_dir.join(format!("{name}.toml")))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
