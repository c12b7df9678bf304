// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Typed environment-variable overrides for `garmd` (SPEC_FULL.md §A.3).
//!
//! Every config value loaded from the TOML file may be overridden for
//! container deployments; this module centralizes the env var names and
//! their parsing so the override logic isn't scattered across `config.rs`.

use std::path::PathBuf;
use std::time::Duration;

pub fn config_path() -> Option<PathBuf> {
    std::env::var_os("GARM_CONFIG_FILE").map(PathBuf::from)
}

pub fn state_dir() -> Option<PathBuf> {
    std::env::var_os("GARM_STATE_DIR").map(PathBuf::from)
}

pub fn log_level() -> Option<String> {
    std::env::var("GARM_LOG_LEVEL").ok()
}

pub fn metadata_base_url() -> Option<String> {
    std::env::var("GARM_METADATA_BASE_URL").ok()
}

pub fn callback_base_url() -> Option<String> {
    std::env::var("GARM_CALLBACK_BASE_URL").ok()
}

pub fn webhook_base_url() -> Option<String> {
    std::env::var("GARM_WEBHOOK_BASE_URL").ok()
}

pub fn providers_dir() -> Option<PathBuf> {
    std::env::var_os("GARM_PROVIDERS_DIR").map(PathBuf::from)
}

pub fn bootstrap_timeout() -> Option<Duration> {
    parse_env("GARM_BOOTSTRAP_TIMEOUT_SECS").map(Duration::from_secs)
}

pub fn shutdown_timeout() -> Duration {
    parse_env("GARM_SHUTDOWN_TIMEOUT_SECS").map(Duration::from_secs).unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT)
}

/// The process's overall hard shutdown cap (spec §5 "Hub shutdown: 60 s
/// hard cap"), overridable only for tests that would otherwise wait out the
/// full window.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
