// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! The out-of-process Provider plugin contract (spec §6, §9 "Dynamic
//! dispatch": the Provider plugin is an out-of-process contract expressed
//! as env + stdin/stdout, not in-process polymorphism).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::ProviderError;
use crate::types::{BaseParams, BootstrapInstance, ProviderInstance};

/// `GARM_COMMAND` values a plugin executable must handle (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCommand {
    CreateInstance,
    GetInstance,
    DeleteInstance,
    ListInstances,
    RemoveAllInstances,
    StartInstance,
    StopInstance,
}

garm_core::simple_display! {
    ProviderCommand {
        CreateInstance => "CreateInstance",
        GetInstance => "GetInstance",
        DeleteInstance => "DeleteInstance",
        ListInstances => "ListInstances",
        RemoveAllInstances => "RemoveAllInstances",
        StartInstance => "StartInstance",
        StopInstance => "StopInstance",
    }
}

/// Exit codes a plugin is expected to use (spec §6: "0=ok, 1=generic error,
/// `ExitCodeNotFound`, `ExitCodeDuplicate`").
pub const EXIT_CODE_OK: i32 = 0;
pub const EXIT_CODE_ERROR: i32 = 1;
pub const EXIT_CODE_NOT_FOUND: i32 = 2;
pub const EXIT_CODE_DUPLICATE: i32 = 3;

/// How long a single plugin invocation is allowed to run before the
/// Instance Manager gives up on it (not specified numerically in spec §6;
/// chosen generously since instance creation against real IaaS APIs can
/// take tens of seconds).
pub const PLUGIN_INVOCATION_TIMEOUT: Duration = Duration::from_secs(120);

/// The capability set every Provider plugin backend exposes to the Instance
/// Manager and Provider Worker (spec §4.4, §6).
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn create_instance(
        &self,
        pool_id: &str,
        instance_id: &str,
        args: &BootstrapInstance,
        base_params: &BaseParams,
    ) -> Result<ProviderInstance, ProviderError>;

    async fn get_instance(&self, pool_id: &str, instance_id: &str) -> Result<ProviderInstance, ProviderError>;

    async fn delete_instance(&self, pool_id: &str, instance_id: &str) -> Result<(), ProviderError>;

    async fn list_instances(&self, pool_id: &str) -> Result<Vec<ProviderInstance>, ProviderError>;

    async fn remove_all_instances(&self, pool_id: &str) -> Result<(), ProviderError>;

    async fn start_instance(&self, pool_id: &str, instance_id: &str) -> Result<(), ProviderError>;

    async fn stop_instance(&self, pool_id: &str, instance_id: &str) -> Result<(), ProviderError>;
}

/// A provider backed by an executable invoked per-operation (spec §6).
pub struct ExecProvider {
    name: String,
    executable: std::path::PathBuf,
    config_file: std::path::PathBuf,
    controller_id: String,
}

impl ExecProvider {
    pub fn new(
        name: impl Into<String>,
        executable: impl Into<std::path::PathBuf>,
        config_file: impl Into<std::path::PathBuf>,
        controller_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            config_file: config_file.into(),
            controller_id: controller_id.into(),
        }
    }

    async fn invoke(
        &self,
        command: ProviderCommand,
        pool_id: &str,
        instance_id: &str,
        stdin_payload: Option<&[u8]>,
    ) -> Result<Vec<u8>, ProviderError> {
        let span = tracing::info_span!("provider_invoke", provider = %self.name, %command, %instance_id);
        let _enter = span.enter();
        let started = std::time::Instant::now();

        let mut child = Command::new(&self.executable)
            .env("GARM_COMMAND", command.to_string())
            .env("GARM_CONTROLLER_ID", &self.controller_id)
            .env("GARM_POOL_ID", pool_id)
            .env("GARM_INSTANCE_ID", instance_id)
            .env("GARM_PROVIDER_CONFIG_FILE", &self.config_file)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ProviderError::Spawn)?;

        if let Some(payload) = stdin_payload {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(payload).await.map_err(ProviderError::Spawn)?;
            }
        }
        // Drop stdin so the plugin sees EOF even when we had no payload to write.
        child.stdin.take();

        let output = tokio::time::timeout(PLUGIN_INVOCATION_TIMEOUT, child.wait_with_output()).await.map_err(
            |_| {
                tracing::error!(elapsed_ms = started.elapsed().as_millis() as u64, "provider invocation timed out");
                ProviderError::Timeout
            },
        )?
        .map_err(ProviderError::Spawn)?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match output.status.code() {
            Some(EXIT_CODE_OK) => {
                tracing::info!(elapsed_ms, "provider invocation succeeded");
                Ok(output.stdout)
            }
            Some(EXIT_CODE_NOT_FOUND) => {
                tracing::info!(elapsed_ms, "provider invocation reported not found");
                Err(ProviderError::NotFound)
            }
            Some(EXIT_CODE_DUPLICATE) => {
                tracing::warn!(elapsed_ms, "provider invocation reported duplicate");
                Err(ProviderError::Duplicate)
            }
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                tracing::error!(elapsed_ms, code = code.unwrap_or(-1), %stderr, "provider invocation failed");
                Err(ProviderError::PluginFailed { code: code.unwrap_or(-1), stderr })
            }
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProviderError> {
        serde_json::from_slice(bytes).map_err(|e| ProviderError::MalformedOutput(e.to_string()))
    }
}

#[async_trait]
impl Provider for ExecProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_instance(
        &self,
        pool_id: &str,
        instance_id: &str,
        args: &BootstrapInstance,
        _base_params: &BaseParams,
    ) -> Result<ProviderInstance, ProviderError> {
        let payload = serde_json::to_vec(args).map_err(|e| ProviderError::MalformedOutput(e.to_string()))?;
        let stdout = self.invoke(ProviderCommand::CreateInstance, pool_id, instance_id, Some(&payload)).await?;
        Self::decode(&stdout)
    }

    async fn get_instance(&self, pool_id: &str, instance_id: &str) -> Result<ProviderInstance, ProviderError> {
        let stdout = self.invoke(ProviderCommand::GetInstance, pool_id, instance_id, None).await?;
        Self::decode(&stdout)
    }

    async fn delete_instance(&self, pool_id: &str, instance_id: &str) -> Result<(), ProviderError> {
        match self.invoke(ProviderCommand::DeleteInstance, pool_id, instance_id, None).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_idempotent_success() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_instances(&self, pool_id: &str) -> Result<Vec<ProviderInstance>, ProviderError> {
        let stdout = self.invoke(ProviderCommand::ListInstances, pool_id, "", None).await?;
        Self::decode(&stdout)
    }

    async fn remove_all_instances(&self, pool_id: &str) -> Result<(), ProviderError> {
        self.invoke(ProviderCommand::RemoveAllInstances, pool_id, "", None).await?;
        Ok(())
    }

    async fn start_instance(&self, pool_id: &str, instance_id: &str) -> Result<(), ProviderError> {
        self.invoke(ProviderCommand::StartInstance, pool_id, instance_id, None).await?;
        Ok(())
    }

    async fn stop_instance(&self, pool_id: &str, instance_id: &str) -> Result<(), ProviderError> {
        self.invoke(ProviderCommand::StopInstance, pool_id, instance_id, None).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
