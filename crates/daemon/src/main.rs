// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! `garmd`: the GARM control plane process. Wires the Change Bus, the
//! in-memory Store, the supporting caches, the Entity Controller, and the
//! Provider Worker together, then blocks until `SIGINT`/`SIGTERM` and drains
//! every component within the process's hard shutdown cap (spec §5).

mod config;
mod env;
mod error;
mod plugins;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use garm_core::{Bus, ControllerInfo, SecretBytes};
use garm_controlplane::{EntityController, HttpForgeClientFactory, ProviderWorker, ProviderWorkerConfig};
use garm_provider::ProviderRegistry;
use garm_store::{MemoryStore, Store};

use config::Config;
use error::DaemonError;

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Generate 32 bytes of signing key material. This process has no `rand`
/// dependency in its stack; two v4 UUIDs' random bytes are a sufficient
/// source of entropy for a process-lifetime HMAC key.
fn generate_signing_secret() -> SecretBytes {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    SecretBytes::new(bytes)
}

async fn load_or_init_controller(store: &dyn Store, config: &Config) -> Result<ControllerInfo, DaemonError> {
    match store.controller_info().await {
        Ok(info) => Ok(info),
        Err(garm_core::GarmError::NotFound(_)) => {
            let info = ControllerInfo::new(
                config.controller.hostname.clone(),
                config.controller.metadata_base_url.clone(),
                config.controller.callback_base_url.clone(),
                config.controller.webhook_base_url.clone(),
                generate_signing_secret(),
            );
            Ok(store.init_controller(info).await?)
        }
        Err(err) => Err(err.into()),
    }
}

fn config_path() -> Result<std::path::PathBuf, DaemonError> {
    if let Some(path) = std::env::args().nth(1) {
        return Ok(std::path::PathBuf::from(path));
    }
    if let Some(path) = env::config_path() {
        return Ok(path);
    }
    let default = dirs::config_dir().map(|dir| dir.join("garmd").join("config.toml"));
    match default {
        Some(path) if path.exists() => Ok(path),
        _ => Err(DaemonError::Config(
            "no config path given: pass one as the first argument or set GARM_CONFIG_FILE".to_string(),
        )),
    }
}

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    let config = Config::load(&config_path()?)?;
    init_tracing(config.log_level());

    tracing::info!(hostname = %config.controller.hostname, "garmd: starting");

    let bus = Bus::new();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&bus, "garmd-store")?);

    let controller_info = load_or_init_controller(store.as_ref(), &config).await?;
    tracing::info!(controller_id = %controller_info.controller_id, "garmd: controller identity ready");

    let providers = Arc::new(plugins::discover(&config, &controller_info.controller_id.to_string()).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "garmd: provider plugin discovery failed, starting with no providers loaded");
        ProviderRegistry::new()
    }));

    // The tools cache has no Store-backed entity kind of its own (spec
    // §4.5); it is refreshed directly by each Entity Worker's consolidation
    // loop, not by a bus consumer, so it is constructed plainly.
    let tools_cache = Arc::new(garm_controlplane::ToolsCache::new());

    let provider_worker_config = ProviderWorkerConfig {
        bootstrap_timeout: config.bootstrap_timeout(),
        status_message_retention: config.status_message_retention,
    };
    let provider_worker =
        ProviderWorker::new(&bus, store.clone(), providers, tools_cache.clone(), provider_worker_config).await?;
    let provider_worker_quit = provider_worker.spawn_dispatch_loop(&bus)?;

    let forge_factory = Arc::new(HttpForgeClientFactory);
    let entity_controller = EntityController::new(
        store.clone(),
        bus.clone(),
        forge_factory,
        tools_cache,
        config.bootstrap_timeout(),
        Arc::new(now_unix),
    );
    entity_controller.start().await?;

    tracing::info!("garmd: running");
    wait_for_shutdown_signal().await?;
    tracing::info!("garmd: shutdown signal received, draining");

    let shutdown = tokio::time::timeout(env::shutdown_timeout(), async {
        entity_controller.stop_all().await;
        let _ = provider_worker_quit.send(());
    })
    .await;
    if shutdown.is_err() {
        tracing::warn!("garmd: shutdown exceeded hard cap, exiting anyway");
    }
    bus.close();

    tracing::info!("garmd: stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<(), DaemonError> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
