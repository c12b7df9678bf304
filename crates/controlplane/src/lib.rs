// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! garm-controlplane: the Entity Controller/Worker, Scale-Set
//! Controller/Worker, Provider Worker/Instance Manager, and the supporting
//! caches and forge clients that sit between [`garm_store::Store`] and
//! [`garm_provider`] (spec §4.2-§4.5).

pub mod caches;
pub mod entity;
pub mod error;
pub mod forge;
pub mod http_forge;
pub mod instance_manager;
pub mod provider_worker;
pub mod scale_set;

#[cfg(any(test, feature = "test-support"))]
pub mod stub_forge;

pub use caches::{BusCache, ToolsCache};
pub use entity::{EntityController, EntityWorkerContext, EntityWorkerHandle, ForgeClientFactory};
pub use error::ControlPlaneError;
pub use forge::{ForgeClient, ForgeClientVersion, ForgeRunner, MessageSession, ScaleSetMessage, ScaleSetMessageBody};
pub use http_forge::{HttpForgeClient, HttpForgeClientFactory};
pub use instance_manager::{InstanceManagerContext, InstanceManagerHandle};
pub use provider_worker::{ProviderWorker, ProviderWorkerConfig};
pub use scale_set::{ScaleSetController, ScaleSetWorkerContext, ScaleSetWorkerHandle};
