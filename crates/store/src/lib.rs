// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! garm-store: the persistence contract the control plane requires (spec §6)
//! and an in-memory reference implementation that emits a [`garm_core::ChangePayload`]
//! on the Change Bus for every committed mutation.

pub mod memory;
pub mod store_trait;

pub use memory::MemoryStore;
pub use store_trait::{EventLevel, Store};
