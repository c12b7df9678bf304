// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Fatal, non-retryable errors that propagate out of a worker's loop and
//! trigger its `Stop` (spec §7 propagation policy).

use thiserror::Error;

use garm_core::GarmError;
use garm_provider::ProviderError;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error(transparent)]
    Garm(#[from] GarmError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Bus(#[from] garm_core::BusError),

    #[error("{0}")]
    Fatal(String),
}
