// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! The Provider Worker's map of loaded plugins by name (spec §4.4, SPEC_FULL.md §B).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::exec::Provider;

/// A read-only map from provider name to loaded plugin, built once at
/// startup by scanning a configured plugin directory (SPEC_FULL.md §B
/// "Provider plugin discovery").
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers.get(name).cloned().ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
