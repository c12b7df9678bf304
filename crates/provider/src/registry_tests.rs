// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

use std::sync::Arc;

use async_trait::async_trait;

use super::*;
use crate::types::{BaseParams, BootstrapInstance, ProviderInstance};

struct NoopProvider(String);

#[async_trait]
impl Provider for NoopProvider {
    fn name(&self) -> &str {
        &self.0
    }

    async fn create_instance(
        &self,
        _pool_id: &str,
        _instance_id: &str,
        _args: &BootstrapInstance,
        _base_params: &BaseParams,
    ) -> Result<ProviderInstance, ProviderError> {
        unimplemented!()
    }

    async fn get_instance(&self, _pool_id: &str, _instance_id: &str) -> Result<ProviderInstance, ProviderError> {
        unimplemented!()
    }

    async fn delete_instance(&self, _pool_id: &str, _instance_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn list_instances(&self, _pool_id: &str) -> Result<Vec<ProviderInstance>, ProviderError> {
        Ok(vec![])
    }

    async fn remove_all_instances(&self, _pool_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn start_instance(&self, _pool_id: &str, _instance_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn stop_instance(&self, _pool_id: &str, _instance_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[test]
fn unknown_provider_is_reported_by_name() {
    let registry = ProviderRegistry::new();
    let err = registry.get("lxd").unwrap_err();
    assert!(matches!(err, ProviderError::UnknownProvider(name) if name == "lxd"));
}

#[test]
fn registered_provider_is_retrievable() {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(NoopProvider("lxd".to_string())));
    assert_eq!(registry.names(), vec!["lxd"]);
    assert!(registry.get("lxd").is_ok());
}
