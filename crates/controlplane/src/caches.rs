// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! Process-wide read-through caches refreshed by the Change Bus (spec
//! §4.5). Readers take a short read-lock; writers (the dedicated bus
//! consumer task owned by each cache) an exclusive lock. Stale reads are
//! acceptable because all decisions are rechecked against the Store on
//! write.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use garm_core::{Bus, ChangePayload, EntityType, Filter, Operation};

/// A generic keyed cache kept in sync with the bus: `create`/`update`
/// replace the entry, `delete` removes it. `K` is extracted from the
/// payload by the caller-supplied `key_of` closure (a delete payload is an
/// [`garm_core::IdentityShell`] so `key_of` must tolerate the identity-only
/// shape too).
pub struct BusCache<K, V> {
    entries: Arc<RwLock<HashMap<K, V>>>,
    _task: tokio::task::JoinHandle<()>,
}

impl<K, V> BusCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Subscribe to `bus` for `entity_types`, keeping this cache's map in
    /// sync as events of those types are delivered.
    pub fn spawn(
        bus: &Bus,
        consumer_id: impl Into<String>,
        entity_types: Vec<EntityType>,
        key_of: impl Fn(&ChangePayload) -> Option<K> + Send + Sync + 'static,
    ) -> Result<Self, garm_core::BusError> {
        let entries: Arc<RwLock<HashMap<K, V>>> = Arc::new(RwLock::new(HashMap::new()));
        let filter = Filter::by_entity_type(entity_types);
        let mut consumer = bus.register_consumer(consumer_id, filter)?;
        let task_entries = entries.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = consumer.recv().await {
                let Some(key) = key_of(&event) else { continue };
                match event.operation {
                    Operation::Create | Operation::Update => {
                        match serde_json::from_value::<V>(event.payload.clone()) {
                            Ok(value) => {
                                task_entries.write().insert(key, value);
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "cache: failed to decode payload");
                            }
                        }
                    }
                    Operation::Delete => {
                        task_entries.write().remove(&key);
                    }
                }
            }
        });
        Ok(Self { entries, _task: task })
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn values(&self) -> Vec<V> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Seed an entry directly, used at startup before the bus has delivered
    /// any events for rows that already existed (spec §4.2: "At startup,
    /// load every ... row, populate the entity cache").
    pub fn seed(&self, key: K, value: V) {
        self.entries.write().insert(key, value);
    }
}

impl<K, V> Drop for BusCache<K, V> {
    fn drop(&mut self) {
        self._task.abort();
    }
}

/// The per-entity `tools[entityID]` cache (spec §4.5).
///
/// Unlike [`BusCache`], tools aren't a Store-backed entity kind — they're
/// fetched from the forge's REST API — so this cache is refreshed directly
/// by the Entity Worker's consolidation loop rather than by a bus consumer.
#[derive(Default)]
pub struct ToolsCache {
    entries: RwLock<HashMap<garm_core::EntityId, Vec<serde_json::Value>>>,
}

impl ToolsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_id: garm_core::EntityId) -> Vec<serde_json::Value> {
        self.entries.read().get(&entity_id).cloned().unwrap_or_default()
    }

    pub fn set(&self, entity_id: garm_core::EntityId, tools: Vec<serde_json::Value>) {
        self.entries.write().insert(entity_id, tools);
    }
}

#[cfg(test)]
#[path = "caches_tests.rs"]
mod tests;
