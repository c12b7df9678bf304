// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! An in-memory [`ForgeClient`] double for tests (spec §8 scenarios), since
//! there is no running forge in this repo's test environment (SPEC_FULL.md
//! §A.4).

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use garm_core::{ForgeEntity, GarmError, ScaleSetId};

use crate::forge::{ForgeClient, ForgeRunner, MessageSession, ScaleSetMessage};

#[derive(Default)]
struct State {
    runners: Vec<ForgeRunner>,
    removed: Vec<String>,
    queue: VecDeque<ScaleSetMessage>,
    tools: Vec<serde_json::Value>,
    /// When `Some`, every call fails with this error instead of succeeding
    /// (used to exercise §4.3's degraded/backoff paths).
    fail_with: Option<GarmError>,
    sessions_opened: u32,
}

/// A shared, inspectable stand-in for a real forge: tests seed `runners`
/// and `queue` up front, then assert on `removed`/`sessions_opened` after
/// driving a worker against it.
#[derive(Clone, Default)]
pub struct StubForgeClient {
    state: Arc<Mutex<State>>,
}

impl StubForgeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_runners(&self, runners: Vec<ForgeRunner>) {
        self.state.lock().runners = runners;
    }

    pub fn seed_messages(&self, messages: Vec<ScaleSetMessage>) {
        self.state.lock().queue.extend(messages);
    }

    pub fn seed_tools(&self, tools: Vec<serde_json::Value>) {
        self.state.lock().tools = tools;
    }

    pub fn set_failing(&self, error: Option<GarmError>) {
        self.state.lock().fail_with = error;
    }

    pub fn removed_runners(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn sessions_opened(&self) -> u32 {
        self.state.lock().sessions_opened
    }
}

#[async_trait]
impl ForgeClient for StubForgeClient {
    async fn list_runners(&self, _entity: &ForgeEntity) -> Result<Vec<ForgeRunner>, GarmError> {
        let state = self.state.lock();
        if let Some(err) = &state.fail_with {
            return Err(err.clone());
        }
        Ok(state.runners.clone())
    }

    async fn remove_runner(&self, _entity: &ForgeEntity, runner_name: &str) -> Result<(), GarmError> {
        let mut state = self.state.lock();
        if let Some(err) = &state.fail_with {
            return Err(err.clone());
        }
        state.removed.push(runner_name.to_string());
        state.runners.retain(|r| r.name != runner_name);
        Ok(())
    }

    async fn create_session(
        &self,
        _entity: &ForgeEntity,
        scale_set_id: ScaleSetId,
    ) -> Result<Box<dyn MessageSession>, GarmError> {
        let mut state = self.state.lock();
        if let Some(err) = &state.fail_with {
            return Err(err.clone());
        }
        state.sessions_opened += 1;
        Ok(Box::new(StubMessageSession { state: self.state.clone(), scale_set_id }))
    }

    async fn list_tools(&self, _entity: &ForgeEntity) -> Result<Vec<serde_json::Value>, GarmError> {
        let state = self.state.lock();
        if let Some(err) = &state.fail_with {
            return Err(err.clone());
        }
        Ok(state.tools.clone())
    }
}

struct StubMessageSession {
    state: Arc<Mutex<State>>,
    #[allow(dead_code)]
    scale_set_id: ScaleSetId,
}

#[async_trait]
impl MessageSession for StubMessageSession {
    async fn get_messages(&self, last_message_id: i64) -> Result<Vec<ScaleSetMessage>, GarmError> {
        let mut state = self.state.lock();
        if let Some(err) = &state.fail_with {
            return Err(err.clone());
        }
        let mut out = Vec::new();
        while let Some(front) = state.queue.front() {
            if front.message_id > last_message_id {
                if let Some(message) = state.queue.pop_front() {
                    out.push(message);
                }
            } else {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
#[path = "stub_forge_tests.rs"]
mod tests;
