// SPDX-License-Identifier: MIT
// Copyright (c) 2026 GARM contributors

//! A GitHub/Gitea-compatible [`ForgeClient`] (spec §6 "Forge HTTP/scale-set
//! protocol"): standard REST for runner listing/removal and tool downloads,
//! plus the scale-set long-poll message session.
//!
//! Authentication is modeled as a single bearer token per client instance —
//! a PAT used directly, or (for [`garm_core::AuthMethod::App`]) an
//! already-exchanged installation token. Exchanging a GitHub App's private
//! key for an installation token is a credential-refresh concern the
//! [`crate::entity::ForgeClientFactory`] this client is built through owns,
//! not this wire-level façade.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use garm_core::{EntityKind, ForgeCredentials, ForgeEndpoint, ForgeEntity, GarmError, JobConclusion, JobId, ScaleSetId};

use crate::entity::ForgeClientFactory;
use crate::forge::{ForgeClient, ForgeRunner, MessageSession, ScaleSetMessage, ScaleSetMessageBody};

/// The forge's server-side long-poll budget; `get_messages` is asked to
/// return (with an empty batch if nothing new arrived) within this window
/// rather than block indefinitely (spec §4.3 step 2, spec §5 cooperative
/// cancellation).
const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(50);

/// Request timeout for every other call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HttpForgeClient {
    http: reqwest::Client,
    api_base_url: String,
    token: Arc<str>,
}

impl HttpForgeClient {
    pub fn new(api_base_url: impl Into<String>, token: impl Into<Arc<str>>) -> Result<Self, GarmError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("garm/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| GarmError::BadRequest(format!("building http client: {err}")))?;
        Ok(Self { http, api_base_url: api_base_url.into(), token: token.into() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }

    /// The REST path segment identifying `entity` (spec §3 repo/org/enterprise).
    fn entity_path(entity: &ForgeEntity) -> String {
        match &entity.kind {
            EntityKind::Repository { owner, name } => format!("/repos/{owner}/{name}"),
            EntityKind::Organization { name } => format!("/orgs/{name}"),
            EntityKind::Enterprise { name } => format!("/enterprises/{name}"),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, GarmError> {
        let resp = self.http.get(self.url(path)).bearer_auth(&*self.token).send().await.map_err(map_transport_err)?;
        decode(resp).await
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: &impl serde::Serialize) -> Result<T, GarmError> {
        let resp = self.http.post(self.url(path)).bearer_auth(&*self.token).json(body).send().await.map_err(map_transport_err)?;
        decode(resp).await
    }

    async fn delete(&self, path: &str) -> Result<(), GarmError> {
        let resp = self.http.delete(self.url(path)).bearer_auth(&*self.token).send().await.map_err(map_transport_err)?;
        let status = resp.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        Err(map_status(status, resp.text().await.unwrap_or_default()))
    }
}

fn map_transport_err(err: reqwest::Error) -> GarmError {
    GarmError::TransientForgeError(err.to_string())
}

fn map_status(status: reqwest::StatusCode, body: String) -> GarmError {
    match status.as_u16() {
        401 | 403 => GarmError::Unauthorized(body),
        404 => GarmError::NotFound(body),
        429 | 500..=599 => GarmError::TransientForgeError(format!("{status}: {body}")),
        _ => GarmError::BadRequest(format!("{status}: {body}")),
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, GarmError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(map_status(status, resp.text().await.unwrap_or_default()));
    }
    resp.json().await.map_err(|err| GarmError::BadRequest(format!("decoding response: {err}")))
}

#[derive(Debug, Deserialize)]
struct RunnersPage {
    runners: Vec<RawRunner>,
}

#[derive(Debug, Deserialize)]
struct RawRunner {
    id: i64,
    name: String,
    busy: bool,
    #[serde(default)]
    labels: Vec<RawLabel>,
    #[serde(default)]
    runner_scale_set_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

/// Extract the `runner-pool-id:<uuid>` label (spec §4.2 consolidation) and
/// the `runner_scale_set_id` field, giving the [`ForgeRunner`] the Entity
/// Worker's consolidation sweep partitions on.
fn decode_runner(raw: RawRunner) -> ForgeRunner {
    let pool_id = raw.labels.iter().find(|l| l.name.starts_with("runner-pool-id:")).map(|l| l.name.clone());
    let scale_set_id = raw.runner_scale_set_id.and_then(|s| s.parse::<uuid::Uuid>().ok()).map(ScaleSetId::from);
    ForgeRunner { name: raw.name, pool_id, scale_set_id, busy: raw.busy }
}

#[async_trait]
impl ForgeClient for HttpForgeClient {
    async fn list_runners(&self, entity: &ForgeEntity) -> Result<Vec<ForgeRunner>, GarmError> {
        let path = format!("{}/actions/runners", Self::entity_path(entity));
        let page: RunnersPage = self.get(&path).await?;
        Ok(page.runners.into_iter().map(decode_runner).collect())
    }

    async fn remove_runner(&self, entity: &ForgeEntity, runner_name: &str) -> Result<(), GarmError> {
        let path = format!("{}/actions/runners", Self::entity_path(entity));
        let page: RunnersPage = self.get(&path).await?;
        let Some(raw) = page.runners.into_iter().find(|r| r.name == runner_name) else {
            return Ok(());
        };
        let delete_path = format!("{}/actions/runners/{}", Self::entity_path(entity), raw.id);
        self.delete(&delete_path).await
    }

    async fn create_session(&self, entity: &ForgeEntity, scale_set_id: ScaleSetId) -> Result<Box<dyn MessageSession>, GarmError> {
        #[derive(serde::Serialize)]
        struct CreateSessionRequest<'a> {
            scale_set_id: uuid::Uuid,
            owner: &'a str,
        }
        #[derive(Deserialize)]
        struct CreateSessionResponse {
            session_id: String,
        }
        let owner = entity.kind.display_name();
        let path = format!("{}/actions/runner-scale-sets/sessions", Self::entity_path(entity));
        let resp: CreateSessionResponse =
            self.post(&path, &CreateSessionRequest { scale_set_id: scale_set_id.as_uuid(), owner: &owner }).await?;
        Ok(Box::new(HttpMessageSession {
            client: self.clone(),
            entity_path: Self::entity_path(entity),
            session_id: resp.session_id,
        }))
    }

    async fn list_tools(&self, entity: &ForgeEntity) -> Result<Vec<serde_json::Value>, GarmError> {
        #[derive(Deserialize)]
        struct ToolsResponse {
            tools: Vec<serde_json::Value>,
        }
        let path = format!("{}/actions/runner-scale-sets/tools", Self::entity_path(entity));
        let resp: ToolsResponse = self.get(&path).await?;
        Ok(resp.tools)
    }
}

struct HttpMessageSession {
    client: HttpForgeClient,
    entity_path: String,
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    message_id: i64,
    message_type: String,
    #[serde(default)]
    body: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MessagesPage {
    messages: Vec<RawMessage>,
}

fn decode_message(raw: RawMessage) -> Result<ScaleSetMessage, GarmError> {
    let body = match raw.message_type.as_str() {
        "job_available" => {
            #[derive(Deserialize)]
            struct Body {
                job_id: uuid::Uuid,
                run_id: i64,
                #[serde(default)]
                labels: Vec<String>,
            }
            let b: Body = parse_body(raw.body)?;
            ScaleSetMessageBody::JobAvailable { job_id: JobId::from(b.job_id), run_id: b.run_id, labels: b.labels }
        }
        "job_assigned" => {
            #[derive(Deserialize)]
            struct Body {
                job_id: uuid::Uuid,
            }
            let b: Body = parse_body(raw.body)?;
            ScaleSetMessageBody::JobAssigned { job_id: JobId::from(b.job_id) }
        }
        "job_started" => {
            #[derive(Deserialize)]
            struct Body {
                job_id: uuid::Uuid,
            }
            let b: Body = parse_body(raw.body)?;
            ScaleSetMessageBody::JobStarted { job_id: JobId::from(b.job_id) }
        }
        "job_completed" => {
            #[derive(Deserialize)]
            struct Body {
                job_id: uuid::Uuid,
                conclusion: JobConclusion,
            }
            let b: Body = parse_body(raw.body)?;
            ScaleSetMessageBody::JobCompleted { job_id: JobId::from(b.job_id), conclusion: b.conclusion }
        }
        "scale_set_statistics" => {
            #[derive(Deserialize)]
            struct Body {
                desired_runner_count: u32,
                statistics: garm_core::ScaleSetStatistics,
            }
            let b: Body = parse_body(raw.body)?;
            ScaleSetMessageBody::ScaleSetStatistics { desired_runner_count: b.desired_runner_count, statistics: b.statistics }
        }
        other => return Err(GarmError::BadRequest(format!("unknown scale-set message type: {other}"))),
    };
    Ok(ScaleSetMessage { message_id: raw.message_id, body })
}

fn parse_body<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, GarmError> {
    serde_json::from_value(value).map_err(|err| GarmError::BadRequest(format!("decoding message body: {err}")))
}

#[async_trait]
impl MessageSession for HttpMessageSession {
    async fn get_messages(&self, last_message_id: i64) -> Result<Vec<ScaleSetMessage>, GarmError> {
        let path = format!(
            "{}/actions/runner-scale-sets/sessions/{}/messages?last_message_id={}&timeout_seconds={}",
            self.entity_path,
            self.session_id,
            last_message_id,
            LONG_POLL_TIMEOUT.as_secs(),
        );
        let page: MessagesPage = self.client.get(&path).await?;
        page.messages.into_iter().map(decode_message).collect()
    }
}

/// Builds an [`HttpForgeClient`] for an entity's current credentials +
/// endpoint row (spec §4.2 `ForgeClientFactory`). The credentials secret is
/// used as the bearer token directly; see the module doc comment on the
/// `App` auth method's installation-token exchange.
#[derive(Default)]
pub struct HttpForgeClientFactory;

#[async_trait]
impl ForgeClientFactory for HttpForgeClientFactory {
    async fn build(
        &self,
        _entity: &ForgeEntity,
        credentials: &ForgeCredentials,
        endpoint: &ForgeEndpoint,
    ) -> Result<Arc<dyn ForgeClient>, GarmError> {
        let token = String::from_utf8(credentials.secret.expose().to_vec())
            .map_err(|err| GarmError::BadRequest(format!("credentials secret is not valid utf-8: {err}")))?;
        let client = HttpForgeClient::new(endpoint.api_base_url.clone(), Arc::<str>::from(token))?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
#[path = "http_forge_tests.rs"]
mod tests;
