//! External CI collaborator. The control plane only assembles payloads and
//! talks to the provider's REST surface; compilation happens entirely in the
//! provider's workflows.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CiRun {
    pub id: i64,
    /// "queued" | "in_progress" | "completed"
    pub status: String,
    /// "success" | "failure" | "cancelled" | ... once completed
    pub conclusion: Option<String>,
    pub html_url: Option<String>,
}

#[async_trait]
pub trait CiBackend: Send + Sync + 'static {
    /// Fire a repository-dispatch event. The provider returns no run id
    /// synchronously; correlation happens later via the webhook marker.
    async fn dispatch(&self, event_type: &str, client_payload: serde_json::Value) -> anyhow::Result<()>;
    async fn run_status(&self, run_id: i64) -> anyhow::Result<CiRun>;
    async fn cancel_run(&self, run_id: i64) -> anyhow::Result<()>;
}

pub struct GithubCi {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    token: String,
}

impl GithubCi {
    pub fn new(client: reqwest::Client, api_base: String, repo: String, token: String) -> Self {
        Self { client, api_base: api_base.trim_end_matches('/').to_string(), repo, token }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "appshell-control-plane")
    }
}

#[async_trait]
impl CiBackend for GithubCi {
    async fn dispatch(&self, event_type: &str, client_payload: serde_json::Value) -> anyhow::Result<()> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/repos/{}/dispatches", self.repo))
            .json(&serde_json::json!({
                "event_type": event_type,
                "client_payload": client_payload,
            }))
            .send()
            .await
            .context("send repository dispatch")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("repository dispatch rejected: {status} {body}");
        }
        info!(event_type, repo = %self.repo, "ci.dispatched");
        Ok(())
    }

    async fn run_status(&self, run_id: i64) -> anyhow::Result<CiRun> {
        #[derive(Deserialize)]
        struct RunResponse {
            id: i64,
            status: String,
            conclusion: Option<String>,
            html_url: Option<String>,
        }
        let resp = self
            .request(reqwest::Method::GET, &format!("/repos/{}/actions/runs/{run_id}", self.repo))
            .send()
            .await
            .context("fetch run status")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("run status lookup failed: {status}");
        }
        let run: RunResponse = resp.json().await.context("parse run status")?;
        Ok(CiRun { id: run.id, status: run.status, conclusion: run.conclusion, html_url: run.html_url })
    }

    async fn cancel_run(&self, run_id: i64) -> anyhow::Result<()> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/repos/{}/actions/runs/{run_id}/cancel", self.repo))
            .send()
            .await
            .context("send run cancel")?;
        let status = resp.status();
        // 409 means the run already finished; nothing left to cancel.
        if !status.is_success() && status != reqwest::StatusCode::CONFLICT {
            anyhow::bail!("run cancel rejected: {status}");
        }
        Ok(())
    }
}

/// In-memory backend used by tests and by deployments without a CI token.
#[derive(Default)]
pub struct MockCi {
    pub fail_dispatch: std::sync::atomic::AtomicBool,
    pub dispatched: Mutex<Vec<(String, serde_json::Value)>>,
    pub runs: Mutex<HashMap<i64, CiRun>>,
    pub cancelled: Mutex<Vec<i64>>,
}

#[async_trait]
impl CiBackend for MockCi {
    async fn dispatch(&self, event_type: &str, client_payload: serde_json::Value) -> anyhow::Result<()> {
        if self.fail_dispatch.load(std::sync::atomic::Ordering::Relaxed) {
            anyhow::bail!("mock dispatch failure");
        }
        self.dispatched
            .lock()
            .expect("mock mutex poisoned")
            .push((event_type.to_string(), client_payload));
        Ok(())
    }

    async fn run_status(&self, run_id: i64) -> anyhow::Result<CiRun> {
        self.runs
            .lock()
            .expect("mock mutex poisoned")
            .get(&run_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown run {run_id}"))
    }

    async fn cancel_run(&self, run_id: i64) -> anyhow::Result<()> {
        self.cancelled.lock().expect("mock mutex poisoned").push(run_id);
        Ok(())
    }
}

/// Pick the backend from configuration, mirroring how storage is selected.
pub fn from_config(client: &reqwest::Client, config: &Config) -> std::sync::Arc<dyn CiBackend> {
    match &config.ci_token {
        Some(token) => {
            info!(repo = %config.ci_repo, "ci.init_github");
            std::sync::Arc::new(GithubCi::new(
                client.clone(),
                config.ci_api_base.clone(),
                config.ci_repo.clone(),
                token.clone(),
            ))
        }
        None => {
            warn!("APPSHELL_CI_TOKEN not set, using mock CI backend");
            std::sync::Arc::new(MockCi::default())
        }
    }
}
