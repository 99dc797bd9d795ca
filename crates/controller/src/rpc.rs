//! Typed RPC client for the SUT agent
//!
//! One method per agent operation, each with a bounded timeout scaled
//! to the call's weight. Transport failures (unreachable, timeout) map
//! to `Error::Connectivity`; well-formed error responses map to
//! `Error::Application`.

use bytes::Bytes;
use playtest_common::protocol::{
    ActionRequest, ActionResponse, ErrorBody, GameStatus, GameStatusResponse, LaunchRequest,
    LaunchResponse, ProcessInfo, ProcessListResponse, StatusResponse,
};
use playtest_common::{Error, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const ACTION_TIMEOUT: Duration = Duration::from_secs(10);
const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(15);
const PROCESSES_TIMEOUT: Duration = Duration::from_secs(15);
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the agent's HTTP surface.
#[derive(Debug)]
pub struct SutClient {
    http: reqwest::Client,
    base_url: String,
}

fn classify(e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        Error::Connectivity(e.to_string())
    } else {
        Error::Application(e.to_string())
    }
}

impl SutClient {
    /// Connect to the agent, probing `/status` first.
    ///
    /// An unreachable agent is a construction failure: better to fail
    /// fast than discover a dead agent mid-run.
    pub async fn connect(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::new();
        let client = Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        };
        client.status().await.map_err(|e| {
            Error::Connectivity(format!("cannot connect to SUT at {}: {}", client.base_url, e))
        })?;
        info!("Connected to SUT agent at {}", client.base_url);
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, timeout: Duration) -> Result<T> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let code = response.status();
        let body = response.bytes().await.map_err(classify)?;
        if !code.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(Error::Application(format!("{}: {}", code, message)));
        }
        serde_json::from_slice(&body).map_err(Error::from)
    }

    /// Liveness probe.
    pub async fn status(&self) -> Result<StatusResponse> {
        self.get_json("/status", PROBE_TIMEOUT).await
    }

    /// Service health check.
    pub async fn health(&self) -> Result<StatusResponse> {
        self.get_json("/health", PROBE_TIMEOUT).await
    }

    /// Fetch a full-screen capture as raw PNG bytes.
    pub async fn screenshot(&self) -> Result<Bytes> {
        let response = self
            .http
            .get(format!("{}/screenshot", self.base_url))
            .timeout(SCREENSHOT_TIMEOUT)
            .send()
            .await
            .map_err(classify)?;
        let code = response.status();
        if !code.is_success() {
            return Err(Error::Application(format!("screenshot failed: {}", code)));
        }
        let bytes = response.bytes().await.map_err(classify)?;
        debug!("Screenshot retrieved ({} bytes)", bytes.len());
        Ok(bytes)
    }

    /// Dispatch an input action.
    pub async fn action(&self, request: &ActionRequest) -> Result<ActionResponse> {
        let response = self
            .http
            .post(format!("{}/action", self.base_url))
            .timeout(ACTION_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(classify)?;
        let parsed: ActionResponse = Self::parse(response).await?;
        if parsed.status != "success" {
            return Err(Error::Application(format!(
                "action {} reported {}",
                parsed.action, parsed.status
            )));
        }
        Ok(parsed)
    }

    /// Launch a game, preferring the enhanced process-tracking form.
    ///
    /// Older agents reject the enhanced body with an `error` field; fall
    /// back to the legacy path-only form when that happens.
    pub async fn launch(&self, path: &str, process_id: Option<&str>) -> Result<LaunchResponse> {
        let request = LaunchRequest {
            path: path.to_string(),
            process_id: process_id.map(str::to_string),
        };
        let response = self.post_launch(&request).await?;
        if response.error.is_some() && request.process_id.is_some() {
            info!("Enhanced launch rejected, trying legacy launch");
            return self
                .post_launch(&LaunchRequest {
                    path: path.to_string(),
                    process_id: None,
                })
                .await;
        }
        Ok(response)
    }

    async fn post_launch(&self, request: &LaunchRequest) -> Result<LaunchResponse> {
        let response = self
            .http
            .post(format!("{}/launch", self.base_url))
            .timeout(LAUNCH_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(classify)?;
        Self::parse(response).await
    }

    /// Terminate the tracked game via the action endpoint.
    pub async fn terminate_game(&self) -> Result<ActionResponse> {
        self.action(&ActionRequest::TerminateGame).await
    }

    /// List the SUT's running processes.
    pub async fn processes(&self) -> Result<Vec<ProcessInfo>> {
        let response: ProcessListResponse = self.get_json("/processes", PROCESSES_TIMEOUT).await?;
        Ok(response.processes)
    }

    /// Detailed game process status.
    pub async fn game_status(&self) -> Result<GameStatus> {
        let response: GameStatusResponse = self.get_json("/game_status", ACTION_TIMEOUT).await?;
        if response.status != "success" {
            warn!("game_status reported {}", response.status);
        }
        Ok(response.game_status)
    }
}
