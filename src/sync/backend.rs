//! Backend REST client.
//!
//! [`Backend`] is the collaborator contract the sync manager talks to; the
//! concrete [`HttpBackend`] speaks the dashboard's REST surface. Tests
//! substitute an in-memory implementation.

use crate::collector::types::{ActivityRecord, AlertEvent, RecordKind};
use crate::policy::PolicyConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backend client error types.
#[derive(Debug)]
pub enum ApiError {
    /// Configuration error (bad URL, missing runtime setup).
    Config(String),
    /// Network/HTTP transport error, including timeouts.
    Network(String),
    /// Server returned a non-2xx response.
    Status { status: u16, message: String },
    /// JSON encode/decode error.
    Serialization(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Config(msg) => write!(f, "backend config error: {msg}"),
            ApiError::Network(msg) => write!(f, "backend network error: {msg}"),
            ApiError::Status { status, message } => {
                write!(f, "backend error ({status}): {message}")
            }
            ApiError::Serialization(msg) => write!(f, "backend serialization error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Device details sent at registration.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_name: String,
    pub platform: String,
    pub agent_version: String,
}

impl DeviceInfo {
    /// Build device info from the assigned id and the resolved host name.
    /// The caller resolves the host name once and uses it for both the
    /// generated device id and this payload.
    pub fn new(device_id: String, device_name: String) -> Self {
        Self {
            device_id,
            device_name,
            platform: std::env::consts::OS.to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    child_id: String,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    accepted: usize,
}

/// Remote command kinds the backend can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    BlockApp,
    UnblockApp,
    EmergencyLocation,
    WipeDevice,
    TakeScreenshot,
    UpdateSettings,
    /// Forward-compatibility: a kind this agent version does not know.
    #[serde(other)]
    Unknown,
}

/// A pending remote command pulled from the backend.
///
/// Every command carries an id that must be confirmed back after execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCommand {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    commands: Vec<RemoteCommand>,
}

/// The backend surface the agent consumes.
///
/// Calls are blocking with a bounded timeout; the agent runs them off the
/// scheduling path.
pub trait Backend: Send + Sync {
    /// Register this device, returning the `child_id` scoping all uploads.
    fn register_device(&self, info: &DeviceInfo) -> Result<String, ApiError>;

    /// Upload one batch of records of a single kind. Returns the count the
    /// backend accepted.
    fn upload_batch(
        &self,
        child_id: &str,
        kind: RecordKind,
        records: &[ActivityRecord],
    ) -> Result<usize, ApiError>;

    /// Immediately send a single high-severity alert.
    fn send_alert(&self, child_id: &str, alert: &AlertEvent) -> Result<(), ApiError>;

    /// Pending remote commands issued since `since`.
    fn fetch_updates(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteCommand>, ApiError>;

    /// Acknowledge execution of a command.
    fn confirm_command(&self, command_id: &str) -> Result<(), ApiError>;

    /// Current policy config for this child.
    fn fetch_policy(&self, child_id: &str) -> Result<PolicyConfig, ApiError>;

    /// Connectivity probe.
    fn health(&self) -> Result<bool, ApiError>;
}

/// Backend connection settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL, e.g. `https://dashboard.example.com/api`.
    pub base_url: String,
    /// Bearer token, when the deployment requires one.
    pub token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// REST implementation of [`Backend`] over reqwest.
///
/// The async client runs on a private current-thread runtime so callers
/// stay synchronous; the agent invokes it from a blocking task.
pub struct HttpBackend {
    config: BackendConfig,
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to create HTTP client: {e}")))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ApiError::Config(format!("failed to create runtime: {e}")))?;
        Ok(Self {
            config,
            client,
            runtime,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        }
    }

    fn post_json<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let url = self.config.url(path);
        self.runtime.block_on(async {
            let response = self
                .request(self.client.post(&url))
                .json(body)
                .send()
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?;
            Self::decode(response).await
        })
    }

    fn get_json<R: serde::de::DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        let url = self.config.url(path);
        self.runtime.block_on(async {
            let response = self
                .request(self.client.get(&url))
                .send()
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?;
            Self::decode(response).await
        })
    }

    async fn decode<R: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<R, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::Serialization(e.to_string()))
    }
}

impl Backend for HttpBackend {
    fn register_device(&self, info: &DeviceInfo) -> Result<String, ApiError> {
        let response: RegisterResponse = self.post_json("devices/register", info)?;
        Ok(response.child_id)
    }

    fn upload_batch(
        &self,
        child_id: &str,
        kind: RecordKind,
        records: &[ActivityRecord],
    ) -> Result<usize, ApiError> {
        let path = format!("{child_id}/{}/batch", kind.endpoint());
        let response: BatchResponse = self.post_json(&path, &records)?;
        Ok(response.accepted)
    }

    fn send_alert(&self, child_id: &str, alert: &AlertEvent) -> Result<(), ApiError> {
        let path = format!("{child_id}/alerts");
        let _: serde_json::Value = self.post_json(&path, alert)?;
        Ok(())
    }

    fn fetch_updates(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteCommand>, ApiError> {
        let path = match since {
            Some(ts) => format!(
                "devices/{device_id}/updates?since={}",
                ts.timestamp_millis()
            ),
            None => format!("devices/{device_id}/updates"),
        };
        let response: UpdatesResponse = self.get_json(&path)?;
        Ok(response.commands)
    }

    fn confirm_command(&self, command_id: &str) -> Result<(), ApiError> {
        let path = format!("commands/{command_id}/confirm");
        let _: serde_json::Value = self.post_json(&path, &serde_json::json!({}))?;
        Ok(())
    }

    fn fetch_policy(&self, child_id: &str) -> Result<PolicyConfig, ApiError> {
        self.get_json(&format!("{child_id}/policy"))
    }

    fn health(&self) -> Result<bool, ApiError> {
        let url = self.config.url("health");
        self.runtime.block_on(async {
            let response = self
                .request(self.client.get(&url))
                .send()
                .await
                .map_err(|e| ApiError::Network(e.to_string()))?;
            Ok(response.status().is_success())
        })
    }
}
