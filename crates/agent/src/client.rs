//! HTTP client for the device API.

use std::time::Duration;

use domain::models::{Device, DeviceCommand, TelemetryPatch};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::Timings;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

/// Result of fetching the device record.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Found(Box<Device>),
    /// The server no longer knows this device: the admin deleted it.
    Missing,
}

/// Agent-owned flags written back through the merge endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions_granted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wipe_requested: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_requested: Option<bool>,
}

impl FlagUpdate {
    pub fn permissions_granted() -> Self {
        Self {
            permissions_granted: Some(true),
            ..Default::default()
        }
    }

    /// Acknowledges a command by clearing its flag.
    pub fn clear(command: DeviceCommand) -> Self {
        Self::command(command, false)
    }

    /// Sets a command flag back after the handset could not carry it out.
    pub fn reopen(command: DeviceCommand) -> Self {
        Self::command(command, true)
    }

    fn command(command: DeviceCommand, requested: bool) -> Self {
        match command {
            DeviceCommand::Wipe => Self {
                wipe_requested: Some(requested),
                ..Default::default()
            },
            DeviceCommand::Release => Self {
                release_requested: Some(requested),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct LocationBody {
    lat: f64,
    lng: f64,
}

/// Calls the agent makes against the device API.
#[async_trait::async_trait]
pub trait DeviceApi: Send + Sync {
    async fn fetch_device(&self, device_id: &str) -> Result<FetchOutcome, ClientError>;

    async fn push_telemetry(
        &self,
        device_id: &str,
        telemetry: &TelemetryPatch,
    ) -> Result<(), ClientError>;

    async fn push_location(&self, device_id: &str, lat: f64, lng: f64) -> Result<(), ClientError>;

    async fn update_flags(&self, device_id: &str, update: &FlagUpdate) -> Result<(), ClientError>;
}

/// [`DeviceApi`] over HTTP/JSON.
pub struct HttpDeviceApi {
    client: Client,
    base_url: String,
    fetch_timeout: Duration,
}

impl HttpDeviceApi {
    pub fn new(base_url: &str, timings: &Timings) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timings.request_timeout)
            .user_agent(concat!("emi-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            fetch_timeout: timings.fetch_timeout,
        })
    }

    fn device_url(&self, device_id: &str) -> String {
        format!("{}/api/devices/{}", self.base_url, device_id)
    }

    async fn send_expecting_success(request: RequestBuilder) -> Result<(), ClientError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait::async_trait]
impl DeviceApi for HttpDeviceApi {
    async fn fetch_device(&self, device_id: &str) -> Result<FetchOutcome, ClientError> {
        let response = self
            .client
            .get(self.device_url(device_id))
            .timeout(self.fetch_timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(device_id, "Device record not found");
            return Ok(FetchOutcome::Missing);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(FetchOutcome::Missing);
        }
        let device: Device =
            serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(FetchOutcome::Found(Box::new(device)))
    }

    async fn push_telemetry(
        &self,
        device_id: &str,
        telemetry: &TelemetryPatch,
    ) -> Result<(), ClientError> {
        let url = format!("{}/telemetry", self.device_url(device_id));
        Self::send_expecting_success(self.client.put(url).json(telemetry)).await
    }

    async fn push_location(&self, device_id: &str, lat: f64, lng: f64) -> Result<(), ClientError> {
        let url = format!("{}/location", self.device_url(device_id));
        Self::send_expecting_success(self.client.put(url).json(&LocationBody { lat, lng })).await
    }

    async fn update_flags(&self, device_id: &str, update: &FlagUpdate) -> Result<(), ClientError> {
        Self::send_expecting_success(self.client.put(self.device_url(device_id)).json(update))
            .await
    }
}
