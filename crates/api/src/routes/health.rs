//! Health check endpoint handlers.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::app::AppState;
use crate::error::ApiError;

/// Simple status response for liveness/readiness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_latency_ms: Option<u64>,
}

/// Plain-text health check kept for existing load balancers and clients.
///
/// GET /api/health
pub async fn health_check() -> &'static str {
    "OK"
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
        store_latency_ms: None,
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 OK if the device store answers a ping.
pub async fn ready(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let start = std::time::Instant::now();
    state.store.ping().await.map_err(|e| {
        tracing::warn!(error = %e, "Readiness check failed");
        ApiError::ServiceUnavailable("Device store unreachable".to_string())
    })?;

    Ok(Json(StatusResponse {
        status: "ready".to_string(),
        version: None,
        store_latency_ms: Some(start.elapsed().as_millis() as u64),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{DateTime, NaiveDate, Utc};
    use domain::models::{
        Device, DeviceCommand, DeviceLocation, Feature, NewDevice, NewPayment, TelemetryPatch,
        UpdateDeviceRequest,
    };
    use domain::services::{DeviceStore, LockState, StoreError};

    use crate::config::Config;

    /// Store whose backend is down.
    struct OfflineStore;

    fn offline<T>() -> Result<T, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    #[async_trait::async_trait]
    impl DeviceStore for OfflineStore {
        async fn list(&self) -> Result<Vec<Device>, StoreError> {
            offline()
        }
        async fn find(&self, _: &str) -> Result<Option<Device>, StoreError> {
            offline()
        }
        async fn create(&self, _: NewDevice) -> Result<Device, StoreError> {
            offline()
        }
        async fn update(&self, _: &str, _: UpdateDeviceRequest) -> Result<Device, StoreError> {
            offline()
        }
        async fn apply_lock_state(&self, _: &str, _: LockState) -> Result<Device, StoreError> {
            offline()
        }
        async fn set_feature_lock(&self, _: &str, _: Feature, _: bool) -> Result<Device, StoreError> {
            offline()
        }
        async fn update_location(
            &self,
            _: &str,
            _: f64,
            _: f64,
            _: DateTime<Utc>,
        ) -> Result<DeviceLocation, StoreError> {
            offline()
        }
        async fn update_telemetry(&self, _: &str, _: TelemetryPatch) -> Result<Device, StoreError> {
            offline()
        }
        async fn record_payment(
            &self,
            _: &str,
            _: NewPayment,
            _: Option<NaiveDate>,
        ) -> Result<Device, StoreError> {
            offline()
        }
        async fn set_command(&self, _: &str, _: DeviceCommand, _: bool) -> Result<Device, StoreError> {
            offline()
        }
        async fn set_tracking(&self, _: &str, _: bool) -> Result<Device, StoreError> {
            offline()
        }
        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            offline()
        }
        async fn delete_all(&self) -> Result<u64, StoreError> {
            offline()
        }
        async fn find_overdue(&self, _: NaiveDate) -> Result<Vec<Device>, StoreError> {
            offline()
        }
        async fn lock_if_overdue(&self, _: &str, _: NaiveDate) -> Result<bool, StoreError> {
            offline()
        }
        async fn ping(&self) -> Result<(), StoreError> {
            offline()
        }
    }

    #[tokio::test]
    async fn test_ready_reports_unavailable_store() {
        let state = AppState {
            store: Arc::new(OfflineStore),
            config: Arc::new(Config::load_for_test(&[]).unwrap()),
        };

        let result = ready(State(state)).await;

        assert!(matches!(result, Err(ApiError::ServiceUnavailable(_))));
    }
}
