//! Device endpoint handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use domain::models::{
    CreateDeviceRequest, Device, DeviceCommand, DeviceLocation, Feature, NewDevice,
    RecordPaymentRequest, SetFeatureLockRequest, TelemetryPatch, UpdateDeviceRequest,
    UpdateLocationRequest,
};
use domain::services::LockState;
use serde::Serialize;
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::ValidatedJson;
use crate::middleware::metrics;

/// Response body for deletions.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
}

/// List every device.
///
/// GET /api/devices
pub async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<Device>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

/// GET /api/devices/:id
pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    state
        .store
        .find(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Device not found".into()))
}

/// Register a financed device.
///
/// POST /api/devices
pub async fn create_device(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CreateDeviceRequest>,
) -> Result<(StatusCode, Json<Device>), ApiError> {
    request.check_plan().map_err(ApiError::Validation)?;

    let device = state.store.create(NewDevice::from_request(request)).await?;
    metrics::record_device_registered();
    info!(device_id = %device.id, imei1 = %device.imei1, "Device registered");

    Ok((StatusCode::CREATED, Json(device)))
}

/// Field-wise merge into an existing device.
///
/// PUT /api/devices/:id
pub async fn update_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<UpdateDeviceRequest>,
) -> Result<Json<Device>, ApiError> {
    Ok(Json(state.store.update(&id, request).await?))
}

/// Agent location report. The server stamps `lastUpdated`.
///
/// PUT /api/devices/:id/location
pub async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<UpdateLocationRequest>,
) -> Result<Json<DeviceLocation>, ApiError> {
    let location = state
        .store
        .update_location(&id, request.lat, request.lng, Utc::now())
        .await?;
    Ok(Json(location))
}

/// Agent telemetry report.
///
/// PUT /api/devices/:id/telemetry
pub async fn update_telemetry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidatedJson(mut telemetry): ValidatedJson<TelemetryPatch>,
) -> Result<Json<Device>, ApiError> {
    telemetry.last_seen.get_or_insert_with(Utc::now);
    Ok(Json(state.store.update_telemetry(&id, telemetry).await?))
}

/// Toggle a single feature restriction without changing `isLocked`.
///
/// PUT /api/devices/:id/features/:feature
pub async fn set_feature_lock(
    State(state): State<AppState>,
    Path((id, feature)): Path<(String, String)>,
    ValidatedJson(request): ValidatedJson<SetFeatureLockRequest>,
) -> Result<Json<Device>, ApiError> {
    let feature: Feature = feature.parse().map_err(ApiError::Validation)?;
    let device = state
        .store
        .set_feature_lock(&id, feature, request.locked)
        .await?;
    info!(device_id = %id, %feature, locked = request.locked, "Feature lock updated");
    Ok(Json(device))
}

/// Record an installment payment.
///
/// POST /api/devices/:id/payment
pub async fn record_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidatedJson(request): ValidatedJson<RecordPaymentRequest>,
) -> Result<Json<Device>, ApiError> {
    let device = state
        .store
        .record_payment(&id, request.payment, request.next_due_date)
        .await?;
    metrics::record_payment_recorded();
    info!(
        device_id = %id,
        paid_emis = device.emi_details.paid_emis,
        tenure = device.emi_details.tenure,
        next_due_date = %device.emi_details.next_due_date,
        "Payment recorded"
    );
    Ok(Json(device))
}

async fn transition(state: &AppState, id: &str, target: LockState) -> Result<Device, ApiError> {
    let device = state.store.apply_lock_state(id, target).await?;
    metrics::record_lock_transition(target, "admin");
    info!(device_id = %id, state = %target, "Lock state changed by admin");
    Ok(device)
}

/// POST /api/devices/:id/lock
pub async fn lock_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    Ok(Json(transition(&state, &id, LockState::Locked).await?))
}

/// POST /api/devices/:id/unlock
pub async fn unlock_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    Ok(Json(transition(&state, &id, LockState::Active).await?))
}

async fn request_command(
    state: &AppState,
    id: &str,
    command: DeviceCommand,
) -> Result<Device, ApiError> {
    let device = state.store.set_command(id, command, true).await?;
    metrics::record_command_requested(command);
    info!(device_id = %id, %command, "Command queued for agent");
    Ok(device)
}

/// Queue a factory reset for the agent's next heartbeat.
///
/// POST /api/devices/:id/wipe
pub async fn request_wipe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    Ok(Json(request_command(&state, &id, DeviceCommand::Wipe).await?))
}

/// Queue release of device-admin control (loan settled).
///
/// POST /api/devices/:id/release
pub async fn request_release(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    Ok(Json(request_command(&state, &id, DeviceCommand::Release).await?))
}

/// POST /api/devices/:id/tracking/start
pub async fn start_tracking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    Ok(Json(state.store.set_tracking(&id, true).await?))
}

/// POST /api/devices/:id/tracking/stop
pub async fn stop_tracking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Device>, ApiError> {
    Ok(Json(state.store.set_tracking(&id, false).await?))
}

/// Hard delete. The agent treats the resulting 404 as "unlinked".
///
/// DELETE /api/devices/:id
pub async fn delete_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.store.delete(&id).await?;
    info!(device_id = %id, "Device deleted");
    Ok(Json(DeleteResponse {
        message: "Device deleted successfully".to_string(),
        deleted: None,
    }))
}

/// Maintenance: remove every device.
///
/// DELETE /api/devices
pub async fn delete_all_devices(
    State(state): State<AppState>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state.store.delete_all().await?;
    info!(deleted, "All devices deleted");
    Ok(Json(DeleteResponse {
        message: "All devices deleted".to_string(),
        deleted: Some(deleted),
    }))
}
