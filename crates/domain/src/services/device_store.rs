//! Device record store abstraction.
//!
//! The store is the single source of truth for device state. Every method is
//! one atomic write against one device record (or a read); concurrent writers
//! to the same field resolve last-write-wins.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::models::{
    Device, DeviceCommand, DeviceLocation, Feature, NewDevice, NewPayment, TelemetryPatch,
    UpdateDeviceRequest,
};

use super::lock_state::LockState;

/// Errors produced by device store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Duplicate device: {0}")]
    Duplicate(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(id: &str) -> Self {
        StoreError::NotFound(id.to_string())
    }
}

/// Persistent store of financed devices.
#[async_trait::async_trait]
pub trait DeviceStore: Send + Sync {
    /// All devices, oldest registration first.
    async fn list(&self) -> Result<Vec<Device>, StoreError>;

    async fn find(&self, id: &str) -> Result<Option<Device>, StoreError>;

    /// Inserts a new device. Fails with `Duplicate` if `id` or `imei1` is taken.
    async fn create(&self, device: NewDevice) -> Result<Device, StoreError>;

    /// Field-wise merge of `patch` into the stored device.
    async fn update(&self, id: &str, patch: UpdateDeviceRequest) -> Result<Device, StoreError>;

    /// Lock or unlock transition: sets `is_locked` and all feature flags.
    async fn apply_lock_state(&self, id: &str, state: LockState) -> Result<Device, StoreError>;

    /// Toggles a single feature flag without touching `is_locked`.
    async fn set_feature_lock(
        &self,
        id: &str,
        feature: Feature,
        locked: bool,
    ) -> Result<Device, StoreError>;

    async fn update_location(
        &self,
        id: &str,
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
    ) -> Result<DeviceLocation, StoreError>;

    async fn update_telemetry(
        &self,
        id: &str,
        telemetry: TelemetryPatch,
    ) -> Result<Device, StoreError>;

    /// Appends a payment and bumps `paid_emis`. Rejects settled loans.
    async fn record_payment(
        &self,
        id: &str,
        payment: NewPayment,
        next_due_date: Option<NaiveDate>,
    ) -> Result<Device, StoreError>;

    /// Sets or clears a one-shot command flag.
    async fn set_command(
        &self,
        id: &str,
        command: DeviceCommand,
        requested: bool,
    ) -> Result<Device, StoreError>;

    async fn set_tracking(&self, id: &str, tracking: bool) -> Result<Device, StoreError>;

    /// Hard delete. Fails with `NotFound` if the device does not exist.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Deletes every device, returning how many were removed.
    async fn delete_all(&self) -> Result<u64, StoreError>;

    /// Active devices with unpaid installments whose due date is before `today`.
    async fn find_overdue(&self, today: NaiveDate) -> Result<Vec<Device>, StoreError>;

    /// Locks the device only if it is still overdue as of `today`.
    ///
    /// Returns `false` when a payment or admin action made it ineligible
    /// since it was selected.
    async fn lock_if_overdue(&self, id: &str, today: NaiveDate) -> Result<bool, StoreError>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), StoreError>;
}
