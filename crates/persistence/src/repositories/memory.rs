//! In-process device store.
//!
//! Backs `storage.backend = "memory"` deployments and API tests. Every write
//! holds the map's write lock for its whole read-modify-write.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use domain::models::{
    Device, DeviceCommand, DeviceLocation, Feature, NewDevice, NewPayment, TelemetryPatch,
    UpdateDeviceRequest,
};
use domain::services::{DeviceStore, LockState, StoreError};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryDeviceRepository {
    devices: RwLock<HashMap<String, Device>>,
}

impl InMemoryDeviceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the stored device under the write lock, bumping
    /// `updated_at` when it succeeds.
    async fn modify<T, F>(&self, id: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Device) -> Result<T, StoreError>,
    {
        let mut devices = self.devices.write().await;
        let device = devices.get_mut(id).ok_or_else(|| StoreError::not_found(id))?;
        let value = f(device)?;
        device.updated_at = Utc::now();
        Ok(value)
    }

    /// Applies `f` and returns the device as stored afterwards.
    async fn find_after<F>(&self, id: &str, f: F) -> Result<Device, StoreError>
    where
        F: FnOnce(&mut Device) -> Result<(), StoreError>,
    {
        let mut devices = self.devices.write().await;
        let device = devices.get_mut(id).ok_or_else(|| StoreError::not_found(id))?;
        f(device)?;
        device.updated_at = Utc::now();
        Ok(device.clone())
    }
}

#[async_trait::async_trait]
impl DeviceStore for InMemoryDeviceRepository {
    async fn list(&self) -> Result<Vec<Device>, StoreError> {
        let devices = self.devices.read().await;
        let mut all: Vec<Device> = devices.values().cloned().collect();
        all.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(all)
    }

    async fn find(&self, id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.read().await.get(id).cloned())
    }

    async fn create(&self, device: NewDevice) -> Result<Device, StoreError> {
        let device = device.into_device(Utc::now());
        device.check_invariants().map_err(StoreError::Validation)?;

        let mut devices = self.devices.write().await;
        if devices.contains_key(&device.id) {
            return Err(StoreError::Duplicate("Device ID already exists".to_string()));
        }
        if devices.values().any(|d| d.imei1 == device.imei1) {
            return Err(StoreError::Duplicate(
                "IMEI 1 is already registered".to_string(),
            ));
        }
        devices.insert(device.id.clone(), device.clone());
        Ok(device)
    }

    async fn update(&self, id: &str, patch: UpdateDeviceRequest) -> Result<Device, StoreError> {
        self.find_after(id, |device| {
            let mut updated = device.clone();
            patch.apply_to(&mut updated);
            updated.check_invariants().map_err(StoreError::Validation)?;
            *device = updated;
            Ok(())
        })
        .await
    }

    async fn apply_lock_state(&self, id: &str, state: LockState) -> Result<Device, StoreError> {
        self.find_after(id, |device| {
            device.apply_lock_state(state);
            Ok(())
        })
        .await
    }

    async fn set_feature_lock(
        &self,
        id: &str,
        feature: Feature,
        locked: bool,
    ) -> Result<Device, StoreError> {
        self.find_after(id, |device| {
            device.set_feature_lock(feature, locked);
            Ok(())
        })
        .await
    }

    async fn update_location(
        &self,
        id: &str,
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
    ) -> Result<DeviceLocation, StoreError> {
        self.modify(id, |device| {
            let location = DeviceLocation {
                lat,
                lng,
                last_updated: at,
            };
            device.location = Some(location.clone());
            Ok(location)
        })
        .await
    }

    async fn update_telemetry(
        &self,
        id: &str,
        telemetry: TelemetryPatch,
    ) -> Result<Device, StoreError> {
        self.find_after(id, |device| {
            telemetry.apply_to(&mut device.telemetry);
            Ok(())
        })
        .await
    }

    async fn record_payment(
        &self,
        id: &str,
        payment: NewPayment,
        next_due_date: Option<NaiveDate>,
    ) -> Result<Device, StoreError> {
        self.find_after(id, |device| {
            device
                .emi_details
                .record_payment(payment, next_due_date, Utc::now())
                .map(|_| ())
        })
        .await
    }

    async fn set_command(
        &self,
        id: &str,
        command: DeviceCommand,
        requested: bool,
    ) -> Result<Device, StoreError> {
        self.find_after(id, |device| {
            match command {
                DeviceCommand::Wipe => device.wipe_requested = requested,
                DeviceCommand::Release => device.release_requested = requested,
            }
            Ok(())
        })
        .await
    }

    async fn set_tracking(&self, id: &str, tracking: bool) -> Result<Device, StoreError> {
        self.find_after(id, |device| {
            device.is_tracking = tracking;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.devices
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(id))
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut devices = self.devices.write().await;
        let count = devices.len() as u64;
        devices.clear();
        Ok(count)
    }

    async fn find_overdue(&self, today: NaiveDate) -> Result<Vec<Device>, StoreError> {
        let devices = self.devices.read().await;
        let mut overdue: Vec<Device> = devices
            .values()
            .filter(|d| d.is_overdue(today))
            .cloned()
            .collect();
        overdue.sort_by(|a, b| {
            a.emi_details
                .next_due_date
                .cmp(&b.emi_details.next_due_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(overdue)
    }

    async fn lock_if_overdue(&self, id: &str, today: NaiveDate) -> Result<bool, StoreError> {
        let mut devices = self.devices.write().await;
        match devices.get_mut(id) {
            Some(device) if device.is_overdue(today) => {
                device.lock();
                device.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
