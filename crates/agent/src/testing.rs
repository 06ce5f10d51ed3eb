//! Mock API and capabilities shared by the agent's unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use domain::models::{Device, FeatureLocks, TelemetryPatch};
use serde_json::json;

use crate::capability::{CapabilityError, DeviceCapabilities, Position, TelemetrySample};
use crate::client::{ClientError, DeviceApi, FetchOutcome, FlagUpdate};
use crate::config::Timings;
use crate::identity::IdentityStore;

pub fn sample_device(id: &str) -> Device {
    serde_json::from_value(json!({
        "id": id,
        "customerName": "Ravi Kumar",
        "mobileNo": "9876543210",
        "aadharNo": "123456789012",
        "address": "12 Park Street, Kolkata",
        "imei1": "490154203237518",
        "deviceModel": "Galaxy A15",
        "isLocked": false,
        "featureLocks": {
            "camera": false, "network": false, "wifi": false, "powerOff": false, "reset": false
        },
        "emiDetails": {
            "financeName": "Acme Finance",
            "totalAmount": 12000.0,
            "emiAmount": 1000.0,
            "tenure": 12,
            "paidEmis": 3,
            "nextDueDate": "2026-11-05"
        },
        "registeredAt": "2026-07-01T10:00:00Z",
        "createdAt": "2026-07-01T10:00:00Z",
        "updatedAt": "2026-07-01T10:00:00Z"
    }))
    .unwrap()
}

pub fn fast_timings() -> Timings {
    Timings {
        heartbeat_interval: Duration::from_millis(10),
        fetch_timeout: Duration::from_millis(50),
        request_timeout: Duration::from_millis(50),
        tracking_interval: Duration::from_millis(10),
        command_delay: Duration::ZERO,
        unlink_delay: Duration::ZERO,
    }
}

pub fn temp_identity_store() -> IdentityStore {
    IdentityStore::new(
        std::env::temp_dir()
            .join(format!("emi-agent-{}", uuid::Uuid::new_v4()))
            .join("identity.json"),
    )
}

/// In-memory stand-in for the device API.
#[derive(Default)]
pub struct MockApi {
    /// `None` answers fetches with `Missing`.
    pub device: Mutex<Option<Device>>,
    pub fail_fetch: AtomicBool,
    pub fetch_delay: Mutex<Option<Duration>>,
    pub fetches: AtomicUsize,
    pub telemetry: Mutex<Vec<TelemetryPatch>>,
    pub location_log: Mutex<Vec<(f64, f64)>>,
    pub flags: Mutex<Vec<FlagUpdate>>,
}

impl MockApi {
    pub fn with_device(device: Device) -> Self {
        Self {
            device: Mutex::new(Some(device)),
            ..Default::default()
        }
    }

    pub fn set_device(&self, device: Option<Device>) {
        *self.device.lock().unwrap() = device;
    }

    pub fn update_device(&self, f: impl FnOnce(&mut Device)) {
        if let Some(device) = self.device.lock().unwrap().as_mut() {
            f(device);
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn telemetry_count(&self) -> usize {
        self.telemetry.lock().unwrap().len()
    }

    pub fn locations(&self) -> Vec<(f64, f64)> {
        self.location_log.lock().unwrap().clone()
    }

    pub fn flag_updates(&self) -> Vec<FlagUpdate> {
        self.flags.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DeviceApi for MockApi {
    async fn fetch_device(&self, _device_id: &str) -> Result<FetchOutcome, ClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        Ok(match self.device.lock().unwrap().clone() {
            Some(device) => FetchOutcome::Found(Box::new(device)),
            None => FetchOutcome::Missing,
        })
    }

    async fn push_telemetry(
        &self,
        _device_id: &str,
        telemetry: &TelemetryPatch,
    ) -> Result<(), ClientError> {
        self.telemetry.lock().unwrap().push(telemetry.clone());
        Ok(())
    }

    async fn push_location(&self, _device_id: &str, lat: f64, lng: f64) -> Result<(), ClientError> {
        self.location_log.lock().unwrap().push((lat, lng));
        Ok(())
    }

    async fn update_flags(&self, _device_id: &str, update: &FlagUpdate) -> Result<(), ClientError> {
        self.flags.lock().unwrap().push(update.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CapCall {
    Wipe,
    RemoveDeviceOwner,
    Enforce(FeatureLocks),
    StartLockTask,
    StopLockTask,
}

/// Records capability calls; failures are opt-in.
#[derive(Default)]
pub struct MockCapabilities {
    pub calls: Mutex<Vec<CapCall>>,
    pub fail_wipe: bool,
    pub fail_release: bool,
    pub no_fix: bool,
}

impl MockCapabilities {
    pub fn calls(&self) -> Vec<CapCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &CapCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: CapCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl DeviceCapabilities for MockCapabilities {
    async fn wipe(&self) -> Result<(), CapabilityError> {
        self.record(CapCall::Wipe);
        if self.fail_wipe {
            return Err(CapabilityError::Denied("not device owner".to_string()));
        }
        Ok(())
    }

    async fn remove_device_owner(&self) -> Result<(), CapabilityError> {
        self.record(CapCall::RemoveDeviceOwner);
        if self.fail_release {
            return Err(CapabilityError::Failed("policy manager busy".to_string()));
        }
        Ok(())
    }

    async fn enforce_restrictions(&self, locks: &FeatureLocks) -> Result<(), CapabilityError> {
        self.record(CapCall::Enforce(*locks));
        Ok(())
    }

    async fn start_lock_task(&self) -> Result<(), CapabilityError> {
        self.record(CapCall::StartLockTask);
        Ok(())
    }

    async fn stop_lock_task(&self) -> Result<(), CapabilityError> {
        self.record(CapCall::StopLockTask);
        Ok(())
    }

    async fn read_telemetry(&self) -> Result<TelemetrySample, CapabilityError> {
        Ok(TelemetrySample {
            battery_level: Some(81),
            network_type: Some("wifi".to_string()),
            sim_carrier: Some("Airtel".to_string()),
            android_version: Some("14".to_string()),
        })
    }

    async fn current_position(&self) -> Result<Position, CapabilityError> {
        if self.no_fix {
            return Err(CapabilityError::Unsupported("geolocation"));
        }
        Ok(Position {
            lat: 12.9716,
            lng: 77.5946,
        })
    }
}
