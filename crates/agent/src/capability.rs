//! Native device-admin operations, invoked as opaque capability calls.
//!
//! On a handset these are backed by the platform's device policy manager.
//! [`LoggingCapabilities`] is the headless stand-in used when the agent runs
//! off-device.

use domain::models::FeatureLocks;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SimulatedPosition;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("Permission denied: {0}")]
    Denied(String),

    #[error("Capability call failed: {0}")]
    Failed(String),
}

/// Handset readings pushed with every heartbeat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySample {
    pub battery_level: Option<i32>,
    pub network_type: Option<String>,
    pub sim_carrier: Option<String>,
    pub android_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

#[async_trait::async_trait]
pub trait DeviceCapabilities: Send + Sync {
    /// Factory reset. Does not return on a real handset.
    async fn wipe(&self) -> Result<(), CapabilityError>;

    /// Gives up device-owner privileges so the app becomes uninstallable.
    async fn remove_device_owner(&self) -> Result<(), CapabilityError>;

    /// Applies per-feature restrictions.
    async fn enforce_restrictions(&self, locks: &FeatureLocks) -> Result<(), CapabilityError>;

    /// Pins the lock screen (kiosk mode).
    async fn start_lock_task(&self) -> Result<(), CapabilityError>;

    async fn stop_lock_task(&self) -> Result<(), CapabilityError>;

    async fn read_telemetry(&self) -> Result<TelemetrySample, CapabilityError>;

    async fn current_position(&self) -> Result<Position, CapabilityError>;
}

/// Records every call in the log and touches nothing.
#[derive(Debug, Default)]
pub struct LoggingCapabilities {
    position: Option<SimulatedPosition>,
}

impl LoggingCapabilities {
    pub fn new(position: Option<SimulatedPosition>) -> Self {
        Self { position }
    }
}

#[async_trait::async_trait]
impl DeviceCapabilities for LoggingCapabilities {
    async fn wipe(&self) -> Result<(), CapabilityError> {
        warn!("Factory reset requested; no device policy manager available");
        Err(CapabilityError::Unsupported("wipe"))
    }

    async fn remove_device_owner(&self) -> Result<(), CapabilityError> {
        info!("Device owner released");
        Ok(())
    }

    async fn enforce_restrictions(&self, locks: &FeatureLocks) -> Result<(), CapabilityError> {
        let restricted: Vec<_> = locks.restricted().iter().map(|f| f.as_str()).collect();
        info!(?restricted, "Feature restrictions applied");
        Ok(())
    }

    async fn start_lock_task(&self) -> Result<(), CapabilityError> {
        info!("Lock task mode started");
        Ok(())
    }

    async fn stop_lock_task(&self) -> Result<(), CapabilityError> {
        info!("Lock task mode stopped");
        Ok(())
    }

    async fn read_telemetry(&self) -> Result<TelemetrySample, CapabilityError> {
        Ok(TelemetrySample {
            battery_level: None,
            network_type: Some("ethernet".to_string()),
            sim_carrier: None,
            android_version: Some(std::env::consts::OS.to_string()),
        })
    }

    async fn current_position(&self) -> Result<Position, CapabilityError> {
        self.position
            .map(|p| Position { lat: p.lat, lng: p.lng })
            .ok_or(CapabilityError::Unsupported("geolocation"))
    }
}
