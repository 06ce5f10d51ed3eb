//! Location tracking sub-loop.
//!
//! Runs only while the server's `isTracking` flag is set. The heartbeat owns
//! the [`Tracker`] and starts or stops it when that flag changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::DeviceCapabilities;
use crate::client::DeviceApi;

/// Samples the position once and pushes it.
pub async fn report_position(
    device_id: &str,
    api: &dyn DeviceApi,
    caps: &dyn DeviceCapabilities,
) {
    let position = match caps.current_position().await {
        Ok(position) => position,
        Err(e) => {
            warn!(device_id, error = %e, "Position unavailable");
            return;
        }
    };

    match api.push_location(device_id, position.lat, position.lng).await {
        Ok(()) => debug!(device_id, lat = position.lat, lng = position.lng, "Location pushed"),
        Err(e) => warn!(device_id, error = %e, "Location push failed"),
    }
}

/// Handle to a running tracking loop.
pub struct Tracker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Tracker {
    /// Spawns the loop. It stops when `cancel` (or its parent) is cancelled.
    pub fn spawn(
        device_id: String,
        api: Arc<dyn DeviceApi>,
        caps: Arc<dyn DeviceCapabilities>,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(device_id = %device_id, period_secs = period.as_secs(), "Location tracking started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        report_position(&device_id, api.as_ref(), caps.as_ref()).await;
                    }
                }
            }

            info!(device_id = %device_id, "Location tracking stopped");
        });

        Self { cancel, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancels the loop and waits for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Tracking task panicked");
        }
    }
}
