//! Heartbeat loop: keeps the handset in step with the server record.
//!
//! Every cycle fetches the device, runs at most one pending command, then
//! reconciles lock state and tracking and finally pushes telemetry. Commands
//! are always checked before telemetry goes out. Wipe, release and unlink are
//! terminal and end the loop.

use std::sync::Arc;

use chrono::Utc;
use domain::models::{Device, DeviceCommand, FeatureLocks, TelemetryPatch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capability::DeviceCapabilities;
use crate::client::{ClientError, DeviceApi, FetchOutcome, FlagUpdate};
use crate::config::Timings;
use crate::error::AgentError;
use crate::identity::IdentityStore;
use crate::tracking::Tracker;

/// How the agent's management of the handset ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// The admin deleted the device record.
    Unlinked,
    Wiped,
    /// Loan settled; the app may be uninstalled.
    Released,
    /// A wipe or release could not be carried out; the agent gave up control.
    CommandFailed(DeviceCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Synced,
    /// The fetch failed; local state is unchanged until the next tick.
    Skipped,
    Terminal(Terminal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Cancelled,
    Finished(Terminal),
}

pub struct Heartbeat {
    device_id: String,
    api: Arc<dyn DeviceApi>,
    caps: Arc<dyn DeviceCapabilities>,
    identity: IdentityStore,
    timings: Timings,
    cancel: CancellationToken,
    /// Lock state last applied through the capability layer.
    enforced: Option<(bool, FeatureLocks)>,
    unlinking: bool,
    tracker: Option<Tracker>,
}

impl Heartbeat {
    pub fn new(
        device_id: impl Into<String>,
        api: Arc<dyn DeviceApi>,
        caps: Arc<dyn DeviceCapabilities>,
        identity: IdentityStore,
        timings: Timings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            api,
            caps,
            identity,
            timings,
            cancel,
            enforced: None,
            unlinking: false,
            tracker: None,
        }
    }

    async fn fetch(&self) -> Result<FetchOutcome, ClientError> {
        tokio::time::timeout(
            self.timings.fetch_timeout,
            self.api.fetch_device(&self.device_id),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
    }

    /// Confirms the record is reachable before entering service mode and
    /// records that the provisioning permissions were granted.
    pub async fn activate(&self) -> Result<Device, AgentError> {
        let device = match self.fetch().await? {
            FetchOutcome::Found(device) => *device,
            FetchOutcome::Missing => return Err(AgentError::UnknownDevice(self.device_id.clone())),
        };

        if !device.permissions_granted {
            self.api
                .update_flags(&self.device_id, &FlagUpdate::permissions_granted())
                .await?;
            info!(device_id = %self.device_id, "Permissions marked as granted");
        }

        info!(
            device_id = %self.device_id,
            customer = %device.customer_name,
            is_locked = device.is_locked,
            "Agent activated; entering service mode"
        );
        Ok(device)
    }

    /// One fetch plus whatever the fetched record asks for.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        if self.unlinking {
            return CycleOutcome::Terminal(Terminal::Unlinked);
        }

        let device = match self.fetch().await {
            Ok(FetchOutcome::Found(device)) => device,
            Ok(FetchOutcome::Missing) => return CycleOutcome::Terminal(self.unlink().await),
            Err(e) => {
                warn!(device_id = %self.device_id, error = %e, "Heartbeat fetch failed; keeping last known state");
                return CycleOutcome::Skipped;
            }
        };

        if let Some(command) = device.pending_command() {
            return CycleOutcome::Terminal(self.execute(command).await);
        }

        self.reconcile_lock(&device).await;
        self.reconcile_tracking(&device).await;
        self.push_telemetry().await;

        CycleOutcome::Synced
    }

    /// Runs cycles every heartbeat period until a terminal outcome or
    /// cancellation. A slow cycle delays the following tick.
    pub async fn run(mut self) -> LoopExit {
        let mut interval = tokio::time::interval(self.timings.heartbeat_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; activation just fetched.
        interval.tick().await;

        info!(
            device_id = %self.device_id,
            period_secs = self.timings.heartbeat_interval.as_secs(),
            "Heartbeat started"
        );

        let cancel = self.cancel.clone();
        let exit = loop {
            tokio::select! {
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                _ = interval.tick() => {
                    if let CycleOutcome::Terminal(terminal) = self.run_cycle().await {
                        break LoopExit::Finished(terminal);
                    }
                }
            }
        };

        self.stop_tracker().await;
        cancel.cancel();
        info!(device_id = %self.device_id, ?exit, "Heartbeat stopped");
        exit
    }

    /// The record is gone: give up control exactly once.
    async fn unlink(&mut self) -> Terminal {
        self.unlinking = true;
        warn!(device_id = %self.device_id, "Device removed by admin; releasing control");

        if let Err(e) = self.caps.remove_device_owner().await {
            error!(device_id = %self.device_id, error = %e, "Auto-release failed");
        }
        tokio::time::sleep(self.timings.unlink_delay).await;
        self.exit_service_mode().await;

        info!(device_id = %self.device_id, "Device unlinked; the app can now be uninstalled");
        Terminal::Unlinked
    }

    async fn execute(&mut self, command: DeviceCommand) -> Terminal {
        match command {
            DeviceCommand::Wipe => {
                warn!(device_id = %self.device_id, "Remote wipe initiated");
                tokio::time::sleep(self.timings.command_delay).await;

                // Cleared first: a successful wipe never returns.
                self.acknowledge(command).await;

                match self.caps.wipe().await {
                    Ok(()) => {
                        self.stop_tracker().await;
                        Terminal::Wiped
                    }
                    Err(e) => {
                        error!(device_id = %self.device_id, error = %e, "Wipe failed");
                        self.send_flags(&FlagUpdate::reopen(command), command).await;
                        self.exit_service_mode().await;
                        Terminal::CommandFailed(command)
                    }
                }
            }
            DeviceCommand::Release => {
                info!(device_id = %self.device_id, "Loan settled; releasing device");
                tokio::time::sleep(self.timings.command_delay).await;

                match self.caps.remove_device_owner().await {
                    Ok(()) => {
                        self.acknowledge(command).await;
                        self.exit_service_mode().await;
                        info!(device_id = %self.device_id, "Device released; safe to uninstall");
                        Terminal::Released
                    }
                    Err(e) => {
                        error!(device_id = %self.device_id, error = %e, "Release failed");
                        self.exit_service_mode().await;
                        Terminal::CommandFailed(command)
                    }
                }
            }
        }
    }

    /// Best effort: a failure leaves the flag set on the server.
    async fn acknowledge(&self, command: DeviceCommand) {
        self.send_flags(&FlagUpdate::clear(command), command).await;
    }

    async fn send_flags(&self, update: &FlagUpdate, command: DeviceCommand) {
        if let Err(e) = self.api.update_flags(&self.device_id, update).await {
            warn!(device_id = %self.device_id, %command, error = %e, "Failed to update command flag");
        }
    }

    async fn reconcile_lock(&mut self, device: &Device) {
        let desired = (device.is_locked, device.feature_locks);
        if self.enforced == Some(desired) {
            return;
        }

        let caps = Arc::clone(&self.caps);
        let applied = async {
            caps.enforce_restrictions(&device.feature_locks).await?;
            if device.is_locked {
                caps.start_lock_task().await
            } else {
                caps.stop_lock_task().await
            }
        }
        .await;

        match applied {
            Ok(()) => {
                info!(
                    device_id = %self.device_id,
                    is_locked = device.is_locked,
                    restricted = ?device.feature_locks.restricted(),
                    "Lock state enforced"
                );
                self.enforced = Some(desired);
            }
            // Retried on the next cycle.
            Err(e) => error!(device_id = %self.device_id, error = %e, "Lock state management failed"),
        }
    }

    async fn reconcile_tracking(&mut self, device: &Device) {
        let running = self.tracker.as_ref().is_some_and(Tracker::is_running);
        match (device.is_tracking, running) {
            (true, false) => {
                self.tracker = Some(Tracker::spawn(
                    self.device_id.clone(),
                    Arc::clone(&self.api),
                    Arc::clone(&self.caps),
                    self.timings.tracking_interval,
                    self.cancel.child_token(),
                ));
            }
            (false, true) => self.stop_tracker().await,
            _ => {}
        }
    }

    async fn push_telemetry(&self) {
        let sample = match self.caps.read_telemetry().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(device_id = %self.device_id, error = %e, "Telemetry read failed; reporting liveness only");
                Default::default()
            }
        };

        let telemetry = TelemetryPatch {
            battery_level: sample.battery_level,
            network_type: sample.network_type,
            sim_carrier: sample.sim_carrier,
            android_version: sample.android_version,
            last_seen: Some(Utc::now()),
        };

        match self.api.push_telemetry(&self.device_id, &telemetry).await {
            Ok(()) => debug!(device_id = %self.device_id, "Telemetry pushed"),
            Err(e) => warn!(device_id = %self.device_id, error = %e, "Telemetry update failed"),
        }
    }

    async fn stop_tracker(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.stop().await;
        }
    }

    /// Leaves hidden service mode: no kiosk, no tracking, no identity.
    async fn exit_service_mode(&mut self) {
        self.stop_tracker().await;

        if matches!(self.enforced, Some((true, _))) {
            if let Err(e) = self.caps.stop_lock_task().await {
                warn!(device_id = %self.device_id, error = %e, "Failed to leave lock task mode");
            }
        }
        self.enforced = None;

        if let Err(e) = self.identity.clear().await {
            error!(device_id = %self.device_id, error = %e, "Failed to clear local identity");
        }
    }
}
