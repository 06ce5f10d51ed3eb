//! Overdue payment sweep: auto-locks devices whose installment is past due.

use std::sync::Arc;

use chrono::NaiveDate;
use domain::services::{ClockZone, DeviceStore, LockState};
use metrics::counter;
use tracing::{error, info, warn};

use super::scheduler::{Job, JobFrequency};
use crate::middleware::metrics::record_lock_transition;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub candidates: usize,
    pub locked: usize,
    /// Candidates that became ineligible between selection and lock.
    pub skipped: usize,
    pub failed: usize,
}

pub struct OverduePaymentsJob {
    store: Arc<dyn DeviceStore>,
    zone: ClockZone,
    frequency: JobFrequency,
}

impl OverduePaymentsJob {
    pub fn new(store: Arc<dyn DeviceStore>, zone: ClockZone, interval_secs: u64) -> Self {
        Self {
            store,
            zone,
            frequency: JobFrequency::from_secs(interval_secs),
        }
    }

    /// Locks every active device that is overdue as of `today`.
    ///
    /// Only fails when the candidate query itself fails; per-device errors
    /// are counted and the sweep moves on.
    pub async fn sweep(&self, today: NaiveDate) -> Result<SweepSummary, String> {
        let candidates = self
            .store
            .find_overdue(today)
            .await
            .map_err(|e| format!("Failed to query overdue devices: {}", e))?;

        let mut summary = SweepSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        for device in candidates {
            match self.store.lock_if_overdue(&device.id, today).await {
                Ok(true) => {
                    summary.locked += 1;
                    counter!("scheduler_devices_locked_total").increment(1);
                    record_lock_transition(LockState::Locked, "scheduler");
                    info!(
                        device_id = %device.id,
                        next_due_date = %device.emi_details.next_due_date,
                        paid_emis = device.emi_details.paid_emis,
                        tenure = device.emi_details.tenure,
                        "Device locked for overdue payment"
                    );
                }
                Ok(false) => {
                    summary.skipped += 1;
                    info!(device_id = %device.id, "Device no longer overdue, skipped");
                }
                Err(e) => {
                    summary.failed += 1;
                    counter!("scheduler_lock_failures_total").increment(1);
                    error!(device_id = %device.id, error = %e, "Failed to lock overdue device");
                }
            }
        }

        Ok(summary)
    }
}

#[async_trait::async_trait]
impl Job for OverduePaymentsJob {
    fn name(&self) -> &'static str {
        "overdue_payments"
    }

    fn frequency(&self) -> JobFrequency {
        self.frequency
    }

    fn run_on_start(&self) -> bool {
        true
    }

    async fn execute(&self) -> Result<(), String> {
        let today = self.zone.today();
        let summary = self.sweep(today).await?;

        info!(
            today = %today,
            candidates = summary.candidates,
            locked = summary.locked,
            skipped = summary.skipped,
            failed = summary.failed,
            "Overdue sweep finished"
        );

        if summary.failed > 0 {
            warn!(failed = summary.failed, "Some overdue devices could not be locked");
            return Err(format!(
                "{} of {} overdue devices could not be locked",
                summary.failed, summary.candidates
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use domain::models::{
        CreateDeviceRequest, Device, DeviceCommand, DeviceLocation, Feature, NewDevice,
        NewPayment, PaymentMethod, TelemetryPatch, UpdateDeviceRequest,
    };
    use domain::services::StoreError;
    use persistence::repositories::InMemoryDeviceRepository;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn new_device(id: &str, imei: &str, due: NaiveDate, tenure: i32, paid: i32) -> NewDevice {
        let request: CreateDeviceRequest = serde_json::from_value(serde_json::json!({
            "id": id,
            "customerName": "Meena Iyer",
            "mobileNo": "9876543210",
            "aadharNo": "123456789012",
            "address": "7 Temple Road",
            "imei1": imei,
            "deviceModel": "Redmi 13C",
            "emiDetails": {
                "financeName": "Acme Finance",
                "totalAmount": 12000.0,
                "emiAmount": 1000.0,
                "tenure": tenure,
                "paidEmis": paid,
                "nextDueDate": due
            }
        }))
        .unwrap();
        NewDevice::from_request(request)
    }

    fn job(store: Arc<dyn DeviceStore>) -> OverduePaymentsJob {
        OverduePaymentsJob::new(store, ClockZone::Local, 3600)
    }

    #[tokio::test]
    async fn test_sweep_locks_only_overdue_unsettled_devices() {
        let store = Arc::new(InMemoryDeviceRepository::new());
        let yesterday = today() - Duration::days(1);
        store
            .create(new_device("late", "490154203237518", yesterday, 12, 3))
            .await
            .unwrap();
        store
            .create(new_device("due-today", "356938035643809", today(), 12, 3))
            .await
            .unwrap();
        store
            .create(new_device("settled", "352099001761481", yesterday, 10, 10))
            .await
            .unwrap();

        let summary = job(store.clone()).sweep(today()).await.unwrap();

        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.locked, 1);

        let late = store.find("late").await.unwrap().unwrap();
        assert!(late.is_locked);
        assert!(late.feature_locks.is_fully_restricted());

        assert!(!store.find("due-today").await.unwrap().unwrap().is_locked);
        assert!(!store.find("settled").await.unwrap().unwrap().is_locked);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = Arc::new(InMemoryDeviceRepository::new());
        store
            .create(new_device(
                "late",
                "490154203237518",
                today() - Duration::days(5),
                12,
                0,
            ))
            .await
            .unwrap();

        let job = job(store.clone());
        assert_eq!(job.sweep(today()).await.unwrap().locked, 1);

        let second = job.sweep(today()).await.unwrap();
        assert_eq!(second.candidates, 0);
        assert_eq!(second.locked, 0);
    }

    /// Store whose per-device lock fails for one id.
    struct FlakyStore {
        inner: InMemoryDeviceRepository,
        broken_id: &'static str,
    }

    #[async_trait::async_trait]
    impl DeviceStore for FlakyStore {
        async fn list(&self) -> Result<Vec<Device>, StoreError> {
            self.inner.list().await
        }
        async fn find(&self, id: &str) -> Result<Option<Device>, StoreError> {
            self.inner.find(id).await
        }
        async fn create(&self, device: NewDevice) -> Result<Device, StoreError> {
            self.inner.create(device).await
        }
        async fn update(&self, id: &str, patch: UpdateDeviceRequest) -> Result<Device, StoreError> {
            self.inner.update(id, patch).await
        }
        async fn apply_lock_state(&self, id: &str, state: LockState) -> Result<Device, StoreError> {
            self.inner.apply_lock_state(id, state).await
        }
        async fn set_feature_lock(
            &self,
            id: &str,
            feature: Feature,
            locked: bool,
        ) -> Result<Device, StoreError> {
            self.inner.set_feature_lock(id, feature, locked).await
        }
        async fn update_location(
            &self,
            id: &str,
            lat: f64,
            lng: f64,
            at: DateTime<Utc>,
        ) -> Result<DeviceLocation, StoreError> {
            self.inner.update_location(id, lat, lng, at).await
        }
        async fn update_telemetry(
            &self,
            id: &str,
            telemetry: TelemetryPatch,
        ) -> Result<Device, StoreError> {
            self.inner.update_telemetry(id, telemetry).await
        }
        async fn record_payment(
            &self,
            id: &str,
            payment: NewPayment,
            next_due_date: Option<NaiveDate>,
        ) -> Result<Device, StoreError> {
            self.inner.record_payment(id, payment, next_due_date).await
        }
        async fn set_command(
            &self,
            id: &str,
            command: DeviceCommand,
            requested: bool,
        ) -> Result<Device, StoreError> {
            self.inner.set_command(id, command, requested).await
        }
        async fn set_tracking(&self, id: &str, tracking: bool) -> Result<Device, StoreError> {
            self.inner.set_tracking(id, tracking).await
        }
        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }
        async fn delete_all(&self) -> Result<u64, StoreError> {
            self.inner.delete_all().await
        }
        async fn find_overdue(&self, today: NaiveDate) -> Result<Vec<Device>, StoreError> {
            self.inner.find_overdue(today).await
        }
        async fn lock_if_overdue(&self, id: &str, today: NaiveDate) -> Result<bool, StoreError> {
            if id == self.broken_id {
                return Err(StoreError::Backend("connection reset".to_string()));
            }
            self.inner.lock_if_overdue(id, today).await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_per_device_failure_does_not_abort_sweep() {
        let inner = InMemoryDeviceRepository::new();
        let due = today() - Duration::days(2);
        inner
            .create(new_device("a", "490154203237518", due, 12, 1))
            .await
            .unwrap();
        inner
            .create(new_device("b", "356938035643809", due, 12, 1))
            .await
            .unwrap();
        let store = Arc::new(FlakyStore {
            inner,
            broken_id: "a",
        });

        let summary = job(store.clone()).sweep(today()).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.locked, 1);
        assert!(store.find("b").await.unwrap().unwrap().is_locked);
        assert!(!store.find("a").await.unwrap().unwrap().is_locked);
    }

    #[tokio::test]
    async fn test_payment_after_selection_prevents_lock() {
        let store = Arc::new(InMemoryDeviceRepository::new());
        store
            .create(new_device(
                "late",
                "490154203237518",
                today() - Duration::days(1),
                12,
                0,
            ))
            .await
            .unwrap();

        // Payment moves the due date forward before the lock is applied.
        store
            .record_payment(
                "late",
                NewPayment {
                    id: None,
                    amount: 1000.0,
                    paid_date: today(),
                    transaction_id: "TXN-9".to_string(),
                    payment_method: PaymentMethod::Cash,
                    recorded_by: "admin".to_string(),
                    notes: None,
                },
                Some(today() + Duration::days(30)),
            )
            .await
            .unwrap();

        assert!(!store.lock_if_overdue("late", today()).await.unwrap());
        assert!(!store.find("late").await.unwrap().unwrap().is_locked);
    }
}
