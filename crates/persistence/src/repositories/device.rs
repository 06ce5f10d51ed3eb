//! PostgreSQL-backed device store.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use domain::models::{
    Device, DeviceCommand, DeviceLocation, Feature, NewDevice, NewPayment, PaymentRecord,
    TelemetryPatch, UpdateDeviceRequest,
};
use domain::services::{DeviceStore, LockState, StoreError};
use sqlx::{PgExecutor, PgPool};

use crate::entities::{
    DeviceEntity, PaymentMethodDb, PaymentRecordEntity, DEVICE_COLUMNS, PAYMENT_COLUMNS,
};
use crate::metrics::QueryTimer;

const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

/// Maps a sqlx error onto the store's error kinds.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        match db_err.code().as_deref() {
            Some(UNIQUE_VIOLATION) => {
                let message = match db_err.constraint() {
                    Some("devices_imei1_unique") => "IMEI 1 is already registered".to_string(),
                    Some("devices_device_id_unique") => "Device ID already exists".to_string(),
                    Some("payment_records_emi_number_unique") => {
                        "EMI number already recorded".to_string()
                    }
                    _ => db_err.message().to_string(),
                };
                return StoreError::Duplicate(message);
            }
            Some(CHECK_VIOLATION) => {
                return StoreError::Validation(db_err.message().to_string());
            }
            _ => {}
        }
    }
    StoreError::Backend(err.to_string())
}

fn feature_column(feature: Feature) -> &'static str {
    match feature {
        Feature::Camera => "lock_camera",
        Feature::Network => "lock_network",
        Feature::Wifi => "lock_wifi",
        Feature::PowerOff => "lock_power_off",
        Feature::Reset => "lock_reset",
    }
}

fn command_column(command: DeviceCommand) -> &'static str {
    match command {
        DeviceCommand::Wipe => "wipe_requested",
        DeviceCommand::Release => "release_requested",
    }
}

/// Loads payment histories for the given device rows, keyed by row id.
async fn load_payments<'e, E>(
    executor: E,
    device_pks: Vec<i64>,
) -> Result<HashMap<i64, Vec<PaymentRecord>>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let mut histories: HashMap<i64, Vec<PaymentRecord>> = HashMap::new();
    if device_pks.is_empty() {
        return Ok(histories);
    }

    let rows = sqlx::query_as::<_, PaymentRecordEntity>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payment_records WHERE device_pk = ANY($1) ORDER BY device_pk, emi_number"
    ))
    .bind(device_pks)
    .fetch_all(executor)
    .await?;

    for row in rows {
        histories.entry(row.device_pk).or_default().push(row.into());
    }
    Ok(histories)
}

/// Store implementation over the `devices` and `payment_records` tables.
#[derive(Clone)]
pub struct PgDeviceRepository {
    pool: PgPool,
}

impl PgDeviceRepository {
    /// Creates a new PgDeviceRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, entities: Vec<DeviceEntity>) -> Result<Vec<Device>, StoreError> {
        let pks = entities.iter().map(|e| e.id).collect();
        let mut histories = load_payments(&self.pool, pks)
            .await
            .map_err(map_sqlx_error)?;

        Ok(entities
            .into_iter()
            .map(|e| {
                let history = histories.remove(&e.id).unwrap_or_default();
                e.into_device(history)
            })
            .collect())
    }

    /// Turns the row returned by a single-statement write into a device.
    async fn finish(&self, id: &str, row: Option<DeviceEntity>) -> Result<Device, StoreError> {
        let entity = row.ok_or_else(|| StoreError::not_found(id))?;
        let mut devices = self.hydrate(vec![entity]).await?;
        devices.pop().ok_or_else(|| StoreError::not_found(id))
    }
}

#[async_trait::async_trait]
impl DeviceStore for PgDeviceRepository {
    async fn list(&self) -> Result<Vec<Device>, StoreError> {
        let timer = QueryTimer::new("list_devices");
        let result = sqlx::query_as::<_, DeviceEntity>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY registered_at, id"
        ))
        .fetch_all(&self.pool)
        .await;
        timer.record();

        self.hydrate(result.map_err(map_sqlx_error)?).await
    }

    async fn find(&self, id: &str) -> Result<Option<Device>, StoreError> {
        let timer = QueryTimer::new("find_device");
        let result = sqlx::query_as::<_, DeviceEntity>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        match result.map_err(map_sqlx_error)? {
            Some(entity) => Ok(self.hydrate(vec![entity]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn create(&self, device: NewDevice) -> Result<Device, StoreError> {
        let device = device.into_device(Utc::now());
        device.check_invariants().map_err(StoreError::Validation)?;

        let timer = QueryTimer::new("create_device");
        let result = sqlx::query_as::<_, DeviceEntity>(&format!(
            r#"
            INSERT INTO devices (
                device_id, customer_name, customer_email, mobile_no, aadhar_no, address,
                imei1, imei2, device_model,
                finance_name, finance_phone, total_amount, emi_amount, tenure, paid_emis,
                next_due_date, registered_at, qr_code_data, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $17, $17)
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(&device.id)
        .bind(&device.customer_name)
        .bind(&device.customer_email)
        .bind(&device.mobile_no)
        .bind(&device.aadhar_no)
        .bind(&device.address)
        .bind(&device.imei1)
        .bind(&device.imei2)
        .bind(&device.device_model)
        .bind(&device.emi_details.finance_name)
        .bind(&device.emi_details.finance_phone)
        .bind(device.emi_details.total_amount)
        .bind(device.emi_details.emi_amount)
        .bind(device.emi_details.tenure)
        .bind(device.emi_details.paid_emis)
        .bind(device.emi_details.next_due_date)
        .bind(device.registered_at)
        .bind(&device.qr_code_data)
        .fetch_one(&self.pool)
        .await;
        timer.record();

        Ok(result.map_err(map_sqlx_error)?.into_device(Vec::new()))
    }

    async fn update(&self, id: &str, patch: UpdateDeviceRequest) -> Result<Device, StoreError> {
        let timer = QueryTimer::new("update_device");
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let current = sqlx::query_as::<_, DeviceEntity>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StoreError::not_found(id))?;

        let pk = current.id;
        let history = load_payments(&mut *tx, vec![pk])
            .await
            .map_err(map_sqlx_error)?
            .remove(&pk)
            .unwrap_or_default();
        let mut device = current.into_device(history);
        patch.apply_to(&mut device);
        device.check_invariants().map_err(StoreError::Validation)?;

        let updated = sqlx::query_as::<_, DeviceEntity>(&format!(
            r#"
            UPDATE devices SET
                customer_name = $2, customer_email = $3, mobile_no = $4, aadhar_no = $5,
                address = $6, imei2 = $7, device_model = $8,
                is_locked = $9, lock_camera = $10, lock_network = $11, lock_wifi = $12,
                lock_power_off = $13, lock_reset = $14,
                finance_name = $15, finance_phone = $16, total_amount = $17, emi_amount = $18,
                tenure = $19, paid_emis = $20, next_due_date = $21,
                qr_code_data = $22,
                battery_level = $23, network_type = $24, sim_carrier = $25,
                android_version = $26, last_seen = $27,
                is_tracking = $28, permissions_granted = $29,
                wipe_requested = $30, release_requested = $31,
                location_lat = $32, location_lng = $33, location_updated_at = $34,
                updated_at = $35
            WHERE id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(pk)
        .bind(&device.customer_name)
        .bind(&device.customer_email)
        .bind(&device.mobile_no)
        .bind(&device.aadhar_no)
        .bind(&device.address)
        .bind(&device.imei2)
        .bind(&device.device_model)
        .bind(device.is_locked)
        .bind(device.feature_locks.camera)
        .bind(device.feature_locks.network)
        .bind(device.feature_locks.wifi)
        .bind(device.feature_locks.power_off)
        .bind(device.feature_locks.reset)
        .bind(&device.emi_details.finance_name)
        .bind(&device.emi_details.finance_phone)
        .bind(device.emi_details.total_amount)
        .bind(device.emi_details.emi_amount)
        .bind(device.emi_details.tenure)
        .bind(device.emi_details.paid_emis)
        .bind(device.emi_details.next_due_date)
        .bind(&device.qr_code_data)
        .bind(device.telemetry.battery_level)
        .bind(&device.telemetry.network_type)
        .bind(&device.telemetry.sim_carrier)
        .bind(&device.telemetry.android_version)
        .bind(device.telemetry.last_seen)
        .bind(device.is_tracking)
        .bind(device.permissions_granted)
        .bind(device.wipe_requested)
        .bind(device.release_requested)
        .bind(device.location.as_ref().map(|l| l.lat))
        .bind(device.location.as_ref().map(|l| l.lng))
        .bind(device.location.as_ref().map(|l| l.last_updated))
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        timer.record();

        Ok(updated.into_device(device.emi_details.payment_history))
    }

    async fn apply_lock_state(&self, id: &str, state: LockState) -> Result<Device, StoreError> {
        let locks = state.feature_locks();

        let timer = QueryTimer::new("apply_lock_state");
        let result = sqlx::query_as::<_, DeviceEntity>(&format!(
            r#"
            UPDATE devices SET
                is_locked = $2, lock_camera = $3, lock_network = $4, lock_wifi = $5,
                lock_power_off = $6, lock_reset = $7, updated_at = $8
            WHERE device_id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(state.is_locked())
        .bind(locks.camera)
        .bind(locks.network)
        .bind(locks.wifi)
        .bind(locks.power_off)
        .bind(locks.reset)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        self.finish(id, result.map_err(map_sqlx_error)?).await
    }

    async fn set_feature_lock(
        &self,
        id: &str,
        feature: Feature,
        locked: bool,
    ) -> Result<Device, StoreError> {
        let column = feature_column(feature);

        let timer = QueryTimer::new("set_feature_lock");
        let result = sqlx::query_as::<_, DeviceEntity>(&format!(
            "UPDATE devices SET {column} = $2, updated_at = $3 WHERE device_id = $1 RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(id)
        .bind(locked)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        self.finish(id, result.map_err(map_sqlx_error)?).await
    }

    async fn update_location(
        &self,
        id: &str,
        lat: f64,
        lng: f64,
        at: DateTime<Utc>,
    ) -> Result<DeviceLocation, StoreError> {
        let timer = QueryTimer::new("update_location");
        let result = sqlx::query(
            r#"
            UPDATE devices SET
                location_lat = $2, location_lng = $3, location_updated_at = $4, updated_at = $4
            WHERE device_id = $1
            "#,
        )
        .bind(id)
        .bind(lat)
        .bind(lng)
        .bind(at)
        .execute(&self.pool)
        .await;
        timer.record();

        if result.map_err(map_sqlx_error)?.rows_affected() == 0 {
            return Err(StoreError::not_found(id));
        }
        Ok(DeviceLocation {
            lat,
            lng,
            last_updated: at,
        })
    }

    async fn update_telemetry(
        &self,
        id: &str,
        telemetry: TelemetryPatch,
    ) -> Result<Device, StoreError> {
        let timer = QueryTimer::new("update_telemetry");
        let result = sqlx::query_as::<_, DeviceEntity>(&format!(
            r#"
            UPDATE devices SET
                battery_level = COALESCE($2, battery_level),
                network_type = COALESCE($3, network_type),
                sim_carrier = COALESCE($4, sim_carrier),
                android_version = COALESCE($5, android_version),
                last_seen = COALESCE($6, last_seen),
                updated_at = $7
            WHERE device_id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(telemetry.battery_level)
        .bind(&telemetry.network_type)
        .bind(&telemetry.sim_carrier)
        .bind(&telemetry.android_version)
        .bind(telemetry.last_seen)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        self.finish(id, result.map_err(map_sqlx_error)?).await
    }

    async fn record_payment(
        &self,
        id: &str,
        payment: NewPayment,
        next_due_date: Option<NaiveDate>,
    ) -> Result<Device, StoreError> {
        let timer = QueryTimer::new("record_payment");
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let current = sqlx::query_as::<_, DeviceEntity>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| StoreError::not_found(id))?;

        let pk = current.id;
        let now = Utc::now();
        let mut emi = current.into_device(Vec::new()).emi_details;
        let record = emi.record_payment(payment, next_due_date, now)?;

        sqlx::query(
            r#"
            INSERT INTO payment_records (
                payment_id, device_pk, emi_number, amount, paid_date, transaction_id,
                payment_method, recorded_by, recorded_at, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&record.id)
        .bind(pk)
        .bind(record.emi_number)
        .bind(record.amount)
        .bind(record.paid_date)
        .bind(&record.transaction_id)
        .bind(PaymentMethodDb::from(record.payment_method))
        .bind(&record.recorded_by)
        .bind(record.recorded_at)
        .bind(&record.notes)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let updated = sqlx::query_as::<_, DeviceEntity>(&format!(
            r#"
            UPDATE devices SET paid_emis = $2, next_due_date = $3, updated_at = $4
            WHERE id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(pk)
        .bind(emi.paid_emis)
        .bind(emi.next_due_date)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let mut histories = load_payments(&mut *tx, vec![pk])
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        timer.record();

        Ok(updated.into_device(histories.remove(&pk).unwrap_or_default()))
    }

    async fn set_command(
        &self,
        id: &str,
        command: DeviceCommand,
        requested: bool,
    ) -> Result<Device, StoreError> {
        let column = command_column(command);

        let timer = QueryTimer::new("set_command");
        let result = sqlx::query_as::<_, DeviceEntity>(&format!(
            "UPDATE devices SET {column} = $2, updated_at = $3 WHERE device_id = $1 RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(id)
        .bind(requested)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        self.finish(id, result.map_err(map_sqlx_error)?).await
    }

    async fn set_tracking(&self, id: &str, tracking: bool) -> Result<Device, StoreError> {
        let timer = QueryTimer::new("set_tracking");
        let result = sqlx::query_as::<_, DeviceEntity>(&format!(
            "UPDATE devices SET is_tracking = $2, updated_at = $3 WHERE device_id = $1 RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(id)
        .bind(tracking)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        self.finish(id, result.map_err(map_sqlx_error)?).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let timer = QueryTimer::new("delete_device");
        let result = sqlx::query("DELETE FROM devices WHERE device_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await;
        timer.record();

        if result.map_err(map_sqlx_error)?.rows_affected() == 0 {
            return Err(StoreError::not_found(id));
        }
        Ok(())
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let timer = QueryTimer::new("delete_all_devices");
        let result = sqlx::query("DELETE FROM devices").execute(&self.pool).await;
        timer.record();

        Ok(result.map_err(map_sqlx_error)?.rows_affected())
    }

    async fn find_overdue(&self, today: NaiveDate) -> Result<Vec<Device>, StoreError> {
        let timer = QueryTimer::new("find_overdue_devices");
        let result = sqlx::query_as::<_, DeviceEntity>(&format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM devices
            WHERE is_locked = false AND next_due_date < $1 AND paid_emis < tenure
            ORDER BY next_due_date, id
            "#
        ))
        .bind(today)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        self.hydrate(result.map_err(map_sqlx_error)?).await
    }

    async fn lock_if_overdue(&self, id: &str, today: NaiveDate) -> Result<bool, StoreError> {
        let timer = QueryTimer::new("lock_if_overdue");
        let result = sqlx::query(
            r#"
            UPDATE devices SET
                is_locked = true, lock_camera = true, lock_network = true, lock_wifi = true,
                lock_power_off = true, lock_reset = true, updated_at = $3
            WHERE device_id = $1
              AND is_locked = false
              AND next_due_date < $2
              AND paid_emis < tenure
            "#,
        )
        .bind(id)
        .bind(today)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;
        timer.record();

        Ok(result.map_err(map_sqlx_error)?.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, run_migrations, DatabaseConfig};
    use chrono::Duration;
    use domain::models::{CreateDeviceRequest, PaymentMethod};

    /// Connects to `TEST_DATABASE_URL`; tests are skipped when it is unset.
    async fn test_repository() -> Option<PgDeviceRepository> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&DatabaseConfig {
            url,
            max_connections: 2,
            min_connections: 1,
            connect_timeout_secs: 10,
            idle_timeout_secs: 60,
        })
        .await
        .expect("failed to connect to test database");
        run_migrations(&pool).await.expect("migrations failed");
        Some(PgDeviceRepository::new(pool))
    }

    fn unique_suffix() -> String {
        format!("{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    fn new_device(due: NaiveDate) -> NewDevice {
        let suffix = unique_suffix();
        let request: CreateDeviceRequest = serde_json::from_value(serde_json::json!({
            "id": format!("PG-{}", suffix),
            "customerName": "Asha Rao",
            "mobileNo": "9876543210",
            "aadharNo": "123456789012",
            "address": "4 Park Street",
            "imei1": format!("{:0>15}", &suffix[suffix.len().saturating_sub(15)..]),
            "deviceModel": "Galaxy A15",
            "emiDetails": {
                "financeName": "Acme Finance",
                "totalAmount": 12000.0,
                "emiAmount": 1000.0,
                "tenure": 12,
                "nextDueDate": due
            }
        }))
        .unwrap();
        NewDevice::from_request(request)
    }

    fn payment() -> NewPayment {
        NewPayment {
            id: None,
            amount: 1000.0,
            paid_date: Utc::now().date_naive(),
            transaction_id: "TXN-PG".to_string(),
            payment_method: PaymentMethod::Cash,
            recorded_by: "admin".to_string(),
            notes: None,
        }
    }

    #[test]
    fn test_feature_columns_are_distinct() {
        let mut columns: Vec<_> = Feature::ALL.iter().map(|f| feature_column(*f)).collect();
        columns.sort();
        columns.dedup();
        assert_eq!(columns.len(), Feature::ALL.len());
    }

    #[tokio::test]
    async fn test_pg_create_find_delete() {
        let Some(repo) = test_repository().await else {
            return;
        };
        let created = repo.create(new_device(Utc::now().date_naive())).await.unwrap();

        let found = repo.find(&created.id).await.unwrap().unwrap();
        assert_eq!(found.imei1, created.imei1);
        assert!(!found.is_locked);

        repo.delete(&created.id).await.unwrap();
        assert!(repo.find(&created.id).await.unwrap().is_none());
        assert!(matches!(
            repo.delete(&created.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pg_duplicate_imei_rejected() {
        let Some(repo) = test_repository().await else {
            return;
        };
        let first = new_device(Utc::now().date_naive());
        let mut second = first.clone();
        second.id = format!("{}-b", first.id);

        let created = repo.create(first).await.unwrap();
        assert!(matches!(
            repo.create(second).await,
            Err(StoreError::Duplicate(_))
        ));
        repo.delete(&created.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_pg_payment_and_overdue_lock() {
        let Some(repo) = test_repository().await else {
            return;
        };
        let today = Utc::now().date_naive();
        let created = repo.create(new_device(today - Duration::days(2))).await.unwrap();

        let overdue = repo.find_overdue(today).await.unwrap();
        assert!(overdue.iter().any(|d| d.id == created.id));

        let paid = repo
            .record_payment(&created.id, payment(), Some(today + Duration::days(30)))
            .await
            .unwrap();
        assert_eq!(paid.emi_details.paid_emis, 1);
        assert_eq!(paid.emi_details.payment_history.len(), 1);
        assert_eq!(paid.emi_details.payment_history[0].emi_number, 1);

        // Paid since selection: the conditional lock must not fire.
        assert!(!repo.lock_if_overdue(&created.id, today).await.unwrap());

        repo.delete(&created.id).await.unwrap();
    }
}
