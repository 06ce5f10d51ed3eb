//! Device entity (database row mapping).

use chrono::{DateTime, NaiveDate, Utc};
use domain::models::{
    Device, DeviceLocation, EmiDetails, FeatureLocks, PaymentMethod, PaymentRecord, Telemetry,
};
use sqlx::FromRow;

/// Database enum for payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
pub enum PaymentMethodDb {
    Cash,
    Upi,
    BankTransfer,
    Cheque,
    Card,
}

impl From<PaymentMethod> for PaymentMethodDb {
    fn from(method: PaymentMethod) -> Self {
        match method {
            PaymentMethod::Cash => PaymentMethodDb::Cash,
            PaymentMethod::Upi => PaymentMethodDb::Upi,
            PaymentMethod::BankTransfer => PaymentMethodDb::BankTransfer,
            PaymentMethod::Cheque => PaymentMethodDb::Cheque,
            PaymentMethod::Card => PaymentMethodDb::Card,
        }
    }
}

impl From<PaymentMethodDb> for PaymentMethod {
    fn from(method: PaymentMethodDb) -> Self {
        match method {
            PaymentMethodDb::Cash => PaymentMethod::Cash,
            PaymentMethodDb::Upi => PaymentMethod::Upi,
            PaymentMethodDb::BankTransfer => PaymentMethod::BankTransfer,
            PaymentMethodDb::Cheque => PaymentMethod::Cheque,
            PaymentMethodDb::Card => PaymentMethod::Card,
        }
    }
}

/// Column list matching [`DeviceEntity`], for use in SELECT and RETURNING clauses.
pub const DEVICE_COLUMNS: &str = r#"
    id, device_id, customer_name, customer_email, mobile_no, aadhar_no, address,
    imei1, imei2, device_model,
    is_locked, lock_camera, lock_network, lock_wifi, lock_power_off, lock_reset,
    finance_name, finance_phone, total_amount, emi_amount, tenure, paid_emis, next_due_date,
    registered_at, qr_code_data,
    battery_level, network_type, sim_carrier, android_version, last_seen,
    is_tracking, location_lat, location_lng, location_updated_at,
    permissions_granted, wipe_requested, release_requested,
    created_at, updated_at
"#;

/// Column list matching [`PaymentRecordEntity`].
pub const PAYMENT_COLUMNS: &str = r#"
    device_pk, payment_id, emi_number, amount, paid_date, transaction_id,
    payment_method, recorded_by, recorded_at, notes
"#;

/// Database row mapping for the devices table.
#[derive(Debug, Clone, FromRow)]
pub struct DeviceEntity {
    pub id: i64,
    pub device_id: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub mobile_no: String,
    pub aadhar_no: String,
    pub address: String,
    pub imei1: String,
    pub imei2: Option<String>,
    pub device_model: String,
    pub is_locked: bool,
    pub lock_camera: bool,
    pub lock_network: bool,
    pub lock_wifi: bool,
    pub lock_power_off: bool,
    pub lock_reset: bool,
    pub finance_name: String,
    pub finance_phone: Option<String>,
    pub total_amount: f64,
    pub emi_amount: f64,
    pub tenure: i32,
    pub paid_emis: i32,
    pub next_due_date: NaiveDate,
    pub registered_at: DateTime<Utc>,
    pub qr_code_data: String,
    pub battery_level: Option<i32>,
    pub network_type: Option<String>,
    pub sim_carrier: Option<String>,
    pub android_version: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_tracking: bool,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub permissions_granted: bool,
    pub wipe_requested: bool,
    pub release_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database row mapping for the payment_records table.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRecordEntity {
    pub device_pk: i64,
    pub payment_id: String,
    pub emi_number: i32,
    pub amount: f64,
    pub paid_date: NaiveDate,
    pub transaction_id: String,
    pub payment_method: PaymentMethodDb,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl From<PaymentRecordEntity> for PaymentRecord {
    fn from(entity: PaymentRecordEntity) -> Self {
        Self {
            id: entity.payment_id,
            emi_number: entity.emi_number,
            amount: entity.amount,
            paid_date: entity.paid_date,
            transaction_id: entity.transaction_id,
            payment_method: entity.payment_method.into(),
            recorded_by: entity.recorded_by,
            recorded_at: entity.recorded_at,
            notes: entity.notes,
        }
    }
}

impl DeviceEntity {
    fn location(&self) -> Option<DeviceLocation> {
        match (self.location_lat, self.location_lng, self.location_updated_at) {
            (Some(lat), Some(lng), Some(last_updated)) => Some(DeviceLocation {
                lat,
                lng,
                last_updated,
            }),
            _ => None,
        }
    }

    /// Converts the row into a domain device with the given payment history.
    pub fn into_device(self, payment_history: Vec<PaymentRecord>) -> Device {
        let location = self.location();
        Device {
            id: self.device_id,
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            mobile_no: self.mobile_no,
            aadhar_no: self.aadhar_no,
            address: self.address,
            imei1: self.imei1,
            imei2: self.imei2,
            device_model: self.device_model,
            is_locked: self.is_locked,
            location,
            feature_locks: FeatureLocks {
                camera: self.lock_camera,
                network: self.lock_network,
                wifi: self.lock_wifi,
                power_off: self.lock_power_off,
                reset: self.lock_reset,
            },
            emi_details: EmiDetails {
                finance_name: self.finance_name,
                finance_phone: self.finance_phone,
                total_amount: self.total_amount,
                emi_amount: self.emi_amount,
                tenure: self.tenure,
                paid_emis: self.paid_emis,
                next_due_date: self.next_due_date,
                payment_history,
            },
            registered_at: self.registered_at,
            qr_code_data: self.qr_code_data,
            telemetry: Telemetry {
                battery_level: self.battery_level,
                network_type: self.network_type,
                sim_carrier: self.sim_carrier,
                android_version: self.android_version,
                last_seen: self.last_seen,
            },
            is_tracking: self.is_tracking,
            permissions_granted: self.permissions_granted,
            wipe_requested: self.wipe_requested,
            release_requested: self.release_requested,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
