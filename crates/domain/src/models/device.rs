//! Device domain model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use super::payment::PaymentRecord;

/// A financed device and everything the backend knows about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub customer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub mobile_no: String,
    pub aadhar_no: String,
    pub address: String,
    pub imei1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imei2: Option<String>,
    pub device_model: String,
    pub is_locked: bool,
    #[serde(default)]
    pub location: Option<DeviceLocation>,
    pub feature_locks: FeatureLocks,
    pub emi_details: EmiDetails,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub qr_code_data: String,
    #[serde(default)]
    pub telemetry: Telemetry,
    #[serde(default)]
    pub is_tracking: bool,
    #[serde(default)]
    pub permissions_granted: bool,
    #[serde(default)]
    pub wipe_requested: bool,
    #[serde(default)]
    pub release_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-feature restrictions enforced on the handset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureLocks {
    pub camera: bool,
    pub network: bool,
    pub wifi: bool,
    pub power_off: bool,
    pub reset: bool,
}

/// One restrictable capability of the handset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    Camera,
    Network,
    Wifi,
    PowerOff,
    Reset,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::Camera,
        Feature::Network,
        Feature::Wifi,
        Feature::PowerOff,
        Feature::Reset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Camera => "camera",
            Feature::Network => "network",
            Feature::Wifi => "wifi",
            Feature::PowerOff => "powerOff",
            Feature::Reset => "reset",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "camera" => Ok(Feature::Camera),
            "network" => Ok(Feature::Network),
            "wifi" => Ok(Feature::Wifi),
            "powerOff" | "power_off" => Ok(Feature::PowerOff),
            "reset" => Ok(Feature::Reset),
            other => Err(format!("Unknown feature: {}", other)),
        }
    }
}

/// Last reported GPS position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLocation {
    pub lat: f64,
    pub lng: f64,
    pub last_updated: DateTime<Utc>,
}

/// Installment plan attached to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmiDetails {
    #[serde(default)]
    pub finance_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finance_phone: Option<String>,
    pub total_amount: f64,
    pub emi_amount: f64,
    pub tenure: i32,
    #[serde(default)]
    pub paid_emis: i32,
    pub next_due_date: NaiveDate,
    #[serde(default)]
    pub payment_history: Vec<PaymentRecord>,
}

/// Handset telemetry, written only by the on-device agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub battery_level: Option<i32>,
    pub network_type: Option<String>,
    pub sim_carrier: Option<String>,
    pub android_version: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// One-shot commands an admin can queue for the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCommand {
    Wipe,
    Release,
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::Wipe => write!(f, "wipe"),
            DeviceCommand::Release => write!(f, "release"),
        }
    }
}

impl Device {
    /// Returns the pending command with the highest priority, if any.
    ///
    /// Wipe always wins over release.
    pub fn pending_command(&self) -> Option<DeviceCommand> {
        if self.wipe_requested {
            Some(DeviceCommand::Wipe)
        } else if self.release_requested {
            Some(DeviceCommand::Release)
        } else {
            None
        }
    }

    /// Checks the invariants every persisted device must satisfy.
    pub fn check_invariants(&self) -> Result<(), String> {
        let emi = &self.emi_details;
        if emi.tenure < 1 {
            return Err("Tenure must be at least 1".to_string());
        }
        if emi.paid_emis < 0 || emi.paid_emis > emi.tenure {
            return Err(format!(
                "Paid EMIs must be between 0 and tenure ({})",
                emi.tenure
            ));
        }
        // Next installment number is paid_emis + 1 and must not collide.
        if let Some(last) = emi.payment_history.iter().map(|p| p.emi_number).max() {
            if emi.paid_emis < last {
                return Err(format!(
                    "Paid EMIs cannot be lower than the last recorded installment ({})",
                    last
                ));
            }
        }
        Ok(())
    }
}

/// EMI plan supplied at registration.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmiDetails {
    #[serde(default)]
    #[validate(length(max = 100, message = "Finance name must be at most 100 characters"))]
    pub finance_name: String,

    pub finance_phone: Option<String>,

    #[validate(custom(function = "shared::validation::validate_amount"))]
    pub total_amount: f64,

    #[validate(custom(function = "shared::validation::validate_amount"))]
    pub emi_amount: f64,

    #[validate(range(min = 1, max = 120, message = "Tenure must be between 1 and 120"))]
    pub tenure: i32,

    #[serde(default)]
    #[validate(range(min = 0, message = "Paid EMIs cannot be negative"))]
    pub paid_emis: i32,

    pub next_due_date: NaiveDate,
}

lazy_static::lazy_static! {
    /// Device ids appear in URL paths, so they are restricted to a safe alphabet.
    static ref DEVICE_ID_REGEX: regex::Regex = regex::Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
}

/// Request payload for device registration.
///
/// Fields owned by the lock state machine, the agent, or the payment flow are
/// not accepted here; new devices always start active with no restrictions.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceRequest {
    #[validate(length(min = 1, max = 64, message = "Device ID must be between 1 and 64 characters"))]
    #[validate(regex(
        path = *DEVICE_ID_REGEX,
        message = "Device ID may only contain letters, digits, '-' and '_'"
    ))]
    pub id: Option<String>,

    #[validate(length(
        min = 2,
        max = 100,
        message = "Customer name must be between 2 and 100 characters"
    ))]
    pub customer_name: String,

    #[validate(email(message = "Invalid email format"))]
    pub customer_email: Option<String>,

    #[validate(custom(function = "shared::validation::validate_mobile_no"))]
    pub mobile_no: String,

    #[validate(custom(function = "shared::validation::validate_national_id"))]
    pub aadhar_no: String,

    #[validate(length(min = 1, max = 500, message = "Address is required"))]
    pub address: String,

    #[validate(custom(function = "shared::validation::validate_imei"))]
    pub imei1: String,

    #[validate(custom(function = "shared::validation::validate_imei"))]
    pub imei2: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Device model is required"))]
    pub device_model: String,

    #[validate(nested)]
    pub emi_details: CreateEmiDetails,

    pub qr_code_data: Option<String>,
}

impl CreateDeviceRequest {
    /// Cross-field checks the derive cannot express.
    pub fn check_plan(&self) -> Result<(), String> {
        if self.emi_details.paid_emis > self.emi_details.tenure {
            return Err("Paid EMIs cannot exceed tenure".to_string());
        }
        if self.imei2.as_deref() == Some(self.imei1.as_str()) {
            return Err("IMEI 2 must differ from IMEI 1".to_string());
        }
        Ok(())
    }
}

/// A fully-formed device ready to be inserted into the store.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub id: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub mobile_no: String,
    pub aadhar_no: String,
    pub address: String,
    pub imei1: String,
    pub imei2: Option<String>,
    pub device_model: String,
    pub emi: CreateEmiDetails,
    pub qr_code_data: String,
}

impl NewDevice {
    /// Builds an insertable device from a validated request, generating the
    /// id and provisioning payload when the caller did not supply them.
    pub fn from_request(request: CreateDeviceRequest) -> Self {
        let id = request
            .id
            .unwrap_or_else(shared::ids::generate_device_id);
        let qr_code_data = request.qr_code_data.unwrap_or_else(|| {
            serde_json::json!({
                "id": id,
                "name": request.customer_name,
                "email": request.customer_email,
                "imei1": request.imei1,
                "model": request.device_model,
                "finance": request.emi_details.finance_name,
            })
            .to_string()
        });

        Self {
            id,
            customer_name: request.customer_name,
            customer_email: request.customer_email,
            mobile_no: request.mobile_no,
            aadhar_no: request.aadhar_no,
            address: request.address,
            imei1: request.imei1,
            imei2: request.imei2,
            device_model: request.device_model,
            emi: request.emi_details,
            qr_code_data,
        }
    }

    /// Materializes the device as it looks right after registration.
    pub fn into_device(self, now: DateTime<Utc>) -> Device {
        Device {
            id: self.id,
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            mobile_no: self.mobile_no,
            aadhar_no: self.aadhar_no,
            address: self.address,
            imei1: self.imei1,
            imei2: self.imei2,
            device_model: self.device_model,
            is_locked: false,
            location: None,
            feature_locks: FeatureLocks::default(),
            emi_details: EmiDetails {
                finance_name: self.emi.finance_name,
                finance_phone: self.emi.finance_phone,
                total_amount: self.emi.total_amount,
                emi_amount: self.emi.emi_amount,
                tenure: self.emi.tenure,
                paid_emis: self.emi.paid_emis,
                next_due_date: self.emi.next_due_date,
                payment_history: Vec::new(),
            },
            registered_at: now,
            qr_code_data: self.qr_code_data,
            telemetry: Telemetry::default(),
            is_tracking: false,
            permissions_granted: false,
            wipe_requested: false,
            release_requested: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial feature lock update; absent flags are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureLocksPatch {
    pub camera: Option<bool>,
    pub network: Option<bool>,
    pub wifi: Option<bool>,
    pub power_off: Option<bool>,
    pub reset: Option<bool>,
}

/// Partial EMI plan update. Payment history is append-only and never patched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmiDetailsPatch {
    pub finance_name: Option<String>,
    pub finance_phone: Option<String>,
    #[validate(custom(function = "shared::validation::validate_amount"))]
    pub total_amount: Option<f64>,
    #[validate(custom(function = "shared::validation::validate_amount"))]
    pub emi_amount: Option<f64>,
    #[validate(range(min = 1, max = 120, message = "Tenure must be between 1 and 120"))]
    pub tenure: Option<i32>,
    #[validate(range(min = 0, message = "Paid EMIs cannot be negative"))]
    pub paid_emis: Option<i32>,
    pub next_due_date: Option<NaiveDate>,
}

/// Partial telemetry update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPatch {
    #[validate(custom(function = "shared::validation::validate_battery_level"))]
    pub battery_level: Option<i32>,
    pub network_type: Option<String>,
    pub sim_carrier: Option<String>,
    pub android_version: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Request payload for `PUT /api/devices/:id`: a field-wise merge.
///
/// `id` and `imei1` are identity fields and cannot be changed.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceRequest {
    #[validate(length(
        min = 2,
        max = 100,
        message = "Customer name must be between 2 and 100 characters"
    ))]
    pub customer_name: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub customer_email: Option<String>,
    #[validate(custom(function = "shared::validation::validate_mobile_no"))]
    pub mobile_no: Option<String>,
    #[validate(custom(function = "shared::validation::validate_national_id"))]
    pub aadhar_no: Option<String>,
    pub address: Option<String>,
    #[validate(custom(function = "shared::validation::validate_imei"))]
    pub imei2: Option<String>,
    pub device_model: Option<String>,
    pub is_locked: Option<bool>,
    pub feature_locks: Option<FeatureLocksPatch>,
    #[validate(nested)]
    pub emi_details: Option<EmiDetailsPatch>,
    pub qr_code_data: Option<String>,
    pub is_tracking: Option<bool>,
    pub permissions_granted: Option<bool>,
    pub wipe_requested: Option<bool>,
    pub release_requested: Option<bool>,
    #[validate(nested)]
    pub telemetry: Option<TelemetryPatch>,
    #[validate(nested)]
    pub location: Option<UpdateLocationRequest>,
}

impl UpdateDeviceRequest {
    /// Merges the patch into `device`, leaving absent fields untouched.
    pub fn apply_to(&self, device: &mut Device) {
        if let Some(v) = &self.customer_name {
            device.customer_name = v.clone();
        }
        if let Some(v) = &self.customer_email {
            device.customer_email = Some(v.clone());
        }
        if let Some(v) = &self.mobile_no {
            device.mobile_no = v.clone();
        }
        if let Some(v) = &self.aadhar_no {
            device.aadhar_no = v.clone();
        }
        if let Some(v) = &self.address {
            device.address = v.clone();
        }
        if let Some(v) = &self.imei2 {
            device.imei2 = Some(v.clone());
        }
        if let Some(v) = &self.device_model {
            device.device_model = v.clone();
        }
        if let Some(v) = self.is_locked {
            device.is_locked = v;
        }
        if let Some(patch) = &self.feature_locks {
            device.feature_locks.apply_patch(patch);
        }
        if let Some(patch) = &self.emi_details {
            let emi = &mut device.emi_details;
            if let Some(v) = &patch.finance_name {
                emi.finance_name = v.clone();
            }
            if let Some(v) = &patch.finance_phone {
                emi.finance_phone = Some(v.clone());
            }
            if let Some(v) = patch.total_amount {
                emi.total_amount = v;
            }
            if let Some(v) = patch.emi_amount {
                emi.emi_amount = v;
            }
            if let Some(v) = patch.tenure {
                emi.tenure = v;
            }
            if let Some(v) = patch.paid_emis {
                emi.paid_emis = v;
            }
            if let Some(v) = patch.next_due_date {
                emi.next_due_date = v;
            }
        }
        if let Some(v) = &self.qr_code_data {
            device.qr_code_data = v.clone();
        }
        if let Some(v) = self.is_tracking {
            device.is_tracking = v;
        }
        if let Some(v) = self.permissions_granted {
            device.permissions_granted = v;
        }
        if let Some(v) = self.wipe_requested {
            device.wipe_requested = v;
        }
        if let Some(v) = self.release_requested {
            device.release_requested = v;
        }
        if let Some(patch) = &self.telemetry {
            patch.apply_to(&mut device.telemetry);
        }
        if let Some(position) = self.location {
            device.location = Some(DeviceLocation {
                lat: position.lat,
                lng: position.lng,
                last_updated: Utc::now(),
            });
        }
    }
}

impl TelemetryPatch {
    /// Merges reported values into the stored telemetry.
    pub fn apply_to(&self, telemetry: &mut Telemetry) {
        if let Some(v) = self.battery_level {
            telemetry.battery_level = Some(v);
        }
        if let Some(v) = &self.network_type {
            telemetry.network_type = Some(v.clone());
        }
        if let Some(v) = &self.sim_carrier {
            telemetry.sim_carrier = Some(v.clone());
        }
        if let Some(v) = &self.android_version {
            telemetry.android_version = Some(v.clone());
        }
        if let Some(v) = self.last_seen {
            telemetry.last_seen = Some(v);
        }
    }
}

/// Request payload for `PUT /api/devices/:id/location`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLocationRequest {
    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub lat: f64,
    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub lng: f64,
}

/// Request payload for `PUT /api/devices/:id/features/:feature`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SetFeatureLockRequest {
    pub locked: bool,
}
