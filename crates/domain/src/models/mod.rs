//! Domain models for the EMI lock backend.

pub mod device;
pub mod payment;

pub use device::{
    CreateDeviceRequest, Device, DeviceCommand, DeviceLocation, EmiDetails, Feature, FeatureLocks,
    FeatureLocksPatch, NewDevice, SetFeatureLockRequest, Telemetry, TelemetryPatch,
    UpdateDeviceRequest, UpdateLocationRequest,
};
pub use payment::{NewPayment, PaymentMethod, PaymentRecord, RecordPaymentRequest};
