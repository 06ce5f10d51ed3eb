//! Database entity definitions (row mappings).

pub mod device;

pub use device::{DeviceEntity, PaymentMethodDb, PaymentRecordEntity, DEVICE_COLUMNS, PAYMENT_COLUMNS};
