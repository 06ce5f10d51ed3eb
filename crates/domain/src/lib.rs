//! Domain layer for the EMI lock backend.
//!
//! This crate contains:
//! - Domain models (Device, PaymentRecord, request payloads)
//! - The lock state machine and installment rules
//! - The `DeviceStore` seam implemented by the persistence layer

pub mod models;
pub mod services;
