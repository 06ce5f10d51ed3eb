//! On-device agent for financed handsets.
//!
//! This crate contains:
//! - The heartbeat loop that mirrors server lock state and executes commands
//! - The location tracking sub-loop
//! - The HTTP client for the device API
//! - The `DeviceCapabilities` seam over native device-admin operations

pub mod capability;
pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod tracking;

#[cfg(test)]
pub(crate) mod testing;
