//! Shared utilities for the EMI lock workspace.
//!
//! This crate contains:
//! - Validation helpers
//! - Identifier generation
//! - Logging setup

pub mod ids;
pub mod logging;
pub mod validation;
