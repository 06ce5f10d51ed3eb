//! Persistence layer for the EMI lock backend.
//!
//! This crate contains:
//! - Database connection management and migrations
//! - Entity definitions (database row mappings)
//! - `DeviceStore` implementations (PostgreSQL and in-memory)

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
