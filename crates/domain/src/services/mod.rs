//! Domain services: lock state machine, installment rules and the store seam.

pub mod device_store;
pub mod emi;
pub mod lock_state;
pub mod overdue;

#[cfg(test)]
pub(crate) mod test_support;

pub use device_store::{DeviceStore, StoreError};
pub use emi::next_due_date_after;
pub use lock_state::LockState;
pub use overdue::ClockZone;
