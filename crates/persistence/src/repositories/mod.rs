//! `DeviceStore` implementations.

pub mod device;
pub mod memory;

pub use device::PgDeviceRepository;
pub use memory::InMemoryDeviceRepository;
