//! Instrument contracts, the session's hardware lifecycle, and simulated devices.

pub mod capabilities;
pub mod lifecycle;
pub mod mock;

pub use capabilities::{
    DynamicDeviceSet, DynamicDevices, Instruments, NoStaticDevices, Sensor, StaticDevices,
    Synchroniser,
};
pub use lifecycle::HardwareLifecycle;
