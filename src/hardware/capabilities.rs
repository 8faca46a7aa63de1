//! Instrument Capabilities
//!
//! The measurement loop only ever talks to its instruments through the small
//! traits in this module:
//!
//! - [`Synchroniser`] - timing/sequencing controller (pulse generator, FPGA sequencer)
//! - [`Sensor`] - data-acquiring device (camera, digitiser, photodiode DAQ)
//! - [`StaticDevices`] - devices configured once per session
//! - [`DynamicDevices`] - devices stepped through the sweep
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors; the session classifies them into
//!   [`crate::error::DaqError`] where it calls the device
//! - Takes `&self`; implementations keep their state behind interior mutability
//!
//! # Example
//!
//! ```rust,ignore
//! struct Digitiser { channels: usize, samples: usize }
//!
//! #[async_trait]
//! impl Sensor for Digitiser {
//!     fn output_shape(&self) -> SampleShape {
//!         SampleShape::trace(self.channels, self.samples)
//!     }
//!
//!     async fn open(&self) -> Result<()> { /* connect */ Ok(()) }
//!
//!     async fn acquire_data(&self, synchroniser: &dyn Synchroniser) -> Result<Sample> {
//!         if !synchroniser.is_running() {
//!             anyhow::bail!("no trigger source");
//!         }
//!         // Wait for the next trigger and read out one record...
//!         Ok(Sample::zeros(IxDyn(&[self.channels, self.samples])))
//!     }
//!
//!     async fn close(&self) -> Result<()> { Ok(()) }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub use crate::measurement::buffer::{Sample, SampleShape};

/// Capability: Timing Generation
///
/// # Contract
/// - Protocol order at session start is `open` → `stop` → `load_sequence` → `run`
/// - `stop` and `run` are idempotent within a session; the loop re-arms the
///   device between cycles with `stop` → `run`
/// - `close` is called exactly once at session end, even after a failure
#[async_trait]
pub trait Synchroniser: Send + Sync {
    /// Connect to the device
    async fn open(&self) -> Result<()>;

    /// Halt timing generation
    async fn stop(&self) -> Result<()>;

    /// Upload the pulse sequence program
    async fn load_sequence(&self) -> Result<()>;

    /// Start timing generation
    async fn run(&self) -> Result<()>;

    /// Disconnect from the device
    async fn close(&self) -> Result<()>;

    /// Whether timing generation is currently running
    fn is_running(&self) -> bool;
}

/// Capability: Synchronized Acquisition
///
/// # Contract
/// - `output_shape` is fixed for the lifetime of a session; every sample
///   returned by `acquire_data` has exactly this shape
/// - `acquire_data` returns one sample per call, synchronized against the
///   synchroniser's current timing state
#[async_trait]
pub trait Sensor: Send + Sync {
    /// Declared shape of one sample
    fn output_shape(&self) -> SampleShape;

    /// Connect and arm the sensor
    async fn open(&self) -> Result<()>;

    /// Acquire one sample
    async fn acquire_data(&self, synchroniser: &dyn Synchroniser) -> Result<Sample>;

    /// Disconnect from the sensor
    async fn close(&self) -> Result<()>;
}

/// Capability: Static Configuration
///
/// Devices whose parameters are applied once per session, before the first cycle.
#[async_trait]
pub trait StaticDevices: Send + Sync {
    /// Apply every configured parameter
    async fn set_all_params(&self) -> Result<()>;
}

/// Capability: Dynamic Sweep
///
/// Devices stepped through the sweep axis. Implementations keep their own
/// step counter; the loop advances it once per sweep step and resets it at
/// the end of every cycle.
#[async_trait]
pub trait DynamicDevices: Send + Sync {
    /// Move to the next configured step
    async fn advance_step(&self) -> Result<()>;

    /// Return to the first step
    async fn reset_step(&self) -> Result<()>;
}

/// The instrument handles one session operates on.
#[derive(Clone)]
pub struct Instruments {
    /// Devices configured once per session
    pub static_devices: Arc<dyn StaticDevices>,
    /// Devices stepped through the sweep
    pub dynamic_devices: Arc<dyn DynamicDevices>,
    /// Data-acquiring sensor
    pub sensor: Arc<dyn Sensor>,
    /// Timing controller
    pub synchroniser: Arc<dyn Synchroniser>,
}

/// Placeholder for stacks without static devices.
pub struct NoStaticDevices;

#[async_trait]
impl StaticDevices for NoStaticDevices {
    async fn set_all_params(&self) -> Result<()> {
        Ok(())
    }
}

/// Several dynamic devices stepped together, in order.
///
/// Every device is advanced once per step; reset is attempted on all devices
/// and the first failure is reported.
pub struct DynamicDeviceSet {
    devices: Vec<Arc<dyn DynamicDevices>>,
}

impl DynamicDeviceSet {
    /// Step `devices` together
    pub fn new(devices: Vec<Arc<dyn DynamicDevices>>) -> Self {
        Self { devices }
    }

    /// Number of devices in the set
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the set has no devices
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DynamicDevices for DynamicDeviceSet {
    async fn advance_step(&self) -> Result<()> {
        for device in &self.devices {
            device.advance_step().await?;
        }
        Ok(())
    }

    async fn reset_step(&self) -> Result<()> {
        let mut first_error = None;
        for device in &self.devices {
            if let Err(e) = device.reset_step().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
