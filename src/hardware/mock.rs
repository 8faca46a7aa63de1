//! Mock Hardware Implementations
//!
//! Simulated instruments for running the measurement loop without a lab.
//! All mock devices use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockSynchroniser` - tracks open/running state and call counts
//! - `MockSensor` - noisy per-channel readings of a declared shape; refuses to
//!   acquire unless opened and the synchroniser is running
//! - `MockStaticDevices` - records how often parameters were applied
//! - `MockDynamicDevices` - linear sweep between two values

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::config::DeviceBlock;
use crate::hardware::capabilities::{
    DynamicDevices, Sample, SampleShape, Sensor, StaticDevices, Synchroniser,
};

// =============================================================================
// MockSynchroniser
// =============================================================================

/// Mock timing controller
#[derive(Default)]
pub struct MockSynchroniser {
    open: AtomicBool,
    running: AtomicBool,
    sequence_loaded: AtomicBool,
    runs: AtomicUsize,
    closes: AtomicUsize,
}

impl MockSynchroniser {
    /// Create a closed, idle synchroniser
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the device is open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of `run` calls
    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Number of `close` calls
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(anyhow!("synchroniser is not open"))
        }
    }
}

#[async_trait]
impl Synchroniser for MockSynchroniser {
    async fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        debug!("MockSynchroniser: opened");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.ensure_open()?;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn load_sequence(&self) -> Result<()> {
        self.ensure_open()?;
        if self.running.load(Ordering::SeqCst) {
            bail!("cannot load a sequence while running");
        }
        self.sequence_loaded.store(true, Ordering::SeqCst);
        debug!("MockSynchroniser: sequence loaded");
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.sequence_loaded.load(Ordering::SeqCst) {
            bail!("no sequence loaded");
        }
        self.running.store(true, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        debug!("MockSynchroniser: closed");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// =============================================================================
// MockSensor
// =============================================================================

/// Mock sensor producing `channel + 1` plus uniform noise for every value.
pub struct MockSensor {
    shape: SampleShape,
    noise: f64,
    readout: Duration,
    open: AtomicBool,
    acquisitions: AtomicUsize,
}

impl MockSensor {
    /// Create a sensor declaring `shape`, with 1% noise and no readout delay
    pub fn new(shape: SampleShape) -> Self {
        Self {
            shape,
            noise: 0.01,
            readout: Duration::ZERO,
            open: AtomicBool::new(false),
            acquisitions: AtomicUsize::new(0),
        }
    }

    /// Build from a sensor configuration block.
    ///
    /// Recognised keys: `channels` (default 1), `samples` (default scalar
    /// readings), `noise` (default 0.01), `readout` (humantime string).
    pub fn from_config(block: &DeviceBlock) -> Result<Self> {
        let channels = block.get("channels").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let shape = match block.get("samples").and_then(|v| v.as_u64()) {
            Some(samples) => SampleShape::trace(channels, samples as usize),
            None => SampleShape::scalar(channels),
        };
        let mut sensor = Self::new(shape);
        if let Some(noise) = block.get("noise").and_then(|v| v.as_f64()) {
            sensor.noise = noise.abs();
        }
        if let Some(readout) = block.get("readout").and_then(|v| v.as_str()) {
            sensor.readout = humantime_serde::re::humantime::parse_duration(readout)
                .map_err(|e| anyhow!("invalid sensor readout '{readout}': {e}"))?;
        }
        Ok(sensor)
    }

    /// Whether the sensor is open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of completed acquisitions
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sensor for MockSensor {
    fn output_shape(&self) -> SampleShape {
        self.shape.clone()
    }

    async fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        debug!(shape = ?self.shape.sample_shape(), "MockSensor: opened");
        Ok(())
    }

    async fn acquire_data(&self, synchroniser: &dyn Synchroniser) -> Result<Sample> {
        if !self.is_open() {
            bail!("sensor is not open");
        }
        if !synchroniser.is_running() {
            bail!("synchroniser is not generating triggers");
        }
        if !self.readout.is_zero() {
            sleep(self.readout).await;
        }

        let shape = self.shape.sample_shape();
        let per_channel = self.shape.len() / self.shape.channels;
        let values: Vec<f64> = {
            let mut rng = rand::thread_rng();
            (0..self.shape.len())
                .map(|i| {
                    let channel = (i / per_channel) as f64;
                    let jitter = if self.noise > 0.0 {
                        rng.gen_range(-self.noise..self.noise)
                    } else {
                        0.0
                    };
                    channel + 1.0 + jitter
                })
                .collect()
        };

        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        trace!(acquisition = self.acquisitions(), "MockSensor: sample read");
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        debug!("MockSensor: closed");
        Ok(())
    }
}

// =============================================================================
// MockStaticDevices
// =============================================================================

/// Mock static device handler
#[derive(Default)]
pub struct MockStaticDevices {
    applied: AtomicUsize,
    devices: Vec<String>,
}

impl MockStaticDevices {
    /// Handler for the named devices
    pub fn new(devices: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            applied: AtomicUsize::new(0),
            devices: devices.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of `set_all_params` calls
    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StaticDevices for MockStaticDevices {
    async fn set_all_params(&self) -> Result<()> {
        for device in &self.devices {
            debug!(device = %device, "MockStaticDevices: parameters applied");
        }
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// MockDynamicDevices
// =============================================================================

/// Mock dynamic device sweeping linearly from `start` to `stop`.
pub struct MockDynamicDevices {
    name: String,
    start: f64,
    stop: f64,
    steps: usize,
    advanced: AtomicUsize,
    value: Mutex<Option<f64>>,
}

impl MockDynamicDevices {
    /// Linear sweep over `steps` points
    pub fn linear(name: impl Into<String>, start: f64, stop: f64, steps: usize) -> Self {
        Self {
            name: name.into(),
            start,
            stop,
            steps: steps.max(1),
            advanced: AtomicUsize::new(0),
            value: Mutex::new(None),
        }
    }

    /// Build from a dynamic device configuration block (`start`, `stop`).
    pub fn from_config(name: &str, block: &DeviceBlock, steps: usize) -> Self {
        let start = block.get("start").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let stop = block.get("stop").and_then(|v| v.as_f64()).unwrap_or(start);
        Self::linear(name, start, stop, steps)
    }

    /// Steps advanced since the last reset
    pub fn steps_advanced(&self) -> usize {
        self.advanced.load(Ordering::SeqCst)
    }

    /// Value currently applied, if any step was taken
    pub fn current_value(&self) -> Option<f64> {
        self.value.lock().ok().and_then(|v| *v)
    }

    fn value_at(&self, index: usize) -> f64 {
        if self.steps == 1 {
            self.start
        } else {
            self.start + (self.stop - self.start) * index as f64 / (self.steps - 1) as f64
        }
    }
}

#[async_trait]
impl DynamicDevices for MockDynamicDevices {
    async fn advance_step(&self) -> Result<()> {
        let index = self.advanced.load(Ordering::SeqCst);
        if index >= self.steps {
            bail!("{}: sweep exhausted after {} steps", self.name, self.steps);
        }
        let value = self.value_at(index);
        if let Ok(mut current) = self.value.lock() {
            *current = Some(value);
        }
        self.advanced.store(index + 1, Ordering::SeqCst);
        trace!(device = %self.name, step = index, value, "MockDynamicDevices: step applied");
        Ok(())
    }

    async fn reset_step(&self) -> Result<()> {
        self.advanced.store(0, Ordering::SeqCst);
        if let Ok(mut current) = self.value.lock() {
            *current = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::DynamicDeviceSet;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_synchroniser_protocol() {
        let sync = MockSynchroniser::new();
        assert!(sync.stop().await.is_err());

        sync.open().await.unwrap();
        assert!(sync.run().await.is_err(), "run without a sequence must fail");
        sync.stop().await.unwrap();
        sync.load_sequence().await.unwrap();
        sync.run().await.unwrap();
        assert!(sync.is_running());
        assert!(sync.load_sequence().await.is_err());

        // stop/run are idempotent
        sync.run().await.unwrap();
        sync.stop().await.unwrap();
        sync.stop().await.unwrap();
        assert!(!sync.is_running());

        sync.close().await.unwrap();
        assert!(!sync.is_open());
    }

    #[tokio::test]
    async fn test_sensor_requires_running_synchroniser() {
        let sync = MockSynchroniser::new();
        let sensor = MockSensor::new(SampleShape::trace(2, 8));
        sensor.open().await.unwrap();
        assert!(sensor.acquire_data(&sync).await.is_err());

        sync.open().await.unwrap();
        sync.load_sequence().await.unwrap();
        sync.run().await.unwrap();

        let sample = sensor.acquire_data(&sync).await.unwrap();
        assert_eq!(sample.shape(), &[2, 8]);
        assert!(sample.iter().take(8).all(|v| (v - 1.0).abs() <= 0.01));
        assert!(sample.iter().skip(8).all(|v| (v - 2.0).abs() <= 0.01));
        assert_eq!(sensor.acquisitions(), 1);
    }

    #[test]
    fn test_sensor_from_config() {
        let block = json!({"channels": 3, "samples": 16, "noise": 0.0})
            .as_object()
            .cloned()
            .unwrap();
        let sensor = MockSensor::from_config(&block).unwrap();
        assert_eq!(sensor.output_shape(), SampleShape::trace(3, 16));

        let scalar = MockSensor::from_config(&DeviceBlock::new()).unwrap();
        assert_eq!(scalar.output_shape(), SampleShape::scalar(1));

        let bad = json!({"readout": "soon"}).as_object().cloned().unwrap();
        assert!(MockSensor::from_config(&bad).is_err());
    }

    #[tokio::test]
    async fn test_dynamic_devices_linear_sweep() {
        let devices = MockDynamicDevices::linear("mw", 1.0, 2.0, 3);
        assert_eq!(devices.current_value(), None);

        for expected in [1.0, 1.5, 2.0] {
            devices.advance_step().await.unwrap();
            assert_eq!(devices.current_value(), Some(expected));
        }
        assert!(devices.advance_step().await.is_err());

        devices.reset_step().await.unwrap();
        assert_eq!(devices.steps_advanced(), 0);
        devices.advance_step().await.unwrap();
        assert_eq!(devices.current_value(), Some(1.0));
    }

    #[tokio::test]
    async fn test_device_set_steps_every_member() {
        let mw = Arc::new(MockDynamicDevices::linear("mw", 0.0, 1.0, 2));
        let field = Arc::new(MockDynamicDevices::linear("field", 10.0, 20.0, 2));
        let set =
            DynamicDeviceSet::new(vec![mw.clone() as Arc<dyn DynamicDevices>, field.clone()]);

        set.advance_step().await.unwrap();
        set.advance_step().await.unwrap();
        assert_eq!(mw.current_value(), Some(1.0));
        assert_eq!(field.current_value(), Some(20.0));

        set.reset_step().await.unwrap();
        assert_eq!(mw.steps_advanced(), 0);
        assert_eq!(field.steps_advanced(), 0);
    }
}
