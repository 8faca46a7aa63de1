//! Sweep Driver: steps the dynamic devices through the configured sweep.

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{DynamicDevices, Sensor, Synchroniser};
use crate::hardware::lifecycle::settle;
use crate::measurement::averager::AcquisitionAverager;
use crate::measurement::buffer::AggregationBuffer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Owns the sweep position for one session.
///
/// `advance` is called once per sweep step before that step's repetitions;
/// `reset` is called once at the end of every cycle, whatever its outcome.
pub struct SweepDriver {
    devices: Arc<dyn DynamicDevices>,
    steps: usize,
    settle: Duration,
    position: usize,
}

impl SweepDriver {
    /// Driver over `steps` sweep points, sleeping `settle` after every advance.
    pub fn new(devices: Arc<dyn DynamicDevices>, steps: usize, settle: Duration) -> Self {
        Self {
            devices,
            steps,
            settle,
            position: 0,
        }
    }

    /// Number of sweep steps; 1 means a single static measurement.
    pub fn step_count(&self) -> usize {
        self.steps
    }

    /// Steps advanced since the last reset
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the dynamic devices to the next step and return its index.
    pub async fn advance(&mut self) -> AppResult<usize> {
        if self.position >= self.steps {
            return Err(DaqError::Configuration(format!(
                "sweep already completed all {} steps",
                self.steps
            )));
        }
        let step = self.position;
        self.devices
            .advance_step()
            .await
            .map_err(|e| DaqError::hardware(format!("advance dynamic step {step}"), e))?;
        settle(self.settle).await;
        self.position += 1;
        Ok(step)
    }

    /// Return to the first step.
    pub async fn reset(&mut self) -> AppResult<()> {
        self.position = 0;
        self.devices
            .reset_step()
            .await
            .map_err(|e| DaqError::hardware("reset dynamic step", e))
    }

    /// Run the whole sweep: for every step in order, advance, then acquire all
    /// repetitions into `buffer`.
    ///
    /// Stops at the first fault; coordinates of completed steps stay written.
    /// Progress is logged at info level roughly every tenth of the sweep.
    pub async fn run(
        &mut self,
        averager: &AcquisitionAverager,
        sensor: &dyn Sensor,
        synchroniser: &dyn Synchroniser,
        buffer: &mut AggregationBuffer,
    ) -> AppResult<()> {
        let report_every = (self.steps / 10).max(1);
        for _ in 0..self.steps {
            let step = self.advance().await?;
            debug!(step, of = self.steps, "Sweep step");
            averager
                .acquire_step(step, sensor, synchroniser, buffer)
                .await?;
            let done = step + 1;
            if done % report_every == 0 || done == self.steps {
                info!(step = done, of = self.steps, "Sweep progress");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockDynamicDevices, MockSensor, MockSynchroniser};
    use crate::measurement::buffer::SampleShape;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn advance_walks_the_configured_steps() {
        let devices = Arc::new(MockDynamicDevices::linear("stage", 0.0, 3.0, 4));
        let mut sweep = SweepDriver::new(devices.clone(), 4, Duration::ZERO);

        for expected in 0..4 {
            assert_eq!(sweep.advance().await.unwrap(), expected);
        }
        assert_eq!(devices.current_value(), Some(3.0));
        assert!(matches!(
            sweep.advance().await,
            Err(DaqError::Configuration(_))
        ));
        assert_eq!(devices.steps_advanced(), 4);
    }

    #[tokio::test]
    async fn reset_restores_the_initial_state() {
        let devices = Arc::new(MockDynamicDevices::linear("stage", 0.0, 1.0, 2));
        let mut sweep = SweepDriver::new(devices.clone(), 2, Duration::ZERO);

        for _ in 0..3 {
            sweep.advance().await.unwrap();
            sweep.advance().await.unwrap();
            sweep.reset().await.unwrap();
            assert_eq!(sweep.position(), 0);
            assert_eq!(devices.steps_advanced(), 0);
            assert_eq!(devices.current_value(), None);
        }
        sweep.reset().await.unwrap();
        assert_eq!(sweep.position(), 0);
    }

    #[tokio::test]
    async fn single_step_sweep_is_a_static_measurement() {
        let sync = MockSynchroniser::new();
        sync.open().await.unwrap();
        sync.load_sequence().await.unwrap();
        sync.run().await.unwrap();
        let sensor = MockSensor::new(SampleShape::scalar(2));
        sensor.open().await.unwrap();

        let devices = Arc::new(MockDynamicDevices::linear("none", 0.0, 0.0, 1));
        let mut sweep = SweepDriver::new(devices, 1, Duration::ZERO);
        let averager = AcquisitionAverager::new(3, Duration::ZERO);
        let mut buffer = AggregationBuffer::allocate(SampleShape::scalar(2), 1, 3).unwrap();

        sweep.run(&averager, &sensor, &sync, &mut buffer).await.unwrap();

        assert!(buffer.is_complete());
        assert_eq!(buffer.shape(), &[2, 1, 3]);
        assert_eq!(sensor.acquisitions(), 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn long_sweeps_report_progress() {
        let sync = MockSynchroniser::new();
        sync.open().await.unwrap();
        sync.load_sequence().await.unwrap();
        sync.run().await.unwrap();
        let sensor = MockSensor::new(SampleShape::scalar(1));
        sensor.open().await.unwrap();

        let devices = Arc::new(MockDynamicDevices::linear("stage", 0.0, 1.0, 20));
        let mut sweep = SweepDriver::new(devices, 20, Duration::ZERO);
        let averager = AcquisitionAverager::new(1, Duration::ZERO);
        let mut buffer = AggregationBuffer::allocate(SampleShape::scalar(1), 20, 1).unwrap();

        sweep.run(&averager, &sensor, &sync, &mut buffer).await.unwrap();

        logs_assert(|lines: &[&str]| {
            let progress = lines
                .iter()
                .filter(|line| line.contains("Sweep progress"))
                .count();
            match progress {
                10 => Ok(()),
                n => Err(format!("expected 10 progress events, saw {n}")),
            }
        });
    }
}
