//! Repeated acquisition for one sweep step.

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{Sensor, Synchroniser};
use crate::hardware::lifecycle::settle;
use crate::measurement::buffer::AggregationBuffer;
use std::time::Duration;
use tracing::trace;

/// Performs `repetitions` sequential acquisitions per sweep step and routes
/// each sample to its `(step, repetition)` coordinate.
#[derive(Debug, Clone)]
pub struct AcquisitionAverager {
    repetitions: usize,
    settle: Duration,
}

impl AcquisitionAverager {
    /// `settle` is slept before every acquisition.
    pub fn new(repetitions: usize, settle: Duration) -> Self {
        Self {
            repetitions,
            settle,
        }
    }

    /// Repetitions per step
    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    /// Acquire every repetition of `step` into `buffer`.
    ///
    /// A sensor failure stops the step immediately; the failed coordinate is
    /// left unwritten.
    pub async fn acquire_step(
        &self,
        step: usize,
        sensor: &dyn Sensor,
        synchroniser: &dyn Synchroniser,
        buffer: &mut AggregationBuffer,
    ) -> AppResult<()> {
        for repetition in 0..self.repetitions {
            settle(self.settle).await;
            let sample = sensor.acquire_data(synchroniser).await.map_err(|e| {
                DaqError::hardware(format!("acquire step {step} repetition {repetition}"), e)
            })?;
            buffer.record(step, repetition, sample.view())?;
            trace!(step, repetition, "Sample recorded");
        }
        Ok(())
    }
}
