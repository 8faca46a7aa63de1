//! Hardware lifecycle: bring the synchroniser and sensor up before the cycle
//! loop and guarantee they are closed afterwards.
//!
//! `acquire` follows the timing-hardware protocol exactly:
//!
//! ```text
//! sync.open → sync.stop → sync.load_sequence → sync.run → settle
//!           → sensor.open → settle
//! ```
//!
//! `release` closes only what `acquire` managed to open, attempts every close
//! even if an earlier one fails, and takes effect exactly once.
//!
//! Every protocol call is bounded by `timing.step_timeout`; a call that hangs
//! fails as a hardware fault naming the operation.

use crate::config::TimingConfig;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{Sensor, Synchroniser};
use anyhow::anyhow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info};

/// Owns the open/closed state of the synchroniser and sensor for one session.
pub struct HardwareLifecycle {
    synchroniser: Arc<dyn Synchroniser>,
    sensor: Arc<dyn Sensor>,
    timing: TimingConfig,
    synchroniser_open: bool,
    sensor_open: bool,
    released: bool,
}

impl HardwareLifecycle {
    /// Create a lifecycle controller; nothing is touched until `acquire`.
    pub fn new(
        synchroniser: Arc<dyn Synchroniser>,
        sensor: Arc<dyn Sensor>,
        timing: TimingConfig,
    ) -> Self {
        Self {
            synchroniser,
            sensor,
            timing,
            synchroniser_open: false,
            sensor_open: false,
            released: false,
        }
    }

    /// Bring the stack into a ready-to-run state.
    pub async fn acquire(&mut self) -> AppResult<()> {
        if self.released {
            return Err(DaqError::Configuration(
                "hardware lifecycle already released".to_string(),
            ));
        }

        info!("Opening synchroniser");
        self.bounded("open synchroniser", self.synchroniser.open()).await?;
        self.synchroniser_open = true;

        self.bounded("stop synchroniser", self.synchroniser.stop()).await?;
        self.bounded("load sequence", self.synchroniser.load_sequence()).await?;
        self.bounded("start synchroniser", self.synchroniser.run()).await?;
        settle(self.timing.sync_settle).await;

        info!("Opening sensor");
        self.bounded("open sensor", self.sensor.open()).await?;
        self.sensor_open = true;
        settle(self.timing.sensor_settle).await;

        debug!("Hardware ready");
        Ok(())
    }

    /// Re-arm timing generation between cycles.
    pub async fn rearm(&self) -> AppResult<()> {
        self.bounded("stop synchroniser", self.synchroniser.stop()).await?;
        self.bounded("restart synchroniser", self.synchroniser.run()).await
    }

    /// Close the sensor, then the synchroniser.
    ///
    /// Only the first call has any effect.
    pub async fn release(&mut self) -> AppResult<()> {
        if self.released {
            debug!("Hardware already released");
            return Ok(());
        }
        self.released = true;

        let mut errors = Vec::new();

        if self.sensor_open {
            match self.bounded("close sensor", self.sensor.close()).await {
                Ok(()) => info!("Sensor closed"),
                Err(e) => {
                    error!(error = %e, "Failed to close sensor");
                    errors.push(e);
                }
            }
            self.sensor_open = false;
        }

        if self.synchroniser_open {
            match self.bounded("close synchroniser", self.synchroniser.close()).await {
                Ok(()) => info!("Synchroniser closed"),
                Err(e) => {
                    error!(error = %e, "Failed to close synchroniser");
                    errors.push(e);
                }
            }
            self.synchroniser_open = false;
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }

    /// Run one protocol call, failing it as a hardware fault if it does not
    /// finish within `timing.step_timeout`.
    async fn bounded<F>(&self, operation: &str, call: F) -> AppResult<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        match timeout(self.timing.step_timeout, call).await {
            Ok(result) => result.map_err(|e| DaqError::hardware(operation, e)),
            Err(_) => Err(DaqError::hardware(
                operation,
                anyhow!("timed out after {:?}", self.timing.step_timeout),
            )),
        }
    }

    /// Whether `release` has run
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Whether the synchroniser is currently open
    pub fn synchroniser_open(&self) -> bool {
        self.synchroniser_open
    }

    /// Whether the sensor is currently open
    pub fn sensor_open(&self) -> bool {
        self.sensor_open
    }
}

impl Drop for HardwareLifecycle {
    fn drop(&mut self) {
        if !self.released && (self.synchroniser_open || self.sensor_open) {
            error!(
                synchroniser_open = self.synchroniser_open,
                sensor_open = self.sensor_open,
                "Hardware lifecycle dropped without release; devices may still be running"
            );
        }
    }
}

pub(crate) async fn settle(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay).await;
    }
}
