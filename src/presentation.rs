//! Presentation of completed cycles.
//!
//! The loop does not draw anything itself. After each sweep it computes a
//! plot payload with a [`DerivedQuantities`] strategy and hands the resulting
//! [`PresentationEvent`] to a [`Presenter`]. The event carries its own
//! snapshot of the buffer, so presenters can redraw from raw data without
//! being able to alter what is saved. Their failures are logged rather than
//! aborting the cycle.
//!
//! Experiment variants that differ only in what they plot are expressed as
//! different strategies over the same loop:
//!
//! ```rust,ignore
//! let session = MeasurementSession::builder(params, instruments)
//!     .strategy(Arc::new(ChannelRatio::new(0, 1)))
//!     .presenter(Arc::new(ChannelPresenter::new(plot_tx)))
//!     .build()?;
//! ```

use crate::config::RunParameters;
use crate::measurement::buffer::{AggregationBuffer, BufferSnapshot};
use crate::measurement::record::RunRecord;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

/// One line of a plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSeries {
    /// Legend label
    pub label: String,
    /// Y values; the x axis is the index
    pub values: Vec<f64>,
}

impl PlotSeries {
    /// Create a series
    pub fn new(label: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            label: label.into(),
            values,
        }
    }

    /// Minimum, maximum and mean of the finite values
    pub fn summary(&self) -> Option<(f64, f64, f64)> {
        let finite: Vec<f64> = self.values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = finite.iter().sum::<f64>() / finite.len() as f64;
        Some((min, max, mean))
    }
}

/// Notification emitted once per completed sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationEvent {
    /// Run name of the cycle
    pub run_name: String,
    /// Cycle index
    pub cycle: usize,
    /// Copy of the completed aggregation buffer
    pub buffer: BufferSnapshot,
    /// Strategy that produced `series`
    pub strategy: String,
    /// Plot payload
    pub series: Vec<PlotSeries>,
}

impl PresentationEvent {
    /// Build the event for `record` using `strategy`.
    pub fn build(
        strategy: &dyn DerivedQuantities,
        buffer: &AggregationBuffer,
        params: &RunParameters,
        record: &RunRecord,
    ) -> Self {
        Self {
            run_name: record.run_name.clone(),
            cycle: record.cycle,
            buffer: buffer.snapshot(),
            strategy: strategy.name().to_string(),
            series: strategy.derive(buffer, params),
        }
    }
}

// =============================================================================
// Derived-quantity strategies
// =============================================================================

/// Computes what is plotted from a completed buffer.
pub trait DerivedQuantities: Send + Sync {
    /// Strategy identifier
    fn name(&self) -> &str;

    /// Compute the plot payload
    fn derive(&self, buffer: &AggregationBuffer, params: &RunParameters) -> Vec<PlotSeries>;
}

/// One flattened trace per channel, in `[step, repetition, sample]` order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelTraces;

impl DerivedQuantities for ChannelTraces {
    fn name(&self) -> &str {
        "channel_traces"
    }

    fn derive(&self, buffer: &AggregationBuffer, _params: &RunParameters) -> Vec<PlotSeries> {
        (0..buffer.channels())
            .filter_map(|ch| buffer.channel(ch).map(|view| (ch, view)))
            .map(|(ch, view)| PlotSeries::new(format!("Plot {ch}"), view.iter().copied().collect()))
            .collect()
    }
}

/// Per channel, the mean over repetitions and sample points at each sweep step.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepMeans;

impl StepMeans {
    fn means(buffer: &AggregationBuffer, channel: usize) -> Vec<f64> {
        buffer
            .channel(channel)
            .map(|view| {
                view.axis_iter(Axis(0))
                    .map(|step| step.mean().unwrap_or(f64::NAN))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl DerivedQuantities for StepMeans {
    fn name(&self) -> &str {
        "step_means"
    }

    fn derive(&self, buffer: &AggregationBuffer, _params: &RunParameters) -> Vec<PlotSeries> {
        (0..buffer.channels())
            .map(|ch| PlotSeries::new(format!("Channel {ch} mean"), Self::means(buffer, ch)))
            .collect()
    }
}

/// Step-mean ratio `numerator / denominator` of two channels.
///
/// Steps whose denominator mean is zero yield NaN.
#[derive(Debug, Clone, Copy)]
pub struct ChannelRatio {
    numerator: usize,
    denominator: usize,
}

impl ChannelRatio {
    /// Ratio of channel `numerator` to channel `denominator`
    pub fn new(numerator: usize, denominator: usize) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

impl DerivedQuantities for ChannelRatio {
    fn name(&self) -> &str {
        "channel_ratio"
    }

    fn derive(&self, buffer: &AggregationBuffer, _params: &RunParameters) -> Vec<PlotSeries> {
        if self.numerator >= buffer.channels() || self.denominator >= buffer.channels() {
            return Vec::new();
        }
        let num = StepMeans::means(buffer, self.numerator);
        let den = StepMeans::means(buffer, self.denominator);
        let ratio = num
            .iter()
            .zip(&den)
            .map(|(n, d)| if *d == 0.0 { f64::NAN } else { n / d })
            .collect();
        vec![PlotSeries::new(
            format!("Channel {} / channel {}", self.numerator, self.denominator),
            ratio,
        )]
    }
}

// =============================================================================
// Presenters
// =============================================================================

/// Consumer of presentation events.
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Render or forward one event
    async fn present(&self, event: &PresentationEvent) -> Result<()>;
}

/// Logs a one-line summary per series.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPresenter;

#[async_trait]
impl Presenter for TracingPresenter {
    async fn present(&self, event: &PresentationEvent) -> Result<()> {
        info!(
            run = %event.run_name,
            shape = ?event.buffer.shape,
            strategy = %event.strategy,
            "Measurement complete"
        );
        for series in &event.series {
            match series.summary() {
                Some((min, max, mean)) => info!(
                    run = %event.run_name,
                    series = %series.label,
                    points = series.values.len(),
                    min,
                    max,
                    mean
                ),
                None => info!(run = %event.run_name, series = %series.label, "No finite values"),
            }
        }
        Ok(())
    }
}

/// Forwards events to an independent rendering task.
///
/// Never blocks the loop: a full channel is reported as a presentation error
/// and the event is dropped.
pub struct ChannelPresenter {
    tx: mpsc::Sender<PresentationEvent>,
}

impl ChannelPresenter {
    /// Forward events on `tx`
    pub fn new(tx: mpsc::Sender<PresentationEvent>) -> Self {
        Self { tx }
    }

    /// Create a presenter and the receiving end for a renderer
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PresentationEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Presenter for ChannelPresenter {
    async fn present(&self, event: &PresentationEvent) -> Result<()> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow!("renderer is behind, event dropped"),
            mpsc::error::TrySendError::Closed(_) => anyhow!("renderer has shut down"),
        })
    }
}
