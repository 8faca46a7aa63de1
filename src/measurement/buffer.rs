//! Aggregation buffer for one measurement cycle.
//!
//! The buffer is a dense `f64` tensor with axes
//! `[channel, sweep step, repetition, sample dims...]`. Its shape is fixed at
//! allocation from the sensor's declared [`SampleShape`] and the configured
//! step/repetition counts. Every `(step, repetition)` coordinate may be written
//! exactly once; a second write is rejected instead of silently overwriting
//! data that was already acquired.
//!
//! A new buffer is allocated for every cycle and dropped before the next one
//! is created, so peak memory stays at one run's worth of data.

use ndarray::{Array2, ArrayD, ArrayViewD, Axis, IxDyn, ShapeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One raw acquisition: shape `[channels, sample dims...]`.
pub type Sample = ArrayD<f64>;

/// Names of the fixed leading axes.
pub const LEADING_AXES: [&str; 3] = ["channel", "step", "repetition"];

/// Buffer invariant violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("invalid buffer shape: {0}")]
    InvalidShape(String),

    #[error("coordinate (step {step}, repetition {repetition}) is outside a {steps}x{repetitions} buffer")]
    OutOfRange {
        step: usize,
        repetition: usize,
        steps: usize,
        repetitions: usize,
    },

    #[error("coordinate (step {step}, repetition {repetition}) was already written")]
    AlreadyWritten { step: usize, repetition: usize },

    #[error("sample shape {actual:?} does not match declared sensor shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Shape of one sensor sample, as declared by the sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleShape {
    /// Number of channels (first axis)
    pub channels: usize,
    /// Remaining per-channel sample dimensions; empty for scalar readings
    pub dims: Vec<usize>,
}

impl SampleShape {
    /// One scalar per channel
    pub fn scalar(channels: usize) -> Self {
        Self {
            channels,
            dims: Vec::new(),
        }
    }

    /// `samples` points per channel
    pub fn trace(channels: usize, samples: usize) -> Self {
        Self {
            channels,
            dims: vec![samples],
        }
    }

    /// Full sample shape `[channels, dims...]`
    pub fn sample_shape(&self) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.dims.len() + 1);
        shape.push(self.channels);
        shape.extend_from_slice(&self.dims);
        shape
    }

    /// Number of values in one sample
    pub fn len(&self) -> usize {
        self.sample_shape().iter().product()
    }

    /// True when a sample holds no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Multi-axis container owning all data of one cycle.
#[derive(Debug, Clone)]
pub struct AggregationBuffer {
    data: ArrayD<f64>,
    written: Array2<bool>,
    populated: usize,
    sample: SampleShape,
}

impl AggregationBuffer {
    /// Allocate a zero-filled buffer for `steps` x `repetitions` samples.
    pub fn allocate(
        sample: SampleShape,
        steps: usize,
        repetitions: usize,
    ) -> Result<Self, BufferError> {
        let shape = Self::layout(&sample, steps, repetitions)?;
        Ok(Self {
            data: ArrayD::zeros(IxDyn(&shape)),
            written: Array2::from_elem((steps, repetitions), false),
            populated: 0,
            sample,
        })
    }

    /// Full tensor shape for `sample` x `steps` x `repetitions`, without
    /// allocating. Fails for the same inputs `allocate` rejects.
    pub fn layout(
        sample: &SampleShape,
        steps: usize,
        repetitions: usize,
    ) -> Result<Vec<usize>, BufferError> {
        if steps == 0 || repetitions == 0 {
            return Err(BufferError::InvalidShape(format!(
                "{steps} steps x {repetitions} repetitions"
            )));
        }
        if sample.channels == 0 || sample.dims.contains(&0) {
            return Err(BufferError::InvalidShape(format!(
                "sensor declared empty sample shape {:?}",
                sample.sample_shape()
            )));
        }

        let mut shape = vec![sample.channels, steps, repetitions];
        shape.extend_from_slice(&sample.dims);
        shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .and_then(|len| len.checked_mul(std::mem::size_of::<f64>()))
            .filter(|&bytes| bytes <= isize::MAX as usize)
            .ok_or_else(|| BufferError::InvalidShape(format!("{shape:?} does not fit in memory")))?;
        Ok(shape)
    }

    /// Store one acquisition at `(step, repetition)`.
    ///
    /// Nothing is written unless the coordinate is in range, still empty and
    /// the sample matches the declared shape.
    pub fn record(
        &mut self,
        step: usize,
        repetition: usize,
        sample: ArrayViewD<'_, f64>,
    ) -> Result<(), BufferError> {
        if step >= self.steps() || repetition >= self.repetitions() {
            return Err(BufferError::OutOfRange {
                step,
                repetition,
                steps: self.steps(),
                repetitions: self.repetitions(),
            });
        }
        if self.written[[step, repetition]] {
            return Err(BufferError::AlreadyWritten { step, repetition });
        }
        let expected = self.sample.sample_shape();
        if sample.shape() != expected.as_slice() {
            return Err(BufferError::ShapeMismatch {
                expected,
                actual: sample.shape().to_vec(),
            });
        }

        self.data
            .index_axis_mut(Axis(1), step)
            .index_axis_mut(Axis(1), repetition)
            .assign(&sample);
        self.written[[step, repetition]] = true;
        self.populated += 1;
        Ok(())
    }

    /// Whether `(step, repetition)` holds an acquisition
    pub fn is_written(&self, step: usize, repetition: usize) -> bool {
        self.written
            .get([step, repetition])
            .copied()
            .unwrap_or(false)
    }

    /// Coordinates written so far, in (step, repetition) order
    pub fn written_coordinates(&self) -> Vec<(usize, usize)> {
        self.written
            .indexed_iter()
            .filter(|&(_, &written)| written)
            .map(|((step, repetition), _)| (step, repetition))
            .collect()
    }

    /// Number of populated coordinates
    pub fn populated(&self) -> usize {
        self.populated
    }

    /// Total number of coordinates (steps x repetitions)
    pub fn capacity(&self) -> usize {
        self.written.len()
    }

    /// True once every coordinate has been written
    pub fn is_complete(&self) -> bool {
        self.populated == self.capacity()
    }

    /// Number of sweep steps
    pub fn steps(&self) -> usize {
        self.written.nrows()
    }

    /// Number of repetitions per step
    pub fn repetitions(&self) -> usize {
        self.written.ncols()
    }

    /// Number of channels
    pub fn channels(&self) -> usize {
        self.sample.channels
    }

    /// Declared sample shape
    pub fn sample_shape(&self) -> &SampleShape {
        &self.sample
    }

    /// Full tensor shape
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Read-only view of the whole tensor
    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    /// `[step, repetition, dims...]` view of one channel
    pub fn channel(&self, channel: usize) -> Option<ArrayViewD<'_, f64>> {
        (channel < self.channels()).then(|| self.data.index_axis(Axis(0), channel))
    }

    /// All values in row-major order
    pub fn flattened(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    /// Owned, serializable copy of the tensor
    pub fn snapshot(&self) -> BufferSnapshot {
        let mut axes: Vec<String> = LEADING_AXES.iter().map(|a| a.to_string()).collect();
        axes.extend((0..self.sample.dims.len()).map(|i| format!("sample_{i}")));
        BufferSnapshot {
            shape: self.shape().to_vec(),
            axes,
            values: self.flattened(),
        }
    }
}

/// Serializable form of a completed buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferSnapshot {
    /// Tensor shape
    pub shape: Vec<usize>,
    /// Axis names, one per shape entry
    pub axes: Vec<String>,
    /// Row-major values
    pub values: Vec<f64>,
}

impl BufferSnapshot {
    /// Rebuild the tensor
    pub fn to_array(&self) -> Result<ArrayD<f64>, ShapeError> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.values.clone())
    }
}
