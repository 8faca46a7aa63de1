//! Measurement building blocks: the aggregation buffer, the sweep driver, the
//! acquisition averager and the per-cycle run record.
//!
//! ```text
//! SweepDriver::run
//!   for step in 0..S:
//!     advance()                       dynamic devices → step, settle
//!     AcquisitionAverager::acquire_step
//!       for rep in 0..R:
//!         settle; sensor.acquire_data(sync) → buffer[.., step, rep, ..]
//! ```

pub mod averager;
pub mod buffer;
pub mod record;
pub mod sweep;

pub use averager::AcquisitionAverager;
pub use buffer::{AggregationBuffer, BufferError, BufferSnapshot, Sample, SampleShape};
pub use record::{RunMetadata, RunRecord, RunStatus};
pub use sweep::SweepDriver;
