//! # Sweep DAQ Core Library
//!
//! This crate drives a physics measurement stack (a timing synchroniser,
//! static and swept devices, and a data-acquiring sensor) through repeated
//! parameter sweeps. Every cycle acquires a full sweep into an aggregation
//! buffer, presents it, and lets the operator repeat, save, or quit. Hardware
//! is always released when the session ends, and the terminal status reflects
//! what really happened.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered configuration (`Settings`, `RunParameters`) loaded with figment
//!   from TOML plus `SWEEP_DAQ_` environment overrides.
//! - **`error`**: The `DaqError` enum classifying every fault a session can end with.
//! - **`hardware`**: Capability traits for the instrument stack, the hardware lifecycle
//!   controller, and simulated instruments.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`measurement`**: Aggregation buffer, sweep driver, acquisition averager and the
//!   per-cycle run record.
//! - **`presentation`**: Derived-quantity strategies and presenters that consume one event
//!   per completed sweep.
//! - **`session`**: The run cycle controller, operator input, and the session entry points.
//! - **`storage`**: Persistence of saved runs.

pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod measurement;
pub mod presentation;
pub mod session;
pub mod storage;

pub use config::{RunParameters, Settings, TimingConfig};
pub use error::{AppResult, DaqError};
pub use hardware::Instruments;
pub use session::{
    run_measurement, MeasurementSession, OperatorIntent, SessionReport, SessionStatus,
};
