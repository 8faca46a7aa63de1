//! Custom error types for the measurement loop.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent way to classify the faults
//! that can end a measurement session, from configuration problems through to
//! instrument failures and storage errors.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches in the configuration sources.
//! - **`Configuration`**: Semantic configuration errors (a missing experiment
//!   identifier, a zero repetition count). These are raised before any hardware
//!   resource is touched.
//! - **`Hardware`**: A synchroniser, sensor or device handler call failed. Carries
//!   the name of the protocol step so logs show *where* the stack stopped.
//! - **`Buffer`**: An aggregation buffer invariant was violated.
//! - **`Persistence`**: Writing a run to durable storage failed.
//! - **`Operator`**: The operator input source itself failed (not a quit request;
//!   quitting is a normal intent, see `session::operator::OperatorIntent`).
//! - **`Panicked`**: A collaborator panicked inside the cycle loop.
//! - **`ShutdownFailed`**: One or more hardware release steps failed.
//!
//! Collaborator traits return `anyhow::Result`; the session classifies those
//! errors with [`DaqError::hardware`] and [`DaqError::persistence`] at the call site.

use crate::measurement::buffer::BufferError;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Hardware fault during {operation}: {source:#}")]
    Hardware {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Aggregation buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Persistence fault for '{filename}': {source:#}")]
    Persistence {
        filename: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Operator input failed: {0}")]
    Operator(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Measurement loop panicked: {0}")]
    Panicked(String),

    #[error("Shutdown failed with errors: {}", join_errors(.0))]
    ShutdownFailed(Vec<DaqError>),
}

impl DaqError {
    /// Classify a collaborator failure as a hardware fault.
    pub fn hardware(operation: impl Into<String>, source: anyhow::Error) -> Self {
        DaqError::Hardware {
            operation: operation.into(),
            source,
        }
    }

    /// Classify a storage failure as a persistence fault.
    pub fn persistence(filename: impl Into<String>, source: anyhow::Error) -> Self {
        DaqError::Persistence {
            filename: filename.into(),
            source,
        }
    }

    /// True for faults raised by the synchroniser, sensor or device handlers.
    pub fn is_hardware_fault(&self) -> bool {
        match self {
            DaqError::Hardware { .. } => true,
            DaqError::ShutdownFailed(errors) => errors.iter().any(DaqError::is_hardware_fault),
            _ => false,
        }
    }

    /// True for faults detected before hardware was touched.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(self, DaqError::Config(_) | DaqError::Configuration(_))
    }
}

fn join_errors(errors: &[DaqError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn hardware_fault_names_the_operation() {
        let err = DaqError::hardware("load sequence", anyhow!("timeout after 2s"));
        assert!(err.is_hardware_fault());
        assert_eq!(
            err.to_string(),
            "Hardware fault during load sequence: timeout after 2s"
        );
    }

    #[test]
    fn hardware_fault_keeps_context_chain() {
        let source = anyhow!("device busy").context("open synchroniser");
        let err = DaqError::hardware("open synchroniser", source);
        let rendered = err.to_string();
        assert!(rendered.contains("open synchroniser"));
        assert!(rendered.contains("device busy"));
    }

    #[test]
    fn shutdown_failure_combines_messages() {
        let err = DaqError::ShutdownFailed(vec![
            DaqError::hardware("close sensor", anyhow!("camera timeout")),
            DaqError::Io(std::io::Error::other("port vanished")),
        ]);
        assert!(err.is_hardware_fault());
        let rendered = err.to_string();
        assert!(rendered.contains("camera timeout"));
        assert!(rendered.contains("port vanished"));
    }

    #[test]
    fn configuration_faults_are_classified() {
        let err = DaqError::Configuration("averages must be at least 1".into());
        assert!(err.is_configuration_fault());
        assert!(!err.is_hardware_fault());
    }
}
