//! Cycle state of a running session.

use serde::{Deserialize, Serialize};

/// Where the run cycle controller currently is.
///
/// # State Machine
///
/// ```text
/// Starting ──> Sweeping ──> Stamping ──> Presenting ──> AwaitingOperator
///    ▲                                                   │           │
///    │                                             save  ▼           │ no save
///    │                                              Persisting       │
///    │                                                   │           │
///    │ continue                                          ▼           │
///    └──────────────────────────────────────────── Resetting <───────┘
///                                                        │
///                                     quit, or fault     ▼
///                                     anywhere ──>  Terminated
/// ```
///
/// A fault leaves the state where it happened until the session publishes
/// `Terminated`, so observers can see which stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleState {
    /// Hardware acquired; allocating the next cycle
    Starting,
    /// Stepping the dynamic devices and acquiring
    Sweeping,
    /// Filling in derived run fields
    Stamping,
    /// Emitting the presentation event
    Presenting,
    /// Waiting for the operator's decision
    AwaitingOperator,
    /// Writing buffer and metadata
    Persisting,
    /// Resetting the sweep and re-arming timing
    Resetting,
    /// Session over
    Terminated,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleState::Starting => write!(f, "Starting"),
            CycleState::Sweeping => write!(f, "Sweeping"),
            CycleState::Stamping => write!(f, "Stamping"),
            CycleState::Presenting => write!(f, "Presenting"),
            CycleState::AwaitingOperator => write!(f, "AwaitingOperator"),
            CycleState::Persisting => write!(f, "Persisting"),
            CycleState::Resetting => write!(f, "Resetting"),
            CycleState::Terminated => write!(f, "Terminated"),
        }
    }
}

impl CycleState {
    /// Check if the session has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleState::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_terminated_is_terminal() {
        assert!(CycleState::Terminated.is_terminal());
        assert!(!CycleState::AwaitingOperator.is_terminal());
    }

    #[test]
    fn display_uses_variant_names() {
        assert_eq!(CycleState::AwaitingOperator.to_string(), "AwaitingOperator");
        assert_eq!(CycleState::Resetting.to_string(), "Resetting");
    }
}
