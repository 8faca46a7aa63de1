//! Per-cycle run record and the metadata persisted alongside a saved buffer.

use crate::config::RunParameters;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp format used in run names and filenames.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Outcome of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Sweep still in progress
    Pending,
    /// Sweep complete, operator has not decided yet
    Acquired,
    /// Written to storage
    Saved,
    /// Operator chose not to save
    Discarded,
    /// The cycle was aborted by a fault
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Pending => "pending",
            RunStatus::Acquired => "acquired",
            RunStatus::Saved => "saved",
            RunStatus::Discarded => "discarded",
            RunStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Derived fields of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Cycle index within the session (0-based)
    pub cycle: usize,
    /// Wall-clock start of the cycle
    pub timestamp: DateTime<Local>,
    /// `<experiment>_<timestamp>`
    pub run_name: String,
    /// Base filename for persistence; set when the cycle is stamped
    pub filename: Option<String>,
    /// Version of this crate; set when the cycle is stamped
    pub tool_version: Option<String>,
    /// Current status
    pub status: RunStatus,
}

impl RunRecord {
    /// Start the record of a new cycle.
    pub fn begin(experiment_type: &str, cycle: usize, now: DateTime<Local>) -> Self {
        Self {
            cycle,
            timestamp: now,
            run_name: format!("{}_{}", experiment_type, now.format(TIMESTAMP_FORMAT)),
            filename: None,
            tool_version: None,
            status: RunStatus::Pending,
        }
    }

    /// Append `_<n>` when `n` earlier cycles of the session started in the same second.
    pub fn disambiguate(&mut self, earlier: &[RunRecord]) {
        let label = self.timestamp_label();
        let same_second = earlier
            .iter()
            .filter(|r| r.timestamp_label() == label)
            .count();
        if same_second > 0 {
            self.run_name = format!("{}_{}", self.run_name, same_second);
        }
    }

    /// Fill in filename, tool version and the provisional status.
    pub fn stamp(&mut self) {
        self.filename = Some(self.run_name.clone());
        self.tool_version = Some(env!("CARGO_PKG_VERSION").to_string());
        self.status = RunStatus::Acquired;
    }

    /// Timestamp as it appears in the run name
    pub fn timestamp_label(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Everything written next to a saved buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Session parameters
    pub params: RunParameters,
    /// The cycle that produced the buffer
    pub record: RunRecord,
}
