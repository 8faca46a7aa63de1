//! Operator intents and the sources they come from.
//!
//! The cycle loop asks its [`OperatorInput`] for exactly one intent per cycle,
//! in the `AwaitingOperator` state, after the data has been presented. This is
//! the only point at which a session can be asked to stop; a quit request can
//! never interrupt an acquisition or a sweep step.

use crate::error::{AppResult, DaqError};
use crate::measurement::record::RunRecord;
use async_trait::async_trait;
use std::fmt;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

const PROMPT: &str = "Press Enter to repeat, 's' to save, 'q' to quit ('sq' saves then quits): ";

/// What the operator wants to happen after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorIntent {
    /// Discard this run and measure again
    Repeat,
    /// Persist this run and measure again
    SaveAndContinue,
    /// Discard this run and end the session
    Quit,
    /// Persist this run and end the session
    SaveAndQuit,
}

impl OperatorIntent {
    /// Whether the run should be persisted
    pub fn saves(self) -> bool {
        matches!(self, OperatorIntent::SaveAndContinue | OperatorIntent::SaveAndQuit)
    }

    /// Whether the session should end after this cycle
    pub fn quits(self) -> bool {
        matches!(self, OperatorIntent::Quit | OperatorIntent::SaveAndQuit)
    }
}

impl fmt::Display for OperatorIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatorIntent::Repeat => "repeat",
            OperatorIntent::SaveAndContinue => "save",
            OperatorIntent::Quit => "quit",
            OperatorIntent::SaveAndQuit => "save and quit",
        };
        f.write_str(name)
    }
}

/// Parse one line of operator input.
///
/// Returns `None` for anything unrecognised.
pub fn parse_intent(input: &str) -> Option<OperatorIntent> {
    match input.trim().to_ascii_lowercase().as_str() {
        "" => Some(OperatorIntent::Repeat),
        "s" => Some(OperatorIntent::SaveAndContinue),
        "q" => Some(OperatorIntent::Quit),
        "sq" | "qs" => Some(OperatorIntent::SaveAndQuit),
        _ => None,
    }
}

/// Source of operator decisions.
#[async_trait]
pub trait OperatorInput: Send + Sync {
    /// Wait for the decision about the run described by `record`.
    async fn next_intent(&self, record: &RunRecord) -> AppResult<OperatorIntent>;
}

// =============================================================================
// Line-based prompt
// =============================================================================

/// Blocking terminal prompt.
///
/// Waits indefinitely for a line. Unrecognised input re-prompts; end of input
/// is an operator error.
pub struct StdinOperator<R = BufReader<Stdin>> {
    lines: Mutex<Lines<R>>,
    echo_prompt: bool,
}

impl StdinOperator {
    /// Prompt on stdout and read from stdin
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            echo_prompt: true,
        }
    }
}

impl Default for StdinOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: AsyncBufRead + Unpin + Send> StdinOperator<R> {
    /// Read intents from any line source, without printing the prompt
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: Mutex::new(reader.lines()),
            echo_prompt: false,
        }
    }

    fn prompt(&self, record: &RunRecord) {
        if !self.echo_prompt {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        // A broken stdout must not end the session; the read below decides.
        let _ = write!(stdout, "[{}] {PROMPT}", record.run_name);
        let _ = stdout.flush();
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> OperatorInput for StdinOperator<R> {
    async fn next_intent(&self, record: &RunRecord) -> AppResult<OperatorIntent> {
        let mut lines = self.lines.lock().await;
        loop {
            self.prompt(record);
            let line = lines
                .next_line()
                .await
                .map_err(|e| DaqError::Operator(format!("reading operator input: {e}")))?
                .ok_or_else(|| DaqError::Operator("operator input closed".to_string()))?;

            match parse_intent(&line) {
                Some(intent) => return Ok(intent),
                None => warn!(input = %line.trim(), "Unrecognised operator input"),
            }
        }
    }
}

// =============================================================================
// Channel-delivered intents
// =============================================================================

/// How a [`ChannelOperator`] waits for an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Wait until an intent arrives; a closed channel means quit
    Block,
    /// Check once without waiting; nothing pending means repeat
    Poll,
}

/// Intents delivered by another task (a GUI, a key listener, a script).
pub struct ChannelOperator {
    rx: Mutex<mpsc::UnboundedReceiver<OperatorIntent>>,
    mode: WaitMode,
}

impl ChannelOperator {
    /// Operator fed by the returned sender
    pub fn new(mode: WaitMode) -> (Self, mpsc::UnboundedSender<OperatorIntent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(rx),
                mode,
            },
            tx,
        )
    }

    /// Unattended operator that answers with `intents` in order, then quits.
    pub fn scripted(intents: impl IntoIterator<Item = OperatorIntent>) -> Self {
        let (operator, tx) = Self::new(WaitMode::Block);
        for intent in intents {
            // The receiver is alive in `operator`, so sending cannot fail.
            let _ = tx.send(intent);
        }
        operator
    }

    /// Waiting behaviour
    pub fn mode(&self) -> WaitMode {
        self.mode
    }
}

#[async_trait]
impl OperatorInput for ChannelOperator {
    async fn next_intent(&self, record: &RunRecord) -> AppResult<OperatorIntent> {
        let mut rx = self.rx.lock().await;
        let intent = match self.mode {
            WaitMode::Block => rx.recv().await.unwrap_or(OperatorIntent::Quit),
            WaitMode::Poll => match rx.try_recv() {
                Ok(intent) => intent,
                Err(mpsc::error::TryRecvError::Empty) => OperatorIntent::Repeat,
                Err(mpsc::error::TryRecvError::Disconnected) => OperatorIntent::Quit,
            },
        };
        debug!(run = %record.run_name, %intent, "Operator intent");
        Ok(intent)
    }
}
