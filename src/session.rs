//! Measurement sessions: the run cycle controller and its entry points.
//!
//! A session owns the instrument stack from `acquire` to `release` and runs
//! measurement cycles until the operator quits or a fault occurs:
//!
//! ```text
//! acquire hardware
//! loop {
//!     allocate buffer → sweep (advance, acquire × R) × S → stamp record
//!     → present → ask operator → persist if asked → reset sweep
//!     quit? break : rearm synchroniser, settle
//! }
//! release hardware            (every exit path, exactly once)
//! ```
//!
//! ## Terminal status
//!
//! - [`SessionStatus::Failed`]: any fault during acquire, a cycle or release.
//! - [`SessionStatus::Success`]: clean exit with at least one persisted run.
//! - [`SessionStatus::AllFail`]: clean exit without persisting anything.
//!
//! A release failure can turn a clean session into `Failed`; nothing turns a
//! `Failed` session back into a clean one.
//!
//! ## Example
//!
//! ```rust,ignore
//! let report = MeasurementSession::builder(params, instruments)
//!     .strategy(Arc::new(StepMeans))
//!     .store(Arc::new(FileStore::new("data")))
//!     .operator(Arc::new(StdinOperator::new()))
//!     .build()?
//!     .run()
//!     .await;
//! println!("{}: {} runs saved", report.status, report.saved_runs.len());
//! ```

pub mod operator;
pub mod state;

pub use operator::{
    parse_intent, ChannelOperator, OperatorInput, OperatorIntent, StdinOperator, WaitMode,
};
pub use state::CycleState;

use crate::config::RunParameters;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::Instruments;
use crate::hardware::lifecycle::{settle, HardwareLifecycle};
use crate::measurement::averager::AcquisitionAverager;
use crate::measurement::buffer::AggregationBuffer;
use crate::measurement::record::{RunMetadata, RunRecord, RunStatus};
use crate::measurement::sweep::SweepDriver;
use crate::presentation::{
    ChannelTraces, DerivedQuantities, PresentationEvent, Presenter, TracingPresenter,
};
use crate::storage::{FileStore, RunStore};
use chrono::Local;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Ended cleanly with at least one run saved
    Success,
    /// Ended by a fault
    Failed,
    /// Ended cleanly without saving any run
    AllFail,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Success => write!(f, "success"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::AllFail => write!(f, "all_fail"),
        }
    }
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    /// Unique id of this session, also present in its log span
    pub session_id: Uuid,
    /// Terminal status
    pub status: SessionStatus,
    /// Cycles that ran through to the operator's decision
    pub cycles_completed: usize,
    /// Buffer files written, in cycle order
    pub saved_runs: Vec<PathBuf>,
    /// Records of every started cycle, including a failed last one
    pub runs: Vec<RunRecord>,
    /// Rendered fault, if the session failed
    pub error: Option<String>,
    /// State the session was in when the fault occurred
    pub fault_state: Option<CycleState>,
}

/// Builder for [`MeasurementSession`].
pub struct MeasurementSessionBuilder {
    params: RunParameters,
    instruments: Instruments,
    presenter: Option<Arc<dyn Presenter>>,
    strategy: Option<Arc<dyn DerivedQuantities>>,
    store: Option<Arc<dyn RunStore>>,
    operator: Option<Arc<dyn OperatorInput>>,
}

impl MeasurementSessionBuilder {
    /// Where presentation events go (default: [`TracingPresenter`])
    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// What is plotted (default: [`ChannelTraces`])
    pub fn strategy(mut self, strategy: Arc<dyn DerivedQuantities>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Where saved runs go (default: [`FileStore`] in `./data`)
    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Who decides after each cycle (default: [`StdinOperator`])
    pub fn operator(mut self, operator: Arc<dyn OperatorInput>) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Validate the parameters and create the session.
    ///
    /// No hardware is touched here; invalid parameters fail before `run`.
    pub fn build(self) -> AppResult<MeasurementSession> {
        self.params.validate()?;
        let (state_tx, _) = watch::channel(CycleState::Starting);
        Ok(MeasurementSession {
            id: Uuid::new_v4(),
            params: self.params,
            instruments: self.instruments,
            presenter: self
                .presenter
                .unwrap_or_else(|| Arc::new(TracingPresenter)),
            strategy: self.strategy.unwrap_or_else(|| Arc::new(ChannelTraces)),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(FileStore::new("data"))),
            operator: self
                .operator
                .unwrap_or_else(|| Arc::new(StdinOperator::new())),
            state_tx,
        })
    }
}

/// One measurement session over one instrument stack.
pub struct MeasurementSession {
    id: Uuid,
    params: RunParameters,
    instruments: Instruments,
    presenter: Arc<dyn Presenter>,
    strategy: Arc<dyn DerivedQuantities>,
    store: Arc<dyn RunStore>,
    operator: Arc<dyn OperatorInput>,
    state_tx: watch::Sender<CycleState>,
}

#[derive(Default)]
struct Progress {
    cycles_completed: usize,
    saved_runs: Vec<PathBuf>,
    runs: Vec<RunRecord>,
}

impl MeasurementSession {
    /// Start building a session
    pub fn builder(params: RunParameters, instruments: Instruments) -> MeasurementSessionBuilder {
        MeasurementSessionBuilder {
            params,
            instruments,
            presenter: None,
            strategy: None,
            store: None,
            operator: None,
        }
    }

    /// Session id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Parameters the session runs with
    pub fn params(&self) -> &RunParameters {
        &self.params
    }

    /// Observe cycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<CycleState> {
        self.state_tx.subscribe()
    }

    /// Run cycles until the operator quits or a fault occurs.
    ///
    /// Hardware is released exactly once before this returns, whatever
    /// happened in the loop, including a panic in a collaborator.
    pub async fn run(self) -> SessionReport {
        let span = info_span!(
            "session",
            id = %self.id,
            experiment = %self.params.experiment_type
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> SessionReport {
        info!(
            steps = self.params.dynamic_steps,
            averages = self.params.averages,
            "Starting measurement session"
        );

        let mut lifecycle = HardwareLifecycle::new(
            self.instruments.synchroniser.clone(),
            self.instruments.sensor.clone(),
            self.params.timing.clone(),
        );
        let mut progress = Progress::default();

        let outcome = AssertUnwindSafe(self.cycle_loop(&mut lifecycle, &mut progress))
            .catch_unwind()
            .await;
        let loop_result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(DaqError::Panicked(panic_message(payload.as_ref()))),
        };

        let fault_state = loop_result.as_ref().err().map(|_| *self.state_tx.borrow());
        if let (Err(err), Some(state)) = (&loop_result, fault_state) {
            error!(%state, error = %err, "Measurement cycle aborted");
        }

        let release_result = lifecycle.release().await;
        if let Err(err) = &release_result {
            error!(error = %err, "Hardware release failed");
        }
        self.set_state(CycleState::Terminated);

        let status = if loop_result.is_err() || release_result.is_err() {
            SessionStatus::Failed
        } else if progress.saved_runs.is_empty() {
            SessionStatus::AllFail
        } else {
            SessionStatus::Success
        };

        let error = match (loop_result.err(), release_result.err()) {
            (Some(fault), Some(release)) => Some(format!("{fault}; {release}")),
            (Some(fault), None) => Some(fault.to_string()),
            (None, Some(release)) => Some(release.to_string()),
            (None, None) => None,
        };

        info!(
            %status,
            cycles = progress.cycles_completed,
            saved = progress.saved_runs.len(),
            "Measurement session ended"
        );

        SessionReport {
            session_id: self.id,
            status,
            cycles_completed: progress.cycles_completed,
            saved_runs: progress.saved_runs,
            runs: progress.runs,
            error,
            fault_state,
        }
    }

    async fn cycle_loop(
        &self,
        lifecycle: &mut HardwareLifecycle,
        progress: &mut Progress,
    ) -> AppResult<()> {
        let sample = self.instruments.sensor.output_shape();
        AggregationBuffer::layout(&sample, self.params.dynamic_steps, self.params.averages)
            .map_err(|e| DaqError::Configuration(format!("unusable sensor sample shape: {e}")))?;

        self.instruments
            .static_devices
            .set_all_params()
            .await
            .map_err(|e| DaqError::hardware("apply static device parameters", e))?;
        lifecycle.acquire().await?;

        let averager = AcquisitionAverager::new(self.params.averages, self.params.sleep);
        let mut sweep = SweepDriver::new(
            self.instruments.dynamic_devices.clone(),
            self.params.dynamic_steps,
            self.params.timing.step_settle,
        );

        loop {
            let cycle = progress.runs.len();
            let intent = self
                .run_cycle(cycle, lifecycle, &mut sweep, &averager, progress)
                .await?;
            if intent.quits() {
                return Ok(());
            }
        }
    }

    async fn run_cycle(
        &self,
        cycle: usize,
        lifecycle: &HardwareLifecycle,
        sweep: &mut SweepDriver,
        averager: &AcquisitionAverager,
        progress: &mut Progress,
    ) -> AppResult<OperatorIntent> {
        let mut record = RunRecord::begin(&self.params.experiment_type, cycle, Local::now());
        record.disambiguate(&progress.runs);
        let outcome = AssertUnwindSafe(self.measure_and_decide(
            &mut record,
            sweep,
            averager,
            &mut progress.saved_runs,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(DaqError::Panicked(panic_message(payload.as_ref()))));
        if outcome.is_err() {
            record.status = RunStatus::Failed;
        }
        progress.runs.push(record);

        let intent = match outcome {
            Ok(intent) => intent,
            Err(err) => {
                if let Err(reset_err) = sweep.reset().await {
                    error!(error = %reset_err, "Sweep reset after fault failed");
                }
                return Err(err);
            }
        };
        progress.cycles_completed += 1;

        self.set_state(CycleState::Resetting);
        sweep.reset().await?;
        if !intent.quits() {
            lifecycle.rearm().await?;
            settle(self.params.timing.rearm_delay).await;
        }
        Ok(intent)
    }

    /// Starting through Persisting for one cycle. The buffer lives only here.
    async fn measure_and_decide(
        &self,
        record: &mut RunRecord,
        sweep: &mut SweepDriver,
        averager: &AcquisitionAverager,
        saved_runs: &mut Vec<PathBuf>,
    ) -> AppResult<OperatorIntent> {
        self.set_state(CycleState::Starting);
        let mut buffer = AggregationBuffer::allocate(
            self.instruments.sensor.output_shape(),
            sweep.step_count(),
            averager.repetitions(),
        )?;
        info!(run = %record.run_name, cycle = record.cycle, shape = ?buffer.shape(), "Cycle started");

        self.set_state(CycleState::Sweeping);
        sweep
            .run(
                averager,
                self.instruments.sensor.as_ref(),
                self.instruments.synchroniser.as_ref(),
                &mut buffer,
            )
            .await?;

        self.set_state(CycleState::Stamping);
        record.stamp();

        self.set_state(CycleState::Presenting);
        let event = PresentationEvent::build(self.strategy.as_ref(), &buffer, &self.params, record);
        if let Err(e) = self.presenter.present(&event).await {
            warn!(run = %record.run_name, error = %format!("{e:#}"), "Presentation failed");
        }

        self.set_state(CycleState::AwaitingOperator);
        let intent = self.operator.next_intent(record).await?;
        info!(run = %record.run_name, %intent, "Operator decision");

        if intent.saves() {
            self.set_state(CycleState::Persisting);
            let path = self.persist(&buffer, record).await?;
            record.status = RunStatus::Saved;
            saved_runs.push(path);
        } else {
            record.status = RunStatus::Discarded;
        }
        Ok(intent)
    }

    async fn persist(&self, buffer: &AggregationBuffer, record: &RunRecord) -> AppResult<PathBuf> {
        let filename = record
            .filename
            .clone()
            .unwrap_or_else(|| record.run_name.clone());
        let metadata = RunMetadata {
            params: self.params.clone(),
            record: RunRecord {
                status: RunStatus::Saved,
                ..record.clone()
            },
        };

        let path = self
            .store
            .save_buffer(buffer, &filename)
            .await
            .map_err(|e| DaqError::persistence(&filename, e))?;
        self.store
            .save_metadata(&metadata, &filename)
            .await
            .map_err(|e| DaqError::persistence(&filename, e))?;
        Ok(path)
    }

    fn set_state(&self, state: CycleState) {
        debug!(%state, "Cycle state");
        self.state_tx.send_replace(state);
    }
}

/// Run one session and return only its terminal status.
///
/// Uses the default presenter and strategy. Invalid parameters yield
/// [`SessionStatus::Failed`] without touching any hardware.
pub async fn run_measurement(
    instruments: Instruments,
    params: RunParameters,
    operator: Arc<dyn OperatorInput>,
    store: Arc<dyn RunStore>,
) -> SessionStatus {
    match MeasurementSession::builder(params, instruments)
        .operator(operator)
        .store(store)
        .build()
    {
        Ok(session) => session.run().await.status,
        Err(err) => {
            error!(error = %err, "Session rejected before touching hardware");
            SessionStatus::Failed
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
