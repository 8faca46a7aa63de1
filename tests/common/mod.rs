//! Recording and fault-injecting collaborators shared by the session tests.
//!
//! Every collaborator call is appended to one journal (`"sync.open"`,
//! `"sensor.acquire"`, ...), so tests can assert the exact protocol order.
//! Any call can be made to fail, or panic, on its n-th invocation.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use sweep_daq::config::{RunParameters, TimingConfig};
use sweep_daq::error::{AppResult, DaqError};
use sweep_daq::hardware::{DynamicDevices, Instruments, Sensor, StaticDevices, Synchroniser};
use sweep_daq::measurement::{
    AggregationBuffer, BufferSnapshot, RunMetadata, RunRecord, Sample, SampleShape,
};
use sweep_daq::presentation::{PresentationEvent, Presenter};
use sweep_daq::session::{MeasurementSession, OperatorInput, OperatorIntent};
use sweep_daq::storage::RunStore;

// =============================================================================
// Journal
// =============================================================================

#[derive(Default)]
struct Injection {
    fail_on: HashMap<String, usize>,
    panic_on: HashMap<String, usize>,
}

/// Shared call journal with fault injection.
#[derive(Default)]
pub struct Journal {
    calls: Mutex<Vec<String>>,
    injection: Mutex<Injection>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the `nth` (1-based) call to `name` return an error.
    pub fn fail_on(&self, name: &str, nth: usize) {
        self.injection
            .lock()
            .unwrap()
            .fail_on
            .insert(name.to_string(), nth);
    }

    /// Make the `nth` (1-based) call to `name` panic.
    pub fn panic_on(&self, name: &str, nth: usize) {
        self.injection
            .lock()
            .unwrap()
            .panic_on
            .insert(name.to_string(), nth);
    }

    /// Record a call and apply any injected fault.
    pub fn call(&self, name: &str) -> Result<()> {
        let nth = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(name.to_string());
            calls.iter().filter(|c| c.as_str() == name).count()
        };
        let (fail, panic) = {
            let injection = self.injection.lock().unwrap();
            (
                injection.fail_on.get(name) == Some(&nth),
                injection.panic_on.get(name) == Some(&nth),
            )
        };
        if panic {
            panic!("injected panic in {name}");
        }
        if fail {
            bail!("injected fault in {name}");
        }
        Ok(())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == name)
            .count()
    }

    /// Calls whose name starts with one of `prefixes`, in order.
    pub fn filtered(&self, prefixes: &[&str]) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| prefixes.iter().any(|p| c.starts_with(p)))
            .collect()
    }
}

// =============================================================================
// Instruments
// =============================================================================

pub struct RecordingSynchroniser {
    journal: Arc<Journal>,
    running: AtomicBool,
}

#[async_trait]
impl Synchroniser for RecordingSynchroniser {
    async fn open(&self) -> Result<()> {
        self.journal.call("sync.open")
    }

    async fn stop(&self) -> Result<()> {
        self.journal.call("sync.stop")?;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn load_sequence(&self) -> Result<()> {
        self.journal.call("sync.load_sequence")
    }

    async fn run(&self) -> Result<()> {
        self.journal.call("sync.run")?;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.journal.call("sync.close")
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Returns scripted scalar values first, then 100, 101, 102, ...
pub struct ScriptedSensor {
    journal: Arc<Journal>,
    shape: SampleShape,
    values: Mutex<VecDeque<f64>>,
    next_default: Mutex<f64>,
}

impl ScriptedSensor {
    pub fn script(&self, values: impl IntoIterator<Item = f64>) {
        self.values.lock().unwrap().extend(values);
    }
}

#[async_trait]
impl Sensor for ScriptedSensor {
    fn output_shape(&self) -> SampleShape {
        self.shape.clone()
    }

    async fn open(&self) -> Result<()> {
        self.journal.call("sensor.open")
    }

    async fn acquire_data(&self, synchroniser: &dyn Synchroniser) -> Result<Sample> {
        self.journal.call("sensor.acquire")?;
        if !synchroniser.is_running() {
            bail!("synchroniser not running");
        }
        let scripted = self.values.lock().unwrap().pop_front();
        let value = match scripted {
            Some(value) => value,
            None => {
                let mut next = self.next_default.lock().unwrap();
                let value = *next;
                *next += 1.0;
                value
            }
        };
        Ok(ArrayD::from_elem(IxDyn(&self.shape.sample_shape()), value))
    }

    async fn close(&self) -> Result<()> {
        self.journal.call("sensor.close")
    }
}

pub struct RecordingStaticDevices {
    journal: Arc<Journal>,
}

#[async_trait]
impl StaticDevices for RecordingStaticDevices {
    async fn set_all_params(&self) -> Result<()> {
        self.journal.call("static.set_all_params")
    }
}

pub struct RecordingDynamicDevices {
    journal: Arc<Journal>,
    position: Mutex<usize>,
}

impl RecordingDynamicDevices {
    pub fn position(&self) -> usize {
        *self.position.lock().unwrap()
    }
}

#[async_trait]
impl DynamicDevices for RecordingDynamicDevices {
    async fn advance_step(&self) -> Result<()> {
        self.journal.call("dynamic.advance")?;
        *self.position.lock().unwrap() += 1;
        Ok(())
    }

    async fn reset_step(&self) -> Result<()> {
        self.journal.call("dynamic.reset")?;
        *self.position.lock().unwrap() = 0;
        Ok(())
    }
}

// =============================================================================
// Session collaborators
// =============================================================================

#[derive(Default)]
struct Saved {
    buffers: Vec<(String, BufferSnapshot)>,
    metadata: Vec<(String, RunMetadata)>,
}

pub struct RecordingStore {
    journal: Arc<Journal>,
    saved: Mutex<Saved>,
}

impl RecordingStore {
    pub fn buffers(&self) -> Vec<(String, BufferSnapshot)> {
        self.saved.lock().unwrap().buffers.clone()
    }

    pub fn metadata(&self) -> Vec<(String, RunMetadata)> {
        self.saved.lock().unwrap().metadata.clone()
    }
}

#[async_trait]
impl RunStore for RecordingStore {
    async fn save_buffer(&self, buffer: &AggregationBuffer, filename: &str) -> Result<PathBuf> {
        self.journal.call("store.save_buffer")?;
        self.saved
            .lock()
            .unwrap()
            .buffers
            .push((filename.to_string(), buffer.snapshot()));
        Ok(PathBuf::from(format!("{filename}.bin")))
    }

    async fn save_metadata(&self, metadata: &RunMetadata, filename: &str) -> Result<PathBuf> {
        self.journal.call("store.save_metadata")?;
        self.saved
            .lock()
            .unwrap()
            .metadata
            .push((filename.to_string(), metadata.clone()));
        Ok(PathBuf::from(format!("{filename}.yaml")))
    }
}

pub struct RecordingPresenter {
    journal: Arc<Journal>,
    events: Mutex<Vec<PresentationEvent>>,
}

impl RecordingPresenter {
    pub fn events(&self) -> Vec<PresentationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn present(&self, event: &PresentationEvent) -> Result<()> {
        self.journal.call("presenter.present")?;
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Answers with scripted intents, then quits.
pub struct ScriptedOperator {
    journal: Arc<Journal>,
    intents: Mutex<VecDeque<OperatorIntent>>,
}

#[async_trait]
impl OperatorInput for ScriptedOperator {
    async fn next_intent(&self, _record: &RunRecord) -> AppResult<OperatorIntent> {
        self.journal
            .call("operator.next_intent")
            .map_err(|e| DaqError::Operator(e.to_string()))?;
        Ok(self
            .intents
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OperatorIntent::Quit))
    }
}

// =============================================================================
// Rig
// =============================================================================

/// A full recording stack around one journal.
pub struct Rig {
    pub journal: Arc<Journal>,
    pub synchroniser: Arc<RecordingSynchroniser>,
    pub sensor: Arc<ScriptedSensor>,
    pub static_devices: Arc<RecordingStaticDevices>,
    pub dynamic_devices: Arc<RecordingDynamicDevices>,
    pub store: Arc<RecordingStore>,
    pub presenter: Arc<RecordingPresenter>,
}

impl Rig {
    pub fn new(shape: SampleShape) -> Self {
        let journal = Journal::new();
        Self {
            synchroniser: Arc::new(RecordingSynchroniser {
                journal: journal.clone(),
                running: AtomicBool::new(false),
            }),
            sensor: Arc::new(ScriptedSensor {
                journal: journal.clone(),
                shape,
                values: Mutex::new(VecDeque::new()),
                next_default: Mutex::new(100.0),
            }),
            static_devices: Arc::new(RecordingStaticDevices {
                journal: journal.clone(),
            }),
            dynamic_devices: Arc::new(RecordingDynamicDevices {
                journal: journal.clone(),
                position: Mutex::new(0),
            }),
            store: Arc::new(RecordingStore {
                journal: journal.clone(),
                saved: Mutex::new(Saved::default()),
            }),
            presenter: Arc::new(RecordingPresenter {
                journal: journal.clone(),
                events: Mutex::new(Vec::new()),
            }),
            journal,
        }
    }

    /// Single-channel scalar sensor
    pub fn scalar() -> Self {
        Self::new(SampleShape::scalar(1))
    }

    pub fn instruments(&self) -> Instruments {
        Instruments {
            static_devices: self.static_devices.clone(),
            dynamic_devices: self.dynamic_devices.clone(),
            sensor: self.sensor.clone(),
            synchroniser: self.synchroniser.clone(),
        }
    }

    pub fn operator(
        &self,
        intents: impl IntoIterator<Item = OperatorIntent>,
    ) -> Arc<ScriptedOperator> {
        Arc::new(ScriptedOperator {
            journal: self.journal.clone(),
            intents: Mutex::new(intents.into_iter().collect()),
        })
    }

    /// Session over this rig with the recording presenter, store and a scripted operator.
    pub fn session(
        &self,
        params: RunParameters,
        intents: impl IntoIterator<Item = OperatorIntent>,
    ) -> MeasurementSession {
        MeasurementSession::builder(params, self.instruments())
            .presenter(self.presenter.clone())
            .store(self.store.clone())
            .operator(self.operator(intents))
            .build()
            .expect("valid test parameters")
    }
}

/// Parameters with every protocol delay set to zero.
pub fn params(steps: usize, averages: usize) -> RunParameters {
    RunParameters::new("odmr", steps, averages).with_timing(TimingConfig::immediate())
}
