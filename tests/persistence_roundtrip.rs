//! Saved runs reload bit-exactly from disk.

mod common;

use common::{params, Rig};
use std::sync::Arc;
use sweep_daq::config::BufferFormat;
use sweep_daq::measurement::{RunStatus, SampleShape};
use sweep_daq::session::{MeasurementSession, OperatorIntent, SessionStatus};
use sweep_daq::storage::FileStore;
use tempfile::TempDir;

async fn save_one_run(dir: &TempDir, format: BufferFormat, values: &[f64]) -> Rig {
    let rig = Rig::new(SampleShape::trace(1, 2));
    rig.sensor.script(values.iter().copied());

    let report = MeasurementSession::builder(params(2, 2), rig.instruments())
        .presenter(rig.presenter.clone())
        .store(Arc::new(FileStore::new(dir.path()).with_format(format)))
        .operator(rig.operator([OperatorIntent::SaveAndQuit]))
        .build()
        .unwrap()
        .run()
        .await;
    assert_eq!(report.status, SessionStatus::Success);
    rig
}

fn only_file_with_extension(dir: &TempDir, extension: &str) -> std::path::PathBuf {
    let mut matches: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .collect();
    assert_eq!(matches.len(), 1, "expected one .{extension} file");
    matches.remove(0)
}

#[tokio::test]
async fn test_bincode_run_reloads_bit_exactly() {
    let dir = TempDir::new().unwrap();
    let values = [0.1, -2.5e-9, f64::MAX, 1.0 / 3.0];
    save_one_run(&dir, BufferFormat::Bincode, &values).await;

    let snapshot = FileStore::load_buffer(only_file_with_extension(&dir, "bin")).unwrap();
    assert_eq!(snapshot.shape, vec![1, 2, 2, 2]);
    assert_eq!(snapshot.axes, vec!["channel", "step", "repetition", "sample_0"]);

    // each acquisition fills both sample points with one scripted value
    let expected: Vec<u64> = values
        .iter()
        .flat_map(|v| [v.to_bits(), v.to_bits()])
        .collect();
    let reloaded: Vec<u64> = snapshot.values.iter().map(|v| v.to_bits()).collect();
    assert_eq!(reloaded, expected);

    let array = snapshot.to_array().unwrap();
    assert_eq!(array.shape(), &[1, 2, 2, 2]);
}

#[tokio::test]
async fn test_metadata_matches_the_saved_run() {
    let dir = TempDir::new().unwrap();
    save_one_run(&dir, BufferFormat::Json, &[1.0, 2.0, 3.0, 4.0]).await;

    let metadata_path = only_file_with_extension(&dir, "yaml");
    let metadata = FileStore::load_metadata(&metadata_path).unwrap();

    assert_eq!(metadata.params, params(2, 2));
    assert_eq!(metadata.record.status, RunStatus::Saved);
    assert_eq!(metadata.record.cycle, 0);
    assert!(metadata.record.run_name.starts_with("odmr_"));
    assert_eq!(
        metadata.record.filename.as_deref(),
        Some(metadata.record.run_name.as_str())
    );
    assert_eq!(
        metadata_path.file_stem().and_then(|s| s.to_str()),
        Some(metadata.record.run_name.as_str())
    );

    let buffer_path = FileStore::buffer_path_for(&metadata_path).unwrap();
    assert_eq!(buffer_path.extension().and_then(|e| e.to_str()), Some("json"));
    let snapshot = FileStore::load_buffer(buffer_path).unwrap();
    assert_eq!(snapshot.values, vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0]);
}

#[tokio::test]
async fn test_existing_run_is_a_persistence_fault() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());
    std::fs::write(store.buffer_path("taken"), b"earlier run").unwrap();

    let buffer = sweep_daq::measurement::AggregationBuffer::allocate(
        SampleShape::scalar(1),
        1,
        1,
    )
    .unwrap();
    let result = sweep_daq::storage::RunStore::save_buffer(&store, &buffer, "taken").await;

    assert!(result.is_err());
    assert_eq!(
        std::fs::read(store.buffer_path("taken")).unwrap(),
        b"earlier run"
    );
}

#[tokio::test]
async fn test_back_to_back_saves_land_in_distinct_files() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::scalar();

    let report = MeasurementSession::builder(params(1, 1), rig.instruments())
        .presenter(rig.presenter.clone())
        .store(Arc::new(FileStore::new(dir.path())))
        .operator(rig.operator([
            OperatorIntent::SaveAndContinue,
            OperatorIntent::SaveAndContinue,
            OperatorIntent::SaveAndQuit,
        ]))
        .build()
        .unwrap()
        .run()
        .await;

    assert_eq!(report.status, SessionStatus::Success);
    assert_eq!(report.saved_runs.len(), 3);
    let names: std::collections::HashSet<_> =
        report.runs.iter().map(|r| r.run_name.as_str()).collect();
    assert_eq!(names.len(), 3);
    assert!(report.saved_runs.iter().all(|path| path.exists()));
}

#[tokio::test]
async fn test_json_buffer_reloads_bit_exactly() {
    use rand::Rng;
    use sweep_daq::measurement::AggregationBuffer;
    use sweep_daq::storage::RunStore;

    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path()).with_format(BufferFormat::Json);
    let mut buffer = AggregationBuffer::allocate(SampleShape::trace(2, 250), 4, 5).unwrap();
    let mut rng = rand::thread_rng();
    for step in 0..4 {
        for rep in 0..5 {
            let sample = ndarray::Array2::from_shape_fn((2, 250), |_| {
                rng.gen_range(-1.0..1.0) * 10f64.powi(rng.gen_range(-12..12))
            });
            buffer.record(step, rep, sample.into_dyn().view()).unwrap();
        }
    }

    let path = store.save_buffer(&buffer, "noisy").await.unwrap();
    let snapshot = FileStore::load_buffer(path).unwrap();

    let written: Vec<u64> = buffer.flattened().iter().map(|v| v.to_bits()).collect();
    let reloaded: Vec<u64> = snapshot.values.iter().map(|v| v.to_bits()).collect();
    assert_eq!(reloaded.len(), 20_000);
    assert_eq!(reloaded, written);
}
