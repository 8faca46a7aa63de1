//! Durable storage for saved runs.
//!
//! A saved run is two files sharing one base filename: the buffer snapshot
//! (`.bin` with bincode, or `.json`) and the run metadata (`.yaml`). With the
//! `storage_csv` feature the buffer can also be exported in long format
//! (`.csv`, one row per value) for spreadsheet tools.
//!
//! Files are never overwritten: an existing file at the target path is an
//! error, so a clock collision between two runs cannot destroy earlier data.

use crate::config::{BufferFormat, StorageConfig};
use crate::measurement::buffer::{AggregationBuffer, BufferSnapshot};
use crate::measurement::record::RunMetadata;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Persistence collaborator of a measurement session.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Write the buffer under `filename`; returns where it was written.
    async fn save_buffer(&self, buffer: &AggregationBuffer, filename: &str) -> Result<PathBuf>;

    /// Write the run metadata under `filename`; returns where it was written.
    async fn save_metadata(&self, metadata: &RunMetadata, filename: &str) -> Result<PathBuf>;
}

/// Writes runs into a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    output_dir: PathBuf,
    format: BufferFormat,
    csv_export: bool,
}

impl FileStore {
    /// Bincode buffers in `output_dir`, no CSV export
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            format: BufferFormat::Bincode,
            csv_export: false,
        }
    }

    /// Store configured from the `[storage]` section
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            format: config.format,
            csv_export: config.csv_export,
        }
    }

    /// Set the buffer encoding
    pub fn with_format(mut self, format: BufferFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable the long-format CSV export
    pub fn with_csv_export(mut self, enabled: bool) -> Self {
        self.csv_export = enabled;
        self
    }

    /// Target directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the buffer file for `filename`
    pub fn buffer_path(&self, filename: &str) -> PathBuf {
        let extension = match self.format {
            BufferFormat::Bincode => "bin",
            BufferFormat::Json => "json",
        };
        self.output_dir.join(format!("{filename}.{extension}"))
    }

    /// Path of the metadata file for `filename`
    pub fn metadata_path(&self, filename: &str) -> PathBuf {
        self.output_dir.join(format!("{filename}.yaml"))
    }

    fn create(&self, path: &Path) -> Result<BufWriter<File>> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("creating output directory {}", self.output_dir.display())
        })?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .with_context(|| format!("creating {}", path.display()))?;
        Ok(BufWriter::new(file))
    }

    #[cfg(feature = "storage_csv")]
    fn export_csv(&self, buffer: &AggregationBuffer, filename: &str) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("{filename}.csv"));
        let mut writer = csv::Writer::from_writer(self.create(&path)?);
        writer.write_record(["channel", "step", "repetition", "point", "value"])?;

        let dims = &buffer.sample_shape().dims;
        for (index, value) in buffer.data().indexed_iter() {
            let point = dims
                .iter()
                .enumerate()
                .fold(0usize, |acc, (axis, len)| acc * len + index[3 + axis]);
            writer.write_record(&[
                index[0].to_string(),
                index[1].to_string(),
                index[2].to_string(),
                point.to_string(),
                value.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(path)
    }

    #[cfg(not(feature = "storage_csv"))]
    fn export_csv(&self, _buffer: &AggregationBuffer, filename: &str) -> Result<PathBuf> {
        bail!("CSV export of '{filename}' requires the storage_csv feature")
    }

    /// Reload a buffer written by [`RunStore::save_buffer`].
    pub fn load_buffer(path: impl AsRef<Path>) -> Result<BufferSnapshot> {
        let path = path.as_ref();
        let reader = BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        );
        let snapshot: BufferSnapshot = match path.extension().and_then(|ext| ext.to_str()) {
            Some("bin") => bincode::deserialize_from(reader)
                .with_context(|| format!("decoding {}", path.display()))?,
            Some("json") => serde_json::from_reader(reader)
                .with_context(|| format!("decoding {}", path.display()))?,
            _ => bail!("unknown buffer file type: {}", path.display()),
        };
        Ok(snapshot)
    }

    /// Reload metadata written by [`RunStore::save_metadata`].
    pub fn load_metadata(path: impl AsRef<Path>) -> Result<RunMetadata> {
        let path = path.as_ref();
        let reader = BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        );
        serde_yaml::from_reader(reader).with_context(|| format!("decoding {}", path.display()))
    }

    /// Buffer file saved next to a metadata file, if one exists
    pub fn buffer_path_for(metadata_path: impl AsRef<Path>) -> Option<PathBuf> {
        ["bin", "json"]
            .iter()
            .map(|ext| metadata_path.as_ref().with_extension(ext))
            .find(|candidate| candidate.exists())
    }
}

#[async_trait]
impl RunStore for FileStore {
    async fn save_buffer(&self, buffer: &AggregationBuffer, filename: &str) -> Result<PathBuf> {
        let path = self.buffer_path(filename);
        let mut writer = self.create(&path)?;
        let snapshot = buffer.snapshot();
        match self.format {
            BufferFormat::Bincode => bincode::serialize_into(&mut writer, &snapshot)?,
            BufferFormat::Json => serde_json::to_writer(&mut writer, &snapshot)?,
        }
        writer.flush()?;
        info!(path = %path.display(), "Buffer saved");

        if self.csv_export {
            match self.export_csv(buffer, filename) {
                Ok(csv) => info!(path = %csv.display(), "CSV export written"),
                Err(e) => warn!(error = %format!("{e:#}"), "CSV export skipped"),
            }
        }
        Ok(path)
    }

    async fn save_metadata(&self, metadata: &RunMetadata, filename: &str) -> Result<PathBuf> {
        let path = self.metadata_path(filename);
        let mut writer = self.create(&path)?;
        serde_yaml::to_writer(&mut writer, metadata)?;
        writer.flush()?;
        info!(path = %path.display(), "Metadata saved");
        Ok(path)
    }
}
