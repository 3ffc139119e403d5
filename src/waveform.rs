//! Acquired waveform traces and their on-disk text format.

use crate::error::ScopeError;
use chrono::{DateTime, Local};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const TIME_HEADER: &str = "Time (s)";
pub const VOLTAGE_HEADER: &str = "Voltage (V)";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: f64,
    pub voltage: f64,
}

/// One channel's samples, times relative to the first sample.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WaveformTrace {
    pub channel: u8,
    pub samples: Vec<Sample>,
}

impl WaveformTrace {
    pub fn new(channel: u8, samples: Vec<Sample>) -> Self {
        Self { channel, samples }
    }

    /// Build a trace from voltages taken at a fixed sample rate.
    pub fn from_voltages(channel: u8, voltages: &[f64], sample_rate: f64) -> Self {
        let samples = voltages
            .iter()
            .enumerate()
            .map(|(i, &voltage)| Sample {
                time: i as f64 / sample_rate,
                voltage,
            })
            .collect();
        Self { channel, samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.time).collect()
    }

    pub fn voltages(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.voltage).collect()
    }

    /// Spacing of the first two samples, if there are two.
    pub fn sample_interval(&self) -> Option<f64> {
        match self.samples.as_slice() {
            [a, b, ..] => Some(b.time - a.time),
            _ => None,
        }
    }

    pub fn duration(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }

    pub fn min(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.voltage).reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.voltage).reduce(f64::max)
    }

    /// Write the trace as comma-delimited text with a `Time (s),Voltage (V)` header.
    ///
    /// Values use the shortest representation that reads back to the same
    /// `f64`, so a save/load cycle is exact.
    pub fn save_csv(&self, path: &Path) -> Result<(), ScopeError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ScopeError::file(e, parent))?;
        }

        let file = fs::File::create(path).map_err(|e| ScopeError::file(e, path))?;
        let mut writer = csv::Writer::from_writer(file);
        let io_err = |e: csv::Error| ScopeError::file(std::io::Error::other(e.to_string()), path);

        writer.write_record([TIME_HEADER, VOLTAGE_HEADER]).map_err(io_err)?;
        for sample in &self.samples {
            writer
                .write_record([sample.time.to_string(), sample.voltage.to_string()])
                .map_err(io_err)?;
        }
        writer.flush().map_err(|e| ScopeError::file(e, path))?;

        info!("Saved {} samples to {}", self.samples.len(), path.display());
        Ok(())
    }

    /// Read a file written by [`save_csv`](Self::save_csv).
    ///
    /// The channel is not stored in the file and is set to 0.
    pub fn load_csv(path: &Path) -> Result<Self, ScopeError> {
        let file = fs::File::open(path).map_err(|e| ScopeError::file(e, path))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers = reader.headers()?;
        if headers.len() < 2 || &headers[0] != TIME_HEADER || &headers[1] != VOLTAGE_HEADER {
            return Err(ScopeError::Data(format!(
                "{} does not start with '{TIME_HEADER},{VOLTAGE_HEADER}'",
                path.display()
            )));
        }

        let mut samples = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let field = |i: usize| -> Result<f64, ScopeError> {
                record
                    .get(i)
                    .and_then(|s| s.parse::<f64>().ok())
                    .ok_or_else(|| {
                        ScopeError::Data(format!(
                            "{} row {}: column {} is not a number",
                            path.display(),
                            row + 2,
                            i + 1
                        ))
                    })
            };
            samples.push(Sample {
                time: field(0)?,
                voltage: field(1)?,
            });
        }

        debug!("Loaded {} samples from {}", samples.len(), path.display());
        Ok(Self {
            channel: 0,
            samples,
        })
    }
}

/// File name for a new capture: a local timestamp, or the user's name with
/// `.csv` appended when it lacks one.
pub fn capture_filename(use_timestamp: bool, custom: &str) -> Result<String, ScopeError> {
    if use_timestamp {
        return Ok(timestamp_filename(Local::now()));
    }
    let name = custom.trim();
    if name.is_empty() {
        return Err(ScopeError::Validation(
            "enter a file name or tick the timestamp option".into(),
        ));
    }
    if name.contains(['/', '\\']) {
        return Err(ScopeError::Validation(format!(
            "'{name}' must be a file name, not a path"
        )));
    }
    if name.to_ascii_lowercase().ends_with(".csv") {
        Ok(name.to_string())
    } else {
        Ok(format!("{name}.csv"))
    }
}

pub fn timestamp_filename(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S.csv").to_string()
}
