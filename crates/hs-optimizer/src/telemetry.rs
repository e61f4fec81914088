//! Per-observation reporting: a telemetry sink seam and the on-disk
//! observation log.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, Writer, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;

use hs_types::{HsResult, Suggestion};

use crate::trial::{BestRecord, TrialRecord};

/// Metrics emitted once per observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialMetrics {
    pub runtime: f64,
    pub average_runtime: f64,
    pub best_score: f64,
    pub score: f64,
}

/// Receives metrics from the observer thread.
pub trait TelemetrySink: Send {
    fn log(&mut self, step: usize, metrics: &TrialMetrics);
}

/// Emits metrics as structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn log(&mut self, step: usize, metrics: &TrialMetrics) {
        info!(
            target: "hypersweep::telemetry",
            step,
            runtime = metrics.runtime,
            average_runtime = metrics.average_runtime,
            best_score = metrics.best_score,
            score = metrics.score,
            "trial observed"
        );
    }
}

#[derive(Debug, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn log(&mut self, _step: usize, _metrics: &TrialMetrics) {}
}

/// Keeps the running average of trial runtimes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeAverage {
    count: usize,
    total: f64,
}

impl RuntimeAverage {
    pub fn push(&mut self, runtime: f64) -> f64 {
        self.count += 1;
        self.total += runtime;
        self.average()
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

const HEADER: [&str; 5] = ["label", "suggestion", "score", "best_suggestion", "best_score"];

/// Append-only tab-separated log with one row per observation.
pub struct ObservationLog {
    path: PathBuf,
    writer: Writer<File>,
}

impl ObservationLog {
    /// Open `path` for appending, writing the header if the file is new.
    pub fn open<P: AsRef<Path>>(path: P) -> HsResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quote_style(QuoteStyle::Never)
            .from_writer(file);
        if is_new {
            writer.write_record(HEADER).map_err(csv_error)?;
            writer.flush()?;
        }
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &TrialRecord, best: Option<&BestRecord>) -> HsResult<()> {
        let score = record.score.map(|s| s.to_string()).unwrap_or_default();
        let (best_suggestion, best_score) = match best {
            Some(best) => (sorted_json(&best.suggestion)?, best.score.to_string()),
            None => (String::new(), String::new()),
        };
        self.writer
            .write_record([
                record.label.as_str(),
                sorted_json(&record.suggestion)?.as_str(),
                score.as_str(),
                best_suggestion.as_str(),
                best_score.as_str(),
            ])
            .map_err(csv_error)?;
        self.writer.flush()?;
        Ok(())
    }
}

fn sorted_json(suggestion: &Suggestion) -> HsResult<String> {
    let ordered: BTreeMap<&String, &f64> = suggestion.iter().collect();
    Ok(serde_json::to_string(&ordered)?)
}

fn csv_error(e: csv::Error) -> hs_types::HsError {
    hs_types::internal_error!("failed to write observation log: {e}")
}
