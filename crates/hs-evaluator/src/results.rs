//! Tab-separated result logs written by the evaluator.

use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use tracing::debug;

use hs_types::EvaluationError;

/// Type markers the table writer prefixes onto column names.
const TYPE_MARKERS: &[char] = &['#', '|', '$', '%', '^'];

fn bare_name(column: &str) -> &str {
    column.trim().trim_start_matches(TYPE_MARKERS)
}

/// A parsed result log: header plus data rows.
#[derive(Debug, Clone)]
pub struct ResultLog {
    path: PathBuf,
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl ResultLog {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, EvaluationError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(EvaluationError::LogMissing { path });
        }

        let unparseable = |e: csv::Error, path: &Path| EvaluationError::Unparseable {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_path(&path)
            .map_err(|e| unparseable(e, &path))?;
        let headers = rdr.headers().map_err(|e| unparseable(e, &path))?.clone();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| unparseable(e, &path))?;
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            rows.push(record);
        }
        if rows.is_empty() {
            return Err(EvaluationError::EmptyLog { path });
        }
        debug!(path = %path.display(), rows = rows.len(), "read result log");

        Ok(Self { path, headers, rows })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of `column`, matching with or without its type marker.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim() == column)
            .or_else(|| {
                let wanted = bare_name(column);
                self.headers.iter().position(|h| bare_name(h) == wanted)
            })
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    /// Every row's value of `column`, in row order.
    pub fn column(&self, column: &str) -> Result<Vec<f64>, EvaluationError> {
        let index = self
            .column_index(column)
            .ok_or_else(|| EvaluationError::ColumnMissing {
                column: column.to_string(),
                path: self.path.clone(),
            })?;

        self.rows
            .iter()
            .enumerate()
            .map(|(row, record)| {
                let cell = record.get(index).unwrap_or("").trim();
                cell.parse::<f64>()
                    .map_err(|_| EvaluationError::Unparseable {
                        path: self.path.clone(),
                        message: format!("row {}: {column} is {cell:?}, not a number", row + 1),
                    })
            })
            .collect()
    }
}
