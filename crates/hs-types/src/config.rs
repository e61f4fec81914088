//! Run configuration: one immutable value handed to the scheduler and its
//! collaborators at construction.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::document::DocumentLayout;
use crate::errors::HsResult;
use crate::trial::ObjectiveDirection;
use crate::config_error;

/// How multiple result-log rows collapse into one score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Use the final row only.
    Last,
    /// Arithmetic mean over all rows.
    Mean,
}

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Application name; prefixes every result log file.
    pub project_name: String,
    /// Location of the executable's sources, relative to the working dir.
    pub project_path: String,
    /// Program plus leading arguments used to launch the evaluator. Empty
    /// means `go run ./mechs/<project_path>`.
    pub evaluator_command: Vec<String>,
    /// Extra arguments appended to every evaluator invocation.
    pub extra_args: Vec<String>,
    /// Working directory the evaluator runs in.
    pub work_dir: PathBuf,
    /// Where the evaluator writes its result logs (relative to `work_dir`).
    pub log_dir: PathBuf,
    /// Where trial parameter files and the observation log go.
    pub artifacts_dir: PathBuf,

    /// Result-log column to optimize.
    pub variable_to_optimize: String,
    /// Column consulted when the objective holds the sentinel.
    pub fallback_variable: Option<String>,
    /// Raw objective value meaning "target not reached".
    pub sentinel: f64,
    pub penalty_factor: f64,
    /// Overrides the default reduction (mean when `num_runs > 1`).
    pub reduction: Option<Reduction>,

    pub num_epochs: usize,
    pub num_runs: usize,
    pub num_trials: usize,
    pub num_parallel: usize,
    pub minimize: bool,
    /// Ask the evaluator to reseed every run.
    pub randomize: bool,

    /// Trial labels are `<prefix>_<slot>`.
    pub label_prefix: String,
    pub params_layout: DocumentLayout,
    /// Emit per-trial telemetry events.
    pub telemetry: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            project_name: "RA25".to_string(),
            project_path: "ra25".to_string(),
            evaluator_command: Vec::new(),
            extra_args: Vec::new(),
            work_dir: PathBuf::from("."),
            log_dir: PathBuf::from("logs"),
            artifacts_dir: PathBuf::from("."),
            variable_to_optimize: "|LastZero".to_string(),
            fallback_variable: Some("|FirstZero".to_string()),
            sentinel: -1.0,
            penalty_factor: 2.0,
            reduction: None,
            num_epochs: 150,
            num_runs: 1,
            num_trials: 1000,
            num_parallel: 8,
            minimize: true,
            randomize: false,
            label_prefix: "Searching".to_string(),
            params_layout: DocumentLayout::Object,
            telemetry: true,
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "project_name",
    "project_path",
    "evaluator_command",
    "extra_args",
    "work_dir",
    "log_dir",
    "artifacts_dir",
    "variable_to_optimize",
    "fallback_variable",
    "sentinel",
    "penalty_factor",
    "reduction",
    "num_epochs",
    "num_runs",
    "num_trials",
    "num_parallel",
    "minimize",
    "randomize",
    "label_prefix",
    "params_layout",
    "telemetry",
];

impl RunConfig {
    pub fn new(project_name: &str, variable_to_optimize: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            project_path: project_name.to_lowercase(),
            variable_to_optimize: variable_to_optimize.to_string(),
            ..Self::default()
        }
    }

    /// Parse YAML, ignoring (with a warning) keys this version doesn't know.
    pub fn from_yaml_str(raw: &str) -> HsResult<Self> {
        let mut mapping: serde_yaml::Mapping = serde_yaml::from_str(raw)?;
        let unknown: Vec<serde_yaml::Value> = mapping
            .keys()
            .filter(|k| !k.as_str().is_some_and(|k| KNOWN_KEYS.contains(&k)))
            .cloned()
            .collect();
        for key in unknown {
            warn!(key = ?key, "ignoring unknown configuration key");
            mapping.remove(&key);
        }
        let config: Self = serde_yaml::from_value(serde_yaml::Value::Mapping(mapping))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> HsResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> HsResult<()> {
        for (name, value) in [
            ("num_epochs", self.num_epochs),
            ("num_runs", self.num_runs),
            ("num_trials", self.num_trials),
            ("num_parallel", self.num_parallel),
        ] {
            if value == 0 {
                return Err(config_error!("{name} must be greater than zero"));
            }
        }
        if !(self.penalty_factor.is_finite() && self.penalty_factor > 0.0) {
            return Err(config_error!(
                "penalty_factor must be a positive number, got {}",
                self.penalty_factor
            ));
        }
        if !self.sentinel.is_finite() {
            return Err(config_error!("sentinel must be finite"));
        }
        if self.variable_to_optimize.trim().is_empty() {
            return Err(config_error!("variable_to_optimize must not be empty"));
        }
        if self.project_name.trim().is_empty() {
            return Err(config_error!("project_name must not be empty"));
        }
        Ok(())
    }

    pub fn direction(&self) -> ObjectiveDirection {
        ObjectiveDirection::from_minimize(self.minimize)
    }

    pub fn effective_reduction(&self) -> Reduction {
        self.reduction.unwrap_or(if self.num_runs > 1 {
            Reduction::Mean
        } else {
            Reduction::Last
        })
    }

    /// Result log of one trial, relative to the evaluator's working dir.
    pub fn result_log_path(&self, label: &str) -> PathBuf {
        self.work_dir
            .join(&self.log_dir)
            .join(format!("{}_{}_run.tsv", self.project_name, label))
    }

    pub fn evaluator_program(&self) -> Vec<String> {
        if self.evaluator_command.is_empty() {
            vec![
                "go".to_string(),
                "run".to_string(),
                format!("./mechs/{}", self.project_path),
            ]
        } else {
            self.evaluator_command.clone()
        }
    }

    pub fn with_trials(mut self, num_trials: usize, num_parallel: usize) -> Self {
        self.num_trials = num_trials;
        self.num_parallel = num_parallel;
        self
    }

    pub fn with_schedule(mut self, num_epochs: usize, num_runs: usize) -> Self {
        self.num_epochs = num_epochs;
        self.num_runs = num_runs;
        self
    }

    pub fn with_fallback(
        mut self,
        column: Option<&str>,
        sentinel: f64,
        penalty_factor: f64,
    ) -> Self {
        self.fallback_variable = column.map(str::to_string);
        self.sentinel = sentinel;
        self.penalty_factor = penalty_factor;
        self
    }

    pub fn with_evaluator_command(mut self, command: Vec<String>) -> Self {
        self.evaluator_command = command;
        self
    }

    pub fn with_dirs(
        mut self,
        work_dir: impl Into<PathBuf>,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        self.work_dir = work_dir.into();
        self.artifacts_dir = artifacts_dir.into();
        self
    }
}
