//! # hs-optimizer
//!
//! Parameter search orchestration for HyperSweep.
//!
//! Extracts the tunable search space from a parameter document, injects
//! suggested values into per-trial parameter files, and schedules trials on
//! a worker pool with a single observer feeding scores back to the
//! optimizer.

mod inject;
mod scheduler;
mod search;
mod strategy;
mod telemetry;
mod trial;

pub use inject::{format_value, trial_file_name, TrialParameterInjector};
pub use scheduler::{SchedulerConfig, TrialScheduler};
pub use search::{
    enumerate_tunables, Distribution, ParameterDef, ParameterSpace, SearchSpace, SpaceKind,
    TunableParameter,
};
pub use strategy::{CenteredSearch, Optimizer, SharedOptimizer};
pub use telemetry::{
    NullTelemetry, ObservationLog, RuntimeAverage, TelemetrySink, TracingTelemetry, TrialMetrics,
};
pub use trial::{BestRecord, BestTracker, RunId, RunSummary, TrialRecord, TrialResult};
