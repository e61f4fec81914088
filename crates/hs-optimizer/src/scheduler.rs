//! The trial scheduler: a fixed pool of workers running
//! suggest → evaluate → enqueue, and one observer feeding results back to
//! the optimizer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use hs_types::{
    internal_error, Evaluator, HsError, HsResult, ObjectiveDirection, RunConfig, TrialRequest,
};

use crate::inject::TrialParameterInjector;
use crate::strategy::{Optimizer, SharedOptimizer};
use crate::telemetry::{
    NullTelemetry, ObservationLog, RuntimeAverage, TelemetrySink, TracingTelemetry, TrialMetrics,
};
use crate::trial::{BestRecord, BestTracker, RunSummary, TrialRecord};

/// The parts of the run configuration the scheduler acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub num_trials: usize,
    pub num_parallel: usize,
    pub label_prefix: String,
    pub direction: ObjectiveDirection,
}

impl SchedulerConfig {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            num_trials: config.num_trials,
            num_parallel: config.num_parallel,
            label_prefix: config.label_prefix.clone(),
            direction: config.direction(),
        }
    }

    pub fn label(&self, index: usize) -> String {
        format!("{}_{}", self.label_prefix, index)
    }

    fn worker_count(&self) -> usize {
        self.num_parallel.min(self.num_trials).max(1)
    }
}

enum WorkerMessage {
    Finished(TrialRecord),
    /// The trial never produced a record; the observer can't reach its count.
    Lost { label: String, error: HsError },
}

/// Runs `num_trials` trials on `num_parallel` worker threads.
///
/// Every optimizer call goes through one [`SharedOptimizer`] lock. Workers
/// never hold it while evaluating. Results are observed in arrival order,
/// which need not match suggestion order.
pub struct TrialScheduler<O, E> {
    config: SchedulerConfig,
    optimizer: SharedOptimizer<O>,
    injector: TrialParameterInjector,
    evaluator: E,
    best: BestTracker,
    telemetry: Box<dyn TelemetrySink>,
    observation_log: Option<ObservationLog>,
}

impl<O: Optimizer, E: Evaluator> TrialScheduler<O, E> {
    pub fn new(
        config: SchedulerConfig,
        optimizer: O,
        injector: TrialParameterInjector,
        evaluator: E,
    ) -> Self {
        let best = BestTracker::new(config.direction);
        Self {
            config,
            optimizer: SharedOptimizer::new(optimizer),
            injector,
            evaluator,
            best,
            telemetry: Box::new(TracingTelemetry),
            observation_log: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Box<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn without_telemetry(self) -> Self {
        self.with_telemetry(Box::new(NullTelemetry))
    }

    pub fn with_observation_log(mut self, log: ObservationLog) -> Self {
        self.observation_log = Some(log);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every trial to completion and return the summary.
    ///
    /// Failed evaluations are observed with the worst score and never abort
    /// the run. A lost trial ends it with [`HsError::Exhaustion`].
    pub fn run(self) -> HsResult<RunSummary> {
        let Self {
            config,
            optimizer,
            injector,
            evaluator,
            best,
            telemetry,
            observation_log,
        } = self;

        if config.num_trials == 0 {
            return Err(internal_error!("scheduler started with zero trials"));
        }

        let workers = config.worker_count();
        info!(
            optimizer = %optimizer.name(),
            trials = config.num_trials,
            workers,
            direction = ?config.direction,
            "starting optimization run"
        );

        let (slot_tx, slot_rx) = bounded::<usize>(config.num_trials);
        for index in 0..config.num_trials {
            slot_tx
                .send(index)
                .map_err(|e| internal_error!("failed to queue trial slot: {e}"))?;
        }
        drop(slot_tx);

        let (result_tx, result_rx) = unbounded::<WorkerMessage>();
        let stopped = AtomicBool::new(false);

        let ctx = WorkerContext {
            config: &config,
            optimizer: &optimizer,
            injector: &injector,
            evaluator: &evaluator,
            best: &best,
            stopped: &stopped,
        };

        let outcome = thread::scope(|scope| {
            let observer = scope.spawn(|| {
                let outcome = observe_loop(
                    &config,
                    &optimizer,
                    &best,
                    result_rx,
                    telemetry,
                    observation_log,
                );
                stopped.store(true, Ordering::SeqCst);
                outcome
            });

            let handles: Vec<_> = (0..workers)
                .map(|worker_id| {
                    let slots = slot_rx.clone();
                    let results = result_tx.clone();
                    let ctx = &ctx;
                    scope.spawn(move || ctx.worker_loop(worker_id, slots, results))
                })
                .collect();
            drop(result_tx);

            for (worker_id, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() {
                    error!(worker_id, "worker thread panicked");
                }
            }
            observer
                .join()
                .unwrap_or_else(|_| Err(internal_error!("observer thread panicked")))
        });

        match outcome {
            Ok(summary) => {
                info!(
                    run_id = %summary.run_id,
                    completed = summary.completed,
                    failed = summary.failed,
                    suggested = optimizer.suggested(),
                    observed = optimizer.observed(),
                    best_label = summary.best.as_ref().map(|b| b.label.as_str()).unwrap_or("-"),
                    best_score = summary.best.as_ref().map(|b| b.score),
                    "optimization run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                let best = best.snapshot();
                error!(
                    error = %e,
                    best_label = best.as_ref().map(|b| b.label.as_str()).unwrap_or("-"),
                    best_score = best.as_ref().map(|b| b.score),
                    best_params = ?best.as_ref().map(|b| &b.suggestion),
                    "optimization run aborted"
                );
                Err(e)
            }
        }
    }
}

struct WorkerContext<'a, O, E> {
    config: &'a SchedulerConfig,
    optimizer: &'a SharedOptimizer<O>,
    injector: &'a TrialParameterInjector,
    evaluator: &'a E,
    best: &'a BestTracker,
    stopped: &'a AtomicBool,
}

impl<O: Optimizer, E: Evaluator> WorkerContext<'_, O, E> {
    fn worker_loop(
        &self,
        worker_id: usize,
        slots: Receiver<usize>,
        results: Sender<WorkerMessage>,
    ) {
        while !self.stopped.load(Ordering::SeqCst) {
            let Ok(index) = slots.recv() else {
                break;
            };
            let label = self.config.label(index);
            let message = match self.run_trial(index, &label) {
                Ok(record) => WorkerMessage::Finished(record),
                Err(error) => {
                    error!(worker_id, label = %label, error = %error, "trial lost");
                    WorkerMessage::Lost { label, error }
                }
            };
            if results.send(message).is_err() {
                debug!(worker_id, "observer stopped");
                break;
            }
        }
        debug!(worker_id, "worker exiting");
    }

    /// Suggest under the optimizer lock, then evaluate without it. An error
    /// here means the trial produced no record at all.
    fn run_trial(&self, index: usize, label: &str) -> HsResult<TrialRecord> {
        let mut record = TrialRecord::new(index, label);
        let suggestion = self.optimizer.suggest()?;
        record.mark_suggested(suggestion)?;
        record.mark_evaluating()?;
        debug!(label, "trial started");

        match self.evaluate(&mut record) {
            Ok(score) => {
                record.mark_awaiting_observation(score)?;
                if self.best.offer(label, &record.suggestion, score) {
                    info!(label, score, "new best");
                }
            }
            Err(e) => {
                if e.is_recoverable() {
                    warn!(label, error = %e, "trial failed");
                } else {
                    error!(label, error = %e, "trial failed");
                }
                record.mark_failed(e.to_string(), self.config.direction.worst_score())?;
            }
        }
        Ok(record)
    }

    fn evaluate(&self, record: &mut TrialRecord) -> HsResult<f64> {
        let params_path = self.injector.write(&record.suggestion, &record.label)?;
        record.params_path = Some(params_path.clone());
        let request = TrialRequest {
            index: record.index,
            label: record.label.clone(),
            params_path,
        };
        let score = self.evaluator.evaluate(&request)?;
        if !score.is_finite() {
            return Err(internal_error!("evaluator returned non-finite score {score}"));
        }
        Ok(score)
    }
}

fn observe_loop<O: Optimizer>(
    config: &SchedulerConfig,
    optimizer: &SharedOptimizer<O>,
    best: &BestTracker,
    results: Receiver<WorkerMessage>,
    mut telemetry: Box<dyn TelemetrySink>,
    mut observation_log: Option<ObservationLog>,
) -> HsResult<RunSummary> {
    let expected = config.num_trials;
    let mut summary = RunSummary::new(optimizer.name(), expected);
    let mut runtimes = RuntimeAverage::default();
    let worst = config.direction.worst_score();

    while summary.observed() < expected {
        let message = results.recv().map_err(|_| HsError::Exhaustion {
            observed: summary.observed(),
            expected,
            lost: None,
        })?;
        let mut record = match message {
            WorkerMessage::Finished(record) => record,
            WorkerMessage::Lost { label, error } => {
                error!(label = %label, error = %error, "observer cannot reach trial count");
                return Err(HsError::Exhaustion {
                    observed: summary.observed(),
                    expected,
                    lost: Some(label),
                });
            }
        };

        let score = record.score.unwrap_or(worst);
        optimizer.observe(&record.suggestion, score)?;
        if !record.is_failed() {
            record.mark_observed()?;
            record.mark_recorded()?;
        }

        let snapshot: Option<BestRecord> = best.snapshot();
        let runtime = record.elapsed_seconds().unwrap_or(0.0);
        let metrics = TrialMetrics {
            runtime,
            average_runtime: runtimes.push(runtime),
            best_score: snapshot.as_ref().map_or(worst, |b| b.score),
            score,
        };
        telemetry.log(summary.observed() + 1, &metrics);

        if let Some(log) = observation_log.as_mut() {
            if let Err(e) = log.append(&record, snapshot.as_ref()) {
                warn!(path = %log.path().display(), error = %e, "failed to append observation");
            }
        }
        debug!(label = %record.label, score, "observed");
        summary.push(record);
    }

    summary.finish(best.snapshot());
    Ok(summary)
}
