//! Trial tracking and run bookkeeping.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use hs_types::{HsError, HsResult, ObjectiveDirection, Suggestion, TrialState};

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// A single trial, carried through its lifecycle by one worker and then
/// handed to the observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub id: Uuid,
    pub index: usize,
    pub label: String,
    pub state: TrialState,
    pub suggestion: Suggestion,
    pub params_path: Option<PathBuf>,
    /// Objective score; the worst score for failed trials.
    pub score: Option<f64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrialRecord {
    pub fn new(index: usize, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            label: label.into(),
            state: TrialState::Pending,
            suggestion: Suggestion::new(),
            params_path: None,
            score: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, to: TrialState) -> HsResult<()> {
        if !self.state.can_transition_to(to) {
            return Err(HsError::InvalidTransition {
                label: self.label.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn mark_suggested(&mut self, suggestion: Suggestion) -> HsResult<()> {
        self.transition(TrialState::Suggested)?;
        self.suggestion = suggestion;
        Ok(())
    }

    pub fn mark_evaluating(&mut self) -> HsResult<()> {
        self.transition(TrialState::Evaluating)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_awaiting_observation(&mut self, score: f64) -> HsResult<()> {
        self.transition(TrialState::AwaitingObservation)?;
        self.finished_at = Some(Utc::now());
        self.score = Some(score);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: String, worst_score: f64) -> HsResult<()> {
        self.transition(TrialState::Failed)?;
        self.finished_at = Some(Utc::now());
        self.score = Some(worst_score);
        self.error = Some(error);
        Ok(())
    }

    pub fn mark_observed(&mut self) -> HsResult<()> {
        self.transition(TrialState::Observed)
    }

    pub fn mark_recorded(&mut self) -> HsResult<()> {
        self.transition(TrialState::Recorded)
    }

    pub fn is_failed(&self) -> bool {
        self.state == TrialState::Failed
    }

    /// Wall-clock evaluation time in seconds, once finished.
    pub fn elapsed_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some((finished - started).num_milliseconds() as f64 / 1000.0)
    }

    pub fn result(&self) -> Option<TrialResult> {
        Some(TrialResult {
            index: self.index,
            label: self.label.clone(),
            suggestion: self.suggestion.clone(),
            score: self.score?,
            elapsed_seconds: self.elapsed_seconds().unwrap_or(0.0),
            failed: self.is_failed(),
        })
    }
}

/// Outcome of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub index: usize,
    pub label: String,
    pub suggestion: Suggestion,
    pub score: f64,
    pub elapsed_seconds: f64,
    pub failed: bool,
}

/// Best `(label, suggestion, score)` seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestRecord {
    pub label: String,
    pub suggestion: Suggestion,
    pub score: f64,
}

/// Running best under a fixed direction. Ties keep the earlier record.
#[derive(Debug)]
pub struct BestTracker {
    direction: ObjectiveDirection,
    best: Mutex<Option<BestRecord>>,
}

impl BestTracker {
    pub fn new(direction: ObjectiveDirection) -> Self {
        Self {
            direction,
            best: Mutex::new(None),
        }
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    /// Offer a score; returns `true` if it became the new best.
    pub fn offer(&self, label: &str, suggestion: &Suggestion, score: f64) -> bool {
        if !score.is_finite() {
            return false;
        }
        let mut best = self.best.lock();
        let improves = match best.as_ref() {
            None => true,
            Some(current) => self.direction.is_better(score, current.score),
        };
        if improves {
            *best = Some(BestRecord {
                label: label.to_string(),
                suggestion: suggestion.clone(),
                score,
            });
        }
        improves
    }

    pub fn snapshot(&self) -> Option<BestRecord> {
        self.best.lock().clone()
    }
}

/// Final report of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub optimizer: String,
    pub expected: usize,
    pub completed: usize,
    pub failed: usize,
    pub best: Option<BestRecord>,
    /// Trials in observation order.
    pub records: Vec<TrialRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn new(optimizer: impl Into<String>, expected: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            optimizer: optimizer.into(),
            expected,
            completed: 0,
            failed: 0,
            best: None,
            records: Vec::with_capacity(expected),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn push(&mut self, record: TrialRecord) {
        if record.is_failed() {
            self.failed += 1;
        } else {
            self.completed += 1;
        }
        self.records.push(record);
    }

    pub fn observed(&self) -> usize {
        self.records.len()
    }

    pub fn finish(&mut self, best: Option<BestRecord>) {
        self.best = best;
        self.finished_at = Some(Utc::now());
    }

    pub fn results(&self) -> Vec<TrialResult> {
        self.records.iter().filter_map(TrialRecord::result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion(v: f64) -> Suggestion {
        [("0_x".to_string(), v)].into_iter().collect()
    }

    #[test]
    fn trial_lifecycle() {
        let mut trial = TrialRecord::new(3, "Searching_3");
        assert_eq!(trial.state, TrialState::Pending);

        trial.mark_suggested(suggestion(1.5)).unwrap();
        trial.mark_evaluating().unwrap();
        assert!(trial.started_at.is_some());
        trial.mark_awaiting_observation(0.25).unwrap();
        trial.mark_observed().unwrap();
        trial.mark_recorded().unwrap();

        assert_eq!(trial.state, TrialState::Recorded);
        assert!(trial.finished_at.is_some());
        let result = trial.result().unwrap();
        assert_eq!(result.label, "Searching_3");
        assert_eq!(result.score, 0.25);
        assert!(!result.failed);
        assert!(result.elapsed_seconds >= 0.0);
    }

    #[test]
    fn trial_failure() {
        let mut trial = TrialRecord::new(0, "Searching_0");
        trial.mark_suggested(suggestion(1.0)).unwrap();
        trial.mark_evaluating().unwrap();
        trial
            .mark_failed("result log not found".into(), f64::MAX)
            .unwrap();
        assert!(trial.is_failed());
        assert_eq!(trial.error.as_deref(), Some("result log not found"));
        assert_eq!(trial.result().unwrap().score, f64::MAX);
        assert!(trial.mark_observed().is_err());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut trial = TrialRecord::new(1, "Searching_1");
        let err = trial.mark_evaluating().unwrap_err();
        match err {
            HsError::InvalidTransition { label, from, to } => {
                assert_eq!(label, "Searching_1");
                assert_eq!(from, TrialState::Pending);
                assert_eq!(to, TrialState::Evaluating);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(trial.state, TrialState::Pending);
        assert!(trial.result().is_none());
    }

    #[test]
    fn best_tracking_minimize_any_order() {
        let scores = [4.0, 9.0, -2.0, 7.5, -2.0, 3.0];
        let mut orders = vec![scores.to_vec()];
        let mut reversed = scores.to_vec();
        reversed.reverse();
        orders.push(reversed);

        for order in orders {
            let tracker = BestTracker::new(ObjectiveDirection::Minimize);
            for (i, score) in order.iter().enumerate() {
                tracker.offer(&format!("t{i}"), &suggestion(*score), *score);
            }
            assert_eq!(tracker.snapshot().unwrap().score, -2.0);
        }
    }

    #[test]
    fn best_tracking_maximize_keeps_earlier_tie() {
        let tracker = BestTracker::new(ObjectiveDirection::Maximize);
        assert!(tracker.snapshot().is_none());
        assert!(tracker.offer("a", &suggestion(1.0), 1.5));
        assert!(tracker.offer("b", &suggestion(2.0), 2.0));
        assert!(!tracker.offer("c", &suggestion(3.0), 2.0));
        assert!(!tracker.offer("d", &suggestion(4.0), 1.0));
        assert!(!tracker.offer("e", &suggestion(5.0), f64::NAN));

        let best = tracker.snapshot().unwrap();
        assert_eq!(best.label, "b");
        assert_eq!(best.suggestion["0_x"], 2.0);
    }

    #[test]
    fn run_summary_counts() {
        let mut summary = RunSummary::new("centered", 2);

        let mut ok = TrialRecord::new(0, "Searching_0");
        ok.mark_suggested(suggestion(1.0)).unwrap();
        ok.mark_evaluating().unwrap();
        ok.mark_awaiting_observation(3.0).unwrap();
        ok.mark_observed().unwrap();
        ok.mark_recorded().unwrap();
        summary.push(ok);

        let mut bad = TrialRecord::new(1, "Searching_1");
        bad.mark_suggested(suggestion(2.0)).unwrap();
        bad.mark_evaluating().unwrap();
        bad.mark_failed("boom".into(), f64::MAX).unwrap();
        summary.push(bad);

        summary.finish(None);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.observed(), 2);
        assert!(summary.finished_at.is_some());
        assert_eq!(summary.results().len(), 2);
    }
}
