//! Trial-level vocabulary shared by the scheduler and evaluator crates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::errors::HsResult;

/// A candidate assignment proposed by the optimizer, keyed by unique
/// parameter name (e.g. `"0_Rate"`).
pub type Suggestion = HashMap<String, f64>;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Minimize
    }
}

impl ObjectiveDirection {
    pub fn from_minimize(minimize: bool) -> Self {
        if minimize {
            Self::Minimize
        } else {
            Self::Maximize
        }
    }

    /// `true` when `candidate` strictly beats `incumbent`.
    pub fn is_better(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }

    /// The score assigned to a trial whose evaluation failed. Finite so it can
    /// still be fed to the optimizer.
    pub fn worst_score(&self) -> f64 {
        match self {
            Self::Maximize => f64::MIN,
            Self::Minimize => f64::MAX,
        }
    }
}

/// Lifecycle of a single trial.
///
/// `Pending → Suggested → Evaluating → AwaitingObservation → Observed →
/// Recorded`, with `Failed` as the alternate terminal state out of
/// `Evaluating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrialState {
    Pending,
    Suggested,
    Evaluating,
    AwaitingObservation,
    Observed,
    Recorded,
    Failed,
}

impl TrialState {
    pub fn can_transition_to(self, next: TrialState) -> bool {
        use TrialState::*;
        matches!(
            (self, next),
            (Pending, Suggested)
                | (Suggested, Evaluating)
                | (Evaluating, AwaitingObservation)
                | (Evaluating, Failed)
                | (AwaitingObservation, Observed)
                | (Observed, Recorded)
        )
    }
}

/// Everything an evaluator needs to run one trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRequest {
    /// Trial slot number (0-indexed).
    pub index: usize,
    /// Unique label; names the parameter file and the result log.
    pub label: String,
    /// Path of the injected trial parameter file.
    pub params_path: PathBuf,
}

/// Runs one trial to completion and reduces its output to a single score.
///
/// Called concurrently from every scheduler worker; implementations must be
/// safe to share. A returned [`crate::EvaluationError`] marks the trial
/// failed without aborting the run.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, request: &TrialRequest) -> HsResult<f64>;
}

impl<E: Evaluator + ?Sized> Evaluator for Box<E> {
    fn evaluate(&self, request: &TrialRequest) -> HsResult<f64> {
        (**self).evaluate(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        use TrialState::*;
        let path = [Pending, Suggested, Evaluating, AwaitingObservation, Observed, Recorded];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        for next in [Pending, Suggested, Evaluating, AwaitingObservation, Observed, Failed] {
            assert!(!Recorded.can_transition_to(next));
        }
    }

    #[test]
    fn failed_only_reachable_from_evaluating() {
        use TrialState::*;
        assert!(Evaluating.can_transition_to(Failed));
        for from in [Pending, Suggested, AwaitingObservation, Observed, Recorded] {
            assert!(!from.can_transition_to(Failed));
        }
        assert!(!Failed.can_transition_to(Observed));
    }

    #[test]
    fn no_skipping_states() {
        assert!(!TrialState::Pending.can_transition_to(TrialState::Evaluating));
        assert!(!TrialState::Suggested.can_transition_to(TrialState::Observed));
    }

    #[test]
    fn direction_comparisons() {
        let min = ObjectiveDirection::Minimize;
        assert!(min.is_better(1.0, 2.0));
        assert!(!min.is_better(2.0, 2.0));
        assert_eq!(min.worst_score(), f64::MAX);

        let max = ObjectiveDirection::from_minimize(false);
        assert_eq!(max, ObjectiveDirection::Maximize);
        assert!(max.is_better(3.0, 2.0));
        assert!(max.worst_score().is_finite());
    }
}
