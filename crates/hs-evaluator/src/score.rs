//! Reduction of a result log to one score, with the sentinel fallback.

use tracing::{debug, warn};

use hs_types::{EvaluationError, Reduction, RunConfig};

use crate::results::ResultLog;

#[derive(Debug, Clone, PartialEq)]
pub struct ScorePolicy {
    pub objective: String,
    /// Column consulted when the objective holds the sentinel.
    pub fallback: Option<String>,
    pub sentinel: f64,
    pub penalty_factor: f64,
    pub max_epochs: usize,
    pub reduction: Reduction,
}

impl ScorePolicy {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            objective: config.variable_to_optimize.clone(),
            fallback: config.fallback_variable.clone(),
            sentinel: config.sentinel,
            penalty_factor: config.penalty_factor,
            max_epochs: config.num_epochs,
            reduction: config.effective_reduction(),
        }
    }

    fn is_sentinel(&self, value: f64) -> bool {
        value == self.sentinel
    }

    /// Replace a sentinel objective value.
    ///
    /// A valid secondary value (positive, not itself the sentinel) is scaled
    /// by the penalty factor; otherwise the epoch budget is.
    pub fn substitute(&self, raw: f64, secondary: Option<f64>) -> f64 {
        if !self.is_sentinel(raw) {
            return raw;
        }
        match secondary.filter(|s| *s > 0.0 && !self.is_sentinel(*s)) {
            Some(secondary) => secondary * self.penalty_factor,
            None => self.max_epochs as f64 * self.penalty_factor,
        }
    }

    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        match self.reduction {
            Reduction::Last => values.last().copied(),
            Reduction::Mean if values.is_empty() => None,
            Reduction::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
        }
    }

    /// Score a parsed result log. Each row's sentinel is replaced using the
    /// same row's secondary value before reduction.
    pub fn score(&self, log: &ResultLog) -> Result<f64, EvaluationError> {
        let objective = log.column(&self.objective)?;
        let secondary = match self.fallback.as_deref() {
            Some(column) if log.has_column(column) => Some(log.column(column)?),
            Some(column) => {
                warn!(column, path = %log.path().display(), "fallback column not in result log");
                None
            }
            None => None,
        };

        let substituted: Vec<f64> = objective
            .iter()
            .enumerate()
            .map(|(row, raw)| {
                let secondary = secondary.as_ref().and_then(|s| s.get(row).copied());
                self.substitute(*raw, secondary)
            })
            .collect();

        let score = self
            .reduce(&substituted)
            .ok_or_else(|| EvaluationError::EmptyLog {
                path: log.path().to_path_buf(),
            })?;
        if !score.is_finite() {
            return Err(EvaluationError::Unparseable {
                path: log.path().to_path_buf(),
                message: format!("{} reduces to non-finite score {score}", self.objective),
            });
        }
        debug!(objective = %self.objective, score, rows = substituted.len(), "scored result log");
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy(max_epochs: usize, penalty: f64, reduction: Reduction) -> ScorePolicy {
        ScorePolicy {
            objective: "|LastZero".into(),
            fallback: Some("|FirstZero".into()),
            sentinel: -1.0,
            penalty_factor: penalty,
            max_epochs,
            reduction,
        }
    }

    fn log(contents: &str) -> (TempDir, ResultLog) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("RA25_Searching_0_run.tsv");
        std::fs::write(&path, contents).unwrap();
        let log = ResultLog::read(&path).unwrap();
        (dir, log)
    }

    #[test]
    fn sentinel_uses_secondary_value() {
        let p = policy(30, 4.0, Reduction::Last);
        assert_eq!(p.substitute(-1.0, Some(10.0)), 40.0);
    }

    #[test]
    fn sentinel_without_valid_secondary_uses_epoch_budget() {
        let p = policy(30, 4.0, Reduction::Last);
        assert_eq!(p.substitute(-1.0, None), 120.0);
        assert_eq!(p.substitute(-1.0, Some(-1.0)), 120.0);
        assert_eq!(p.substitute(-1.0, Some(0.0)), 120.0);
    }

    #[test]
    fn non_sentinel_values_pass_through() {
        let p = policy(30, 4.0, Reduction::Last);
        assert_eq!(p.substitute(17.0, Some(10.0)), 17.0);
        assert_eq!(p.substitute(0.0, None), 0.0);
    }

    #[test]
    fn reductions() {
        assert_eq!(policy(1, 2.0, Reduction::Last).reduce(&[1.0, 5.0]), Some(5.0));
        assert_eq!(policy(1, 2.0, Reduction::Mean).reduce(&[1.0, 5.0]), Some(3.0));
        assert_eq!(policy(1, 2.0, Reduction::Mean).reduce(&[]), None);
    }

    #[test]
    fn scores_last_row_with_fallback() {
        let (_dir, log) = log("|Run\t#LastZero\t#FirstZero\n0\t25\t20\n1\t-1\t10\n");
        assert_eq!(policy(30, 4.0, Reduction::Last).score(&log).unwrap(), 40.0);
    }

    #[test]
    fn scores_mean_over_runs() {
        let (_dir, log) = log("|Run\t#LastZero\t#FirstZero\n0\t20\t15\n1\t-1\t-1\n2\t-1\t5\n");
        // 20, 30 * 2, 5 * 2
        assert_eq!(policy(30, 2.0, Reduction::Mean).score(&log).unwrap(), 30.0);
    }

    #[test]
    fn missing_fallback_column_uses_epoch_budget() {
        let (_dir, log) = log("|Run\t#LastZero\n0\t-1\n");
        assert_eq!(policy(50, 2.0, Reduction::Last).score(&log).unwrap(), 100.0);
    }

    #[test]
    fn missing_objective_column_fails() {
        let (_dir, log) = log("|Run\t#PctErr\n0\t0.5\n");
        let err = policy(50, 2.0, Reduction::Last).score(&log).unwrap_err();
        assert!(matches!(err, EvaluationError::ColumnMissing { .. }));
    }

    #[test]
    fn non_finite_score_fails() {
        let (_dir, log) = log("|Run\t#LastZero\n0\tNaN\n");
        assert!(policy(50, 2.0, Reduction::Last).score(&log).is_err());
    }

    #[test]
    fn from_config_follows_run_count() {
        let config = RunConfig::default()
            .with_schedule(30, 4)
            .with_fallback(Some("#FirstZero"), -1.0, 3.0);
        let p = ScorePolicy::from_config(&config);
        assert_eq!(p.reduction, Reduction::Mean);
        assert_eq!(p.max_epochs, 30);
        assert_eq!(p.penalty_factor, 3.0);
        assert_eq!(p.fallback.as_deref(), Some("#FirstZero"));
    }
}
