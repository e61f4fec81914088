//! # hs-evaluator
//!
//! Runs the external training executable for one trial and reduces its
//! tab-separated result log to a single score.

mod command;
mod results;
mod score;

pub use command::CommandEvaluator;
pub use results::ResultLog;
pub use score::ScorePolicy;
