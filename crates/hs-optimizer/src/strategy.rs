//! The optimizer seam and the built-in sampler.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::debug;

use hs_types::{HsResult, ObjectiveDirection, Suggestion};

use crate::search::{ParameterSpace, SearchSpace, SpaceKind};

/// A sequential model-based optimizer.
///
/// Both methods mutate model state and are never called concurrently; wrap
/// implementations in [`SharedOptimizer`] to share them between threads.
pub trait Optimizer: Send {
    /// Propose the next candidate.
    fn suggest(&mut self) -> HsResult<Suggestion>;

    /// Feed back the score obtained for a previously suggested candidate.
    fn observe(&mut self, suggestion: &Suggestion, score: f64) -> HsResult<()>;

    fn name(&self) -> &str;
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn suggest(&mut self) -> HsResult<Suggestion> {
        (**self).suggest()
    }

    fn observe(&mut self, suggestion: &Suggestion, score: f64) -> HsResult<()> {
        (**self).observe(suggestion, score)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Single serialization point for every optimizer call: `suggest` and
/// `observe` share one lock, so no two calls ever overlap.
pub struct SharedOptimizer<O> {
    inner: Mutex<O>,
    suggested: AtomicUsize,
    observed: AtomicUsize,
}

impl<O: Optimizer> SharedOptimizer<O> {
    pub fn new(optimizer: O) -> Self {
        Self {
            inner: Mutex::new(optimizer),
            suggested: AtomicUsize::new(0),
            observed: AtomicUsize::new(0),
        }
    }

    pub fn suggest(&self) -> HsResult<Suggestion> {
        let suggestion = self.inner.lock().suggest()?;
        self.suggested.fetch_add(1, Ordering::Relaxed);
        Ok(suggestion)
    }

    pub fn observe(&self, suggestion: &Suggestion, score: f64) -> HsResult<()> {
        self.inner.lock().observe(suggestion, score)?;
        self.observed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn name(&self) -> String {
        self.inner.lock().name().to_string()
    }

    pub fn suggested(&self) -> usize {
        self.suggested.load(Ordering::Relaxed)
    }

    pub fn observed(&self) -> usize {
        self.observed.load(Ordering::Relaxed)
    }
}

/// Observations without improvement before the search radius shrinks.
const STALL_LIMIT: usize = 8;
const MIN_RADIUS: f64 = 1.0 / 16.0;

/// Local search around the best point seen so far.
///
/// The first suggestion is the starting point itself. Later ones perturb the
/// current centre by each dimension's scale, additively for linear dimensions
/// and multiplicatively for log ones, then clamp to the distribution. The
/// centre moves on every improvement; after [`STALL_LIMIT`] observations
/// without one the perturbation radius halves.
pub struct CenteredSearch {
    space: SearchSpace,
    centre: Suggestion,
    best: Option<f64>,
    direction: ObjectiveDirection,
    radius: f64,
    stalled: usize,
    issued: usize,
    rng: StdRng,
}

impl CenteredSearch {
    pub fn new(space: &ParameterSpace, direction: ObjectiveDirection, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            space: space.search_space.clone(),
            centre: space.initial_params.clone(),
            best: None,
            direction,
            radius: 1.0,
            stalled: 0,
            issued: 0,
            rng,
        }
    }

    pub fn centre(&self) -> &Suggestion {
        &self.centre
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    fn perturb(&mut self) -> Suggestion {
        let mut suggestion = Suggestion::with_capacity(self.space.len());
        for def in &self.space.parameters {
            let dist = &def.distribution;
            let centre = self.centre.get(&def.name).copied().unwrap_or(0.0);
            let z: f64 = self.rng.sample(StandardNormal);
            let step = z * dist.scale * self.radius;
            let raw = match dist.kind {
                SpaceKind::Log if centre > 0.0 => centre * (step / centre).exp(),
                _ => centre + step,
            };
            suggestion.insert(def.name.clone(), dist.clamp(raw));
        }
        suggestion
    }
}

impl Optimizer for CenteredSearch {
    fn suggest(&mut self) -> HsResult<Suggestion> {
        let suggestion = if self.issued == 0 {
            self.centre.clone()
        } else {
            self.perturb()
        };
        self.issued += 1;
        Ok(suggestion)
    }

    fn observe(&mut self, suggestion: &Suggestion, score: f64) -> HsResult<()> {
        let improved = score.is_finite()
            && self
                .best
                .map_or(true, |best| self.direction.is_better(score, best));
        if improved {
            self.best = Some(score);
            for name in self.space.names() {
                if let Some(value) = suggestion.get(name) {
                    self.centre.insert(name.to_string(), *value);
                }
            }
            self.stalled = 0;
            debug!(score, "search centre moved");
        } else {
            self.stalled += 1;
            if self.stalled >= STALL_LIMIT {
                self.radius = (self.radius / 2.0).max(MIN_RADIUS);
                self.stalled = 0;
                debug!(radius = self.radius, "search radius shrunk");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "centered"
    }
}
