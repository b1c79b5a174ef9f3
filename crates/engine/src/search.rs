//! Search algorithms: which parameter set to try next, and when to stop

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::space::{GridIter, ParamSampler, ParameterSpace};
use crate::types::{params_key, ParamSet};

/// Exact, case-sensitive names accepted by [`build_search`]
pub const REGISTERED_ALGORITHMS: &[&str] = &["GridSearch", "RandomSearch"];

/// Seed used by `RandomSearch` when the configuration does not set one
pub const DEFAULT_RANDOM_SEED: u64 = 42;

/// Draw attempts allowed per requested candidate when de-duplicating
const DEDUPE_ATTEMPTS_PER_TRIAL: usize = 50;

/// Candidate generator driven by the engine loop
pub trait SearchAlgorithm: Send {
    fn name(&self) -> &'static str;

    fn has_next(&mut self) -> bool;

    fn next_candidate(&mut self) -> Option<ParamSet>;

    /// Known upfront for grid search; for random search only once exhausted.
    fn total_count(&self) -> Option<usize>;
}

/// Exhaustive, deterministic enumeration of the whole space
pub struct GridSearch {
    iter: std::iter::Peekable<GridIter>,
    total: usize,
}

impl GridSearch {
    pub fn new(space: &ParameterSpace) -> Self {
        Self {
            iter: space.enumerate().peekable(),
            total: space.cardinality(),
        }
    }
}

impl SearchAlgorithm for GridSearch {
    fn name(&self) -> &'static str {
        "GridSearch"
    }

    fn has_next(&mut self) -> bool {
        self.iter.peek().is_some()
    }

    fn next_candidate(&mut self) -> Option<ParamSet> {
        self.iter.next()
    }

    fn total_count(&self) -> Option<usize> {
        Some(self.total)
    }
}

/// Uniform random draws, reproducible for a given seed
pub struct RandomSearch {
    sampler: ParamSampler,
    max_trials: usize,
    emitted: usize,
    seed: u64,
    seen: Option<HashSet<String>>,
    exhausted: bool,
}

impl RandomSearch {
    pub fn new(space: &ParameterSpace, max_trials: usize, seed: u64) -> Self {
        Self {
            sampler: space.sampler(seed),
            max_trials,
            emitted: 0,
            seed,
            seen: None,
            exhausted: false,
        }
    }

    /// Skip parameter sets that were already proposed. The trial count is
    /// capped at the space cardinality.
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        if dedupe {
            self.seen = Some(HashSet::new());
            let cardinality = self.sampler.space().cardinality();
            if cardinality < self.max_trials {
                debug!(
                    requested = self.max_trials,
                    cardinality, "Capping de-duplicated random search at space size"
                );
                self.max_trials = cardinality;
            }
        }
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl SearchAlgorithm for RandomSearch {
    fn name(&self) -> &'static str {
        "RandomSearch"
    }

    fn has_next(&mut self) -> bool {
        !self.exhausted && self.emitted < self.max_trials
    }

    fn next_candidate(&mut self) -> Option<ParamSet> {
        if !self.has_next() {
            return None;
        }

        let candidate = match self.seen.as_mut() {
            None => Some(self.sampler.next_sample()),
            Some(seen) => {
                let mut found = None;
                for _ in 0..DEDUPE_ATTEMPTS_PER_TRIAL {
                    let sample = self.sampler.next_sample();
                    if seen.insert(params_key(&sample)) {
                        found = Some(sample);
                        break;
                    }
                }
                found
            }
        };

        match candidate {
            Some(params) => {
                self.emitted += 1;
                Some(params)
            }
            None => {
                warn!(
                    emitted = self.emitted,
                    "Random search could not find an unseen parameter set; stopping early"
                );
                self.exhausted = true;
                None
            }
        }
    }

    fn total_count(&self) -> Option<usize> {
        if self.emitted >= self.max_trials || self.exhausted {
            Some(self.emitted)
        } else {
            None
        }
    }
}

/// Settings consumed by [`build_search`]
#[derive(Debug, Clone, Default)]
pub struct SearchSettings {
    pub max_trials: Option<usize>,
    pub seed: Option<u64>,
    pub dedupe: bool,
}

/// Build a registered search algorithm by exact name.
pub fn build_search(
    name: &str,
    space: &ParameterSpace,
    settings: &SearchSettings,
) -> Result<Box<dyn SearchAlgorithm>, ConfigError> {
    match name {
        "GridSearch" => Ok(Box::new(GridSearch::new(space))),
        "RandomSearch" => {
            let max_trials = match settings.max_trials {
                Some(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid(
                        "RandomSearch requires max_trials > 0".to_string(),
                    ))
                }
            };
            let seed = settings.seed.unwrap_or(DEFAULT_RANDOM_SEED);
            Ok(Box::new(
                RandomSearch::new(space, max_trials, seed).with_dedupe(settings.dedupe),
            ))
        }
        other => Err(ConfigError::UnknownAlgorithm {
            name: other.to_string(),
            registered: REGISTERED_ALGORITHMS.to_vec(),
        }),
    }
}
