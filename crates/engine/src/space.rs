//! Parameter space: declarative definitions expanded into concrete combinations
//!
//! Grid enumeration is a lazy odometer over the per-parameter value lists, with
//! the last-declared parameter varying fastest. Random sampling draws each
//! parameter independently and uniformly from a seeded `StdRng`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::types::{ParamSet, ParamValue};

/// Decimal places kept for float range values
const RANGE_PRECISION: f64 = 1e10;

/// Most values a single range may expand to
pub const MAX_RANGE_VALUES: usize = 1_000_000;

/// Number of values in `start, start + step, ...` strictly below `stop`
fn range_len(start: f64, stop: f64, step: f64) -> f64 {
    (((stop - start) / step) - 1e-9).ceil().max(0.0)
}

/// Integral ranges stay `Int` only while every value fits exactly in an `i64`
fn range_is_integral(start: f64, step: f64, last: f64) -> bool {
    const EXACT_I64: f64 = 9_007_199_254_740_992.0; // 2^53
    start.fract() == 0.0
        && step.fract() == 0.0
        && start.abs() <= EXACT_I64
        && last.abs() <= EXACT_I64
}

/// How one strategy parameter is explored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterDefinition {
    /// Strategy default that is not searched
    Fixed { value: ParamValue },
    /// `start, start + step, ...` strictly below `stop`
    Range { start: f64, stop: f64, step: f64 },
    /// Explicit ordered list of candidates
    Choices { values: Vec<ParamValue> },
    /// Value pinned by the caller for this run
    ExplicitValue { value: ParamValue },
}

impl ParameterDefinition {
    pub fn range(start: f64, stop: f64, step: f64) -> Self {
        ParameterDefinition::Range { start, stop, step }
    }

    pub fn choices(values: impl IntoIterator<Item = impl Into<ParamValue>>) -> Self {
        ParameterDefinition::Choices {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fixed(value: impl Into<ParamValue>) -> Self {
        ParameterDefinition::Fixed {
            value: value.into(),
        }
    }

    pub fn explicit(value: impl Into<ParamValue>) -> Self {
        ParameterDefinition::ExplicitValue {
            value: value.into(),
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidParameter {
            name: name.to_string(),
            reason,
        };

        match self {
            ParameterDefinition::Range { start, stop, step } => {
                if !start.is_finite() || !stop.is_finite() || !step.is_finite() {
                    return Err(invalid("range bounds must be finite".to_string()));
                }
                if *step <= 0.0 {
                    return Err(invalid(format!("range step must be > 0 (got {})", step)));
                }
                if stop <= start {
                    return Err(invalid(format!(
                        "range stop must be > start (got {}..{})",
                        start, stop
                    )));
                }
                let count = range_len(*start, *stop, *step);
                if count > MAX_RANGE_VALUES as f64 {
                    let shown = if count < 1e15 {
                        format!("{:.0}", count)
                    } else {
                        format!("{:e}", count)
                    };
                    return Err(invalid(format!(
                        "range yields {} values, limit {}",
                        shown, MAX_RANGE_VALUES
                    )));
                }
            }
            ParameterDefinition::Choices { values } => {
                if values.is_empty() {
                    return Err(invalid("choices must not be empty".to_string()));
                }
            }
            ParameterDefinition::Fixed { .. } | ParameterDefinition::ExplicitValue { .. } => {}
        }

        Ok(())
    }

    /// Concrete values this definition contributes, in order. Ranges are
    /// cut at `MAX_RANGE_VALUES`.
    pub fn values(&self) -> Vec<ParamValue> {
        match self {
            ParameterDefinition::Fixed { value } | ParameterDefinition::ExplicitValue { value } => {
                vec![value.clone()]
            }
            ParameterDefinition::Choices { values } => values.clone(),
            ParameterDefinition::Range { start, stop, step } => {
                let count = range_len(*start, *stop, *step).min(MAX_RANGE_VALUES as f64) as usize;
                let last = start + step * count.saturating_sub(1) as f64;
                let integral = range_is_integral(*start, *step, last);
                (0..count)
                    .map(|i| {
                        let v = start + step * i as f64;
                        if integral {
                            ParamValue::Int(v as i64)
                        } else {
                            let rounded = (v * RANGE_PRECISION).round() / RANGE_PRECISION;
                            ParamValue::Float(if rounded.is_finite() { rounded } else { v })
                        }
                    })
                    .collect()
            }
        }
    }
}

/// A named parameter definition, as it appears in configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedParameter {
    pub name: String,
    #[serde(flatten)]
    pub definition: ParameterDefinition,
}

/// Mapping from parameter name to definition, in declaration order.
/// Cloning is cheap; iterators and samplers hold their own handle.
#[derive(Debug, Clone)]
pub struct ParameterSpace {
    inner: Arc<SpaceInner>,
}

#[derive(Debug)]
struct SpaceInner {
    names: Vec<String>,
    definitions: Vec<ParameterDefinition>,
    values: Vec<Vec<ParamValue>>,
}

impl ParameterSpace {
    /// Validate and build a space. Fails on the first bad definition.
    pub fn new(
        definitions: impl IntoIterator<Item = (String, ParameterDefinition)>,
    ) -> Result<Self, ConfigError> {
        let mut names = Vec::new();
        let mut defs = Vec::new();
        let mut seen = HashSet::new();

        for (name, def) in definitions {
            if !seen.insert(name.clone()) {
                return Err(ConfigError::InvalidParameter {
                    name,
                    reason: "declared more than once".to_string(),
                });
            }
            def.validate(&name)?;
            names.push(name);
            defs.push(def);
        }

        if names.is_empty() {
            return Err(ConfigError::Invalid(
                "parameter space has no parameters".to_string(),
            ));
        }

        let values: Vec<Vec<ParamValue>> = defs.iter().map(ParameterDefinition::values).collect();
        for (name, vals) in names.iter().zip(&values) {
            if vals.is_empty() {
                return Err(ConfigError::InvalidParameter {
                    name: name.clone(),
                    reason: "definition yields no values".to_string(),
                });
            }
        }

        Ok(Self {
            inner: Arc::new(SpaceInner {
                names,
                definitions: defs,
                values,
            }),
        })
    }

    pub fn from_named(params: Vec<NamedParameter>) -> Result<Self, ConfigError> {
        Self::new(params.into_iter().map(|p| (p.name, p.definition)))
    }

    pub fn names(&self) -> &[String] {
        &self.inner.names
    }

    pub fn definition(&self, name: &str) -> Option<&ParameterDefinition> {
        self.inner
            .names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.inner.definitions[i])
    }

    /// Exact number of grid combinations (saturating).
    pub fn cardinality(&self) -> usize {
        self.inner
            .values
            .iter()
            .fold(1usize, |acc, v| acc.saturating_mul(v.len()))
    }

    /// True when every parameter has a single value: no real search is possible.
    pub fn is_degenerate(&self) -> bool {
        self.inner.values.iter().all(|v| v.len() == 1)
    }

    /// Lazy Cartesian product. Each call starts from the first combination.
    pub fn enumerate(&self) -> GridIter {
        GridIter {
            space: self.clone(),
            indices: vec![0; self.inner.values.len()],
            done: false,
        }
    }

    /// Seeded sampler whose draws continue one PRNG stream.
    pub fn sampler(&self, seed: u64) -> ParamSampler {
        ParamSampler {
            space: self.clone(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// `n` uniform draws with replacement; identical for identical seeds.
    pub fn sample(&self, n: usize, seed: u64) -> Vec<ParamSet> {
        self.sampler(seed).sample(n)
    }

    fn combination(&self, indices: &[usize]) -> ParamSet {
        self.inner
            .names
            .iter()
            .zip(&self.inner.values)
            .zip(indices)
            .map(|((name, vals), &i)| (name.clone(), vals[i].clone()))
            .collect()
    }
}

/// Iterator over every combination of a [`ParameterSpace`]
pub struct GridIter {
    space: ParameterSpace,
    indices: Vec<usize>,
    done: bool,
}

impl Iterator for GridIter {
    type Item = ParamSet;

    fn next(&mut self) -> Option<ParamSet> {
        if self.done {
            return None;
        }

        let current = self.space.combination(&self.indices);

        // Advance the odometer, last dimension fastest
        let mut pos = self.indices.len();
        loop {
            if pos == 0 {
                self.done = true;
                break;
            }
            pos -= 1;
            self.indices[pos] += 1;
            if self.indices[pos] < self.space.inner.values[pos].len() {
                break;
            }
            self.indices[pos] = 0;
        }

        Some(current)
    }
}

/// Uniform, seeded sampler over a [`ParameterSpace`]
pub struct ParamSampler {
    space: ParameterSpace,
    rng: StdRng,
}

impl ParamSampler {
    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn next_sample(&mut self) -> ParamSet {
        let indices: Vec<usize> = self
            .space
            .inner
            .values
            .iter()
            .map(|vals| self.rng.gen_range(0..vals.len()))
            .collect();
        self.space.combination(&indices)
    }

    pub fn sample(&mut self, n: usize) -> Vec<ParamSet> {
        (0..n).map(|_| self.next_sample()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_slow_space() -> ParameterSpace {
        ParameterSpace::new(vec![
            ("fast".to_string(), ParameterDefinition::range(5.0, 15.0, 5.0)),
            (
                "slow".to_string(),
                ParameterDefinition::choices(vec![20i64, 30]),
            ),
        ])
        .unwrap()
    }

    fn pair(p: &ParamSet) -> (i64, i64) {
        (
            p["fast"].as_i64().unwrap(),
            p["slow"].as_i64().unwrap(),
        )
    }

    #[test]
    fn test_grid_order_last_parameter_fastest() {
        let space = fast_slow_space();
        assert_eq!(space.cardinality(), 4);
        let combos: Vec<(i64, i64)> = space.enumerate().map(|p| pair(&p)).collect();
        assert_eq!(combos, vec![(5, 20), (5, 30), (10, 20), (10, 30)]);
    }

    #[test]
    fn test_grid_is_restartable() {
        let space = fast_slow_space();
        let first: Vec<ParamSet> = space.enumerate().collect();
        let second: Vec<ParamSet> = space.enumerate().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_grid_count_matches_product_and_is_unique() {
        let space = ParameterSpace::new(vec![
            ("a".to_string(), ParameterDefinition::range(1.0, 4.0, 1.0)),
            ("b".to_string(), ParameterDefinition::choices(vec!["x", "y"])),
            ("c".to_string(), ParameterDefinition::range(0.1, 0.5, 0.1)),
            ("d".to_string(), ParameterDefinition::fixed(true)),
        ])
        .unwrap();

        assert_eq!(space.cardinality(), 3 * 2 * 4);
        let combos: Vec<String> = space.enumerate().map(|p| crate::types::params_key(&p)).collect();
        assert_eq!(combos.len(), 24);
        let unique: HashSet<&String> = combos.iter().collect();
        assert_eq!(unique.len(), 24);
    }

    #[test]
    fn test_float_range_has_no_accumulation_artifacts() {
        let values = ParameterDefinition::range(0.1, 0.5, 0.1).values();
        assert_eq!(
            values,
            vec![
                ParamValue::Float(0.1),
                ParamValue::Float(0.2),
                ParamValue::Float(0.3),
                ParamValue::Float(0.4),
            ]
        );
    }

    #[test]
    fn test_invalid_definitions_fail_fast() {
        let bad_step = ParameterSpace::new(vec![(
            "fast".to_string(),
            ParameterDefinition::range(5.0, 15.0, 0.0),
        )]);
        assert!(matches!(bad_step, Err(ConfigError::InvalidParameter { .. })));

        let inverted = ParameterSpace::new(vec![(
            "fast".to_string(),
            ParameterDefinition::range(15.0, 5.0, 1.0),
        )]);
        assert!(matches!(inverted, Err(ConfigError::InvalidParameter { .. })));

        let empty = ParameterSpace::new(vec![(
            "mode".to_string(),
            ParameterDefinition::Choices { values: vec![] },
        )]);
        assert!(matches!(empty, Err(ConfigError::InvalidParameter { .. })));

        let duplicate = ParameterSpace::new(vec![
            ("fast".to_string(), ParameterDefinition::fixed(1i64)),
            ("fast".to_string(), ParameterDefinition::fixed(2i64)),
        ]);
        assert!(duplicate.is_err());

        assert!(ParameterSpace::new(Vec::new()).is_err());
    }

    #[test]
    fn test_oversized_range_rejected() {
        let err = ParameterSpace::new(vec![(
            "x".to_string(),
            ParameterDefinition::range(0.0, 1e300, 1.0),
        )])
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::InvalidParameter { .. }));
        assert!(err.to_string().contains("limit 1000000"));

        let just_over = ParameterSpace::new(vec![(
            "x".to_string(),
            ParameterDefinition::range(0.0, (MAX_RANGE_VALUES + 1) as f64, 1.0),
        )]);
        assert!(just_over.is_err());
    }

    #[test]
    fn test_range_beyond_exact_integers_stays_distinct() {
        let values = ParameterDefinition::range(9.2e18, 9.3e18, 1e16).values();
        assert_eq!(values.len(), 10);
        assert!(values.iter().all(|v| matches!(v, ParamValue::Float(_))));
        let unique: HashSet<String> = values.iter().map(|v| v.to_string()).collect();
        assert_eq!(unique.len(), 10);

        let small = ParameterDefinition::range(-3.0, 3.0, 2.0).values();
        assert_eq!(
            small,
            vec![ParamValue::Int(-3), ParamValue::Int(-1), ParamValue::Int(1)]
        );
    }

    #[test]
    fn test_degenerate_space_has_one_combination() {
        let space = ParameterSpace::new(vec![
            ("fast".to_string(), ParameterDefinition::fixed(10i64)),
            ("slow".to_string(), ParameterDefinition::explicit(30i64)),
        ])
        .unwrap();

        assert!(space.is_degenerate());
        assert_eq!(space.cardinality(), 1);
        let combos: Vec<ParamSet> = space.enumerate().collect();
        assert_eq!(combos.len(), 1);
        assert_eq!(pair(&combos[0]), (10, 30));
    }

    #[test]
    fn test_sample_is_deterministic_per_seed() {
        let space = fast_slow_space();
        assert_eq!(space.sample(50, 7), space.sample(50, 7));

        // Each draw stays inside the declared values
        for p in space.sample(50, 11) {
            let (fast, slow) = pair(&p);
            assert!(fast == 5 || fast == 10);
            assert!(slow == 20 || slow == 30);
        }
    }

    #[test]
    fn test_sampler_continues_stream() {
        let space = fast_slow_space();
        let mut sampler = space.sampler(3);
        let mut drawn = sampler.sample(10);
        drawn.extend(sampler.sample(10));
        assert_eq!(drawn, space.sample(20, 3));
    }

    #[test]
    fn test_named_parameters_from_json() {
        let json = r#"[
            {"name": "fast", "type": "range", "start": 5, "stop": 15, "step": 5},
            {"name": "slow", "type": "choices", "values": [20, 30]},
            {"name": "symbol", "type": "fixed", "value": "BTCUSDT"}
        ]"#;
        let params: Vec<NamedParameter> = serde_json::from_str(json).unwrap();
        let space = ParameterSpace::from_named(params).unwrap();
        assert_eq!(space.names(), &["fast", "slow", "symbol"]);
        assert_eq!(space.cardinality(), 4);
        assert_eq!(
            space.definition("symbol"),
            Some(&ParameterDefinition::fixed("BTCUSDT"))
        );
    }
}
