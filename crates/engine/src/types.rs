//! Types shared by the optimization engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::FailureKind;
use crate::objective::ConstraintAdherence;

/// Score assigned to a failed trial. Finite, and far below anything a scorer
/// can produce, so a plain `max()` never selects a failure.
pub const FAILED_TRIAL_SCORE: f64 = -1.0e12;

/// A single concrete parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// One concrete parameter combination, keyed by parameter name
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Canonical text form of a parameter set (stable key order).
pub fn params_key(params: &ParamSet) -> String {
    serde_json::to_string(params).unwrap_or_default()
}

/// Render a parameter set as `name=value, ...`
pub fn format_params(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Holding-period statistics reported by the Backtest Runner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoldPeriodStats {
    /// Number of closed trades with a measured holding period
    pub count: u32,
    /// Average holding period in days
    pub average_days: Decimal,
    /// Trades whose holding period fell inside the externally supplied target range
    #[serde(default)]
    pub within_target: Option<u32>,
    /// Per-trade holding periods in days, when the runner reports them
    #[serde(default)]
    pub durations_days: Vec<Decimal>,
}

impl HoldPeriodStats {
    /// Trades within `[min, max]` days, counted from the per-trade durations
    /// when present. The runner's `within_target` is used only without them.
    pub fn count_within(&self, min: Decimal, max: Decimal) -> u32 {
        if self.durations_days.is_empty() {
            return self.within_target.unwrap_or(0);
        }
        self.durations_days
            .iter()
            .filter(|d| **d >= min && **d <= max)
            .count() as u32
    }
}

/// Pre-computed performance statistics for one trial
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_return_pct: Decimal,
    pub sharpe_ratio: Decimal,
    /// Annualized return volatility in percent, if the runner reports it
    #[serde(default)]
    pub volatility_pct: Option<Decimal>,
    /// Drawdown magnitude in percent (positive)
    pub max_drawdown_pct: Decimal,
    pub gross_profit: Decimal,
    /// Gross loss magnitude (positive)
    pub gross_loss: Decimal,
    pub total_trades: u32,
    pub winning_trades: u32,
    #[serde(default)]
    pub hold_periods: HoldPeriodStats,
}

/// Terminal state of a recorded trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Succeeded,
    Failed,
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrialStatus::Succeeded => write!(f, "succeeded"),
            TrialStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One evaluation of a single parameter combination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub index: usize,
    pub params: ParamSet,
    pub status: TrialStatus,
    pub score: f64,
    pub failure_kind: Option<FailureKind>,
    pub failure_message: Option<String>,
    /// Full diagnostic chain, kept for unknown failures only
    pub diagnostics: Option<String>,
    pub stats: Option<PerformanceStats>,
    pub adherence: Option<ConstraintAdherence>,
    pub elapsed: Duration,
}

impl Trial {
    pub fn succeeded(
        index: usize,
        params: ParamSet,
        score: f64,
        stats: PerformanceStats,
        adherence: ConstraintAdherence,
        elapsed: Duration,
    ) -> Self {
        Self {
            index,
            params,
            status: TrialStatus::Succeeded,
            score,
            failure_kind: None,
            failure_message: None,
            diagnostics: None,
            stats: Some(stats),
            adherence: Some(adherence),
            elapsed,
        }
    }

    pub fn failed(
        index: usize,
        params: ParamSet,
        kind: FailureKind,
        message: String,
        diagnostics: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            index,
            params,
            status: TrialStatus::Failed,
            score: FAILED_TRIAL_SCORE,
            failure_kind: Some(kind),
            failure_message: Some(message),
            diagnostics,
            stats: None,
            adherence: None,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TrialStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_param_value_untagged_json() {
        let values: Vec<ParamValue> = serde_json::from_str(r#"[5, 2.5, true, "ema"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                ParamValue::Int(5),
                ParamValue::Float(2.5),
                ParamValue::Bool(true),
                ParamValue::Text("ema".to_string()),
            ]
        );
    }

    #[test]
    fn test_params_key_is_order_independent() {
        let mut a = ParamSet::new();
        a.insert("slow".into(), ParamValue::Int(20));
        a.insert("fast".into(), ParamValue::Int(5));
        let mut b = ParamSet::new();
        b.insert("fast".into(), ParamValue::Int(5));
        b.insert("slow".into(), ParamValue::Int(20));
        assert_eq!(params_key(&a), params_key(&b));
        assert_eq!(format_params(&a), "fast=5, slow=20");
    }

    #[test]
    fn test_hold_period_count_within() {
        let stats = HoldPeriodStats {
            count: 4,
            average_days: dec!(3),
            within_target: None,
            durations_days: vec![dec!(1), dec!(2), dec!(4), dec!(6)],
        };
        assert_eq!(stats.count_within(dec!(2), dec!(5)), 2);

        let reported = HoldPeriodStats {
            within_target: Some(3),
            durations_days: Vec::new(),
            ..stats
        };
        assert_eq!(reported.count_within(dec!(2), dec!(5)), 3);
    }

    #[test]
    fn test_durations_win_over_reported_count() {
        // Runner counted against some other range
        let stats = HoldPeriodStats {
            count: 10,
            average_days: dec!(9),
            within_target: Some(6),
            durations_days: vec![dec!(8); 10],
        };
        assert_eq!(stats.count_within(dec!(2), dec!(5)), 0);
    }

    #[test]
    fn test_failed_trial_uses_sentinel_score() {
        let trial = Trial::failed(
            0,
            ParamSet::new(),
            FailureKind::DataError,
            "not enough bars".to_string(),
            None,
            Duration::from_millis(3),
        );
        assert_eq!(trial.score, FAILED_TRIAL_SCORE);
        assert!(!trial.is_success());
        assert!(trial.score.is_finite());
    }
}
