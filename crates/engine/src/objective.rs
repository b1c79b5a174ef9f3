//! Objective functions: performance statistics → one comparable score
//!
//! Higher is always better. Scorers whose natural metric is "lower is better"
//! negate it so the engine can always take the maximum.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::PerformanceStats;

/// Returned by `ProfitFactor` when there is profit and no loss
pub const PROFIT_FACTOR_CAP: f64 = 999.99;

/// Subtracted in full from the score of a trial with zero of `min_trades`
pub const MIN_TRADES_PENALTY: f64 = 1_000.0;

/// Exact, case-sensitive names accepted by [`build_objective`]
pub const REGISTERED_OBJECTIVES: &[&str] = &[
    "SharpeRatio",
    "TotalReturn",
    "MaxDrawdown",
    "ProfitFactor",
    "WinRate",
    "SharpeWithHoldPeriodConstraint",
];

/// Business-rule constraints a trial is scored against
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSpec {
    /// Inclusive `(min, max)` holding period in days
    #[serde(default)]
    pub target_hold_period_days: Option<(f64, f64)>,
    #[serde(default)]
    pub min_trades: Option<u32>,
}

impl ConstraintSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some((min, max)) = self.target_hold_period_days {
            if !min.is_finite() || !max.is_finite() {
                return Err(ConfigError::InvalidConstraint(
                    "target_hold_period_days bounds must be finite".to_string(),
                ));
            }
            if min < 0.0 {
                return Err(ConfigError::InvalidConstraint(format!(
                    "target_hold_period_days min must be >= 0 (got {})",
                    min
                )));
            }
            if min > max {
                return Err(ConfigError::InvalidConstraint(format!(
                    "target_hold_period_days min {} exceeds max {}",
                    min, max
                )));
            }
        }
        Ok(())
    }

    fn hold_range(&self) -> Option<(Decimal, Decimal)> {
        let (min, max) = self.target_hold_period_days?;
        Some((
            Decimal::from_f64_retain(min)?,
            Decimal::from_f64_retain(max)?,
        ))
    }
}

/// How well a trial satisfied the declared constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintAdherence {
    pub total_trades: u32,
    /// Trades whose holding period fell in the target range
    pub trades_in_range: Option<u32>,
    /// `trades_in_range / total_trades`, 0 with no trades
    pub hold_period_fraction: Option<f64>,
    pub min_trades_met: Option<bool>,
    /// Amount subtracted from the raw score
    pub penalty: f64,
    pub violations: Vec<String>,
}

/// A scored trial
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveScore {
    pub value: f64,
    pub adherence: ConstraintAdherence,
}

/// Objective-specific parameters from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveParams {
    /// Annual risk-free rate as a fraction (0.02 = 2%)
    #[serde(default)]
    pub risk_free_rate: f64,
}

/// Converts a trial's statistics into a score. Implementations are stateless.
pub trait ObjectiveFunction: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score before constraint handling
    fn raw_score(
        &self,
        stats: &PerformanceStats,
        constraints: Option<&ConstraintSpec>,
        adherence: &mut ConstraintAdherence,
    ) -> f64;

    /// Constraint checks are rejected at setup when this returns an error.
    fn check_constraints(&self, _constraints: Option<&ConstraintSpec>) -> Result<(), ConfigError> {
        Ok(())
    }

    fn score(
        &self,
        stats: &PerformanceStats,
        constraints: Option<&ConstraintSpec>,
    ) -> ObjectiveScore {
        let mut adherence = ConstraintAdherence {
            total_trades: stats.total_trades,
            ..Default::default()
        };

        let raw = self.raw_score(stats, constraints, &mut adherence);

        if let Some(min) = constraints.and_then(|c| c.min_trades) {
            apply_min_trades(stats.total_trades, min, &mut adherence);
        }

        ObjectiveScore {
            value: raw - adherence.penalty,
            adherence,
        }
    }
}

fn apply_min_trades(total: u32, min: u32, adherence: &mut ConstraintAdherence) {
    let met = total >= min;
    adherence.min_trades_met = Some(met);
    if !met {
        let shortfall = (min - total) as f64 / min as f64;
        adherence.penalty += MIN_TRADES_PENALTY * shortfall;
        adherence
            .violations
            .push(format!("min_trades: {} < {}", total, min));
    }
}

fn to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Sharpe ratio adjusted by the risk-free rate when volatility is known
fn adjusted_sharpe(stats: &PerformanceStats, risk_free_rate: f64) -> f64 {
    let sharpe = to_f64(stats.sharpe_ratio);
    match stats.volatility_pct.map(to_f64) {
        Some(vol) if vol > 0.0 && risk_free_rate != 0.0 => sharpe - risk_free_rate * 100.0 / vol,
        _ => sharpe,
    }
}

// ============================================================================
// Scorers
// ============================================================================

pub struct SharpeRatio {
    pub risk_free_rate: f64,
}

impl ObjectiveFunction for SharpeRatio {
    fn name(&self) -> &'static str {
        "SharpeRatio"
    }

    fn raw_score(
        &self,
        stats: &PerformanceStats,
        _: Option<&ConstraintSpec>,
        _: &mut ConstraintAdherence,
    ) -> f64 {
        adjusted_sharpe(stats, self.risk_free_rate)
    }
}

pub struct TotalReturn;

impl ObjectiveFunction for TotalReturn {
    fn name(&self) -> &'static str {
        "TotalReturn"
    }

    fn raw_score(
        &self,
        stats: &PerformanceStats,
        _: Option<&ConstraintSpec>,
        _: &mut ConstraintAdherence,
    ) -> f64 {
        to_f64(stats.total_return_pct)
    }
}

/// Negated drawdown magnitude: 0 is the best possible score
pub struct MaxDrawdown;

impl ObjectiveFunction for MaxDrawdown {
    fn name(&self) -> &'static str {
        "MaxDrawdown"
    }

    fn raw_score(
        &self,
        stats: &PerformanceStats,
        _: Option<&ConstraintSpec>,
        _: &mut ConstraintAdherence,
    ) -> f64 {
        let dd = to_f64(stats.max_drawdown_pct.abs());
        if dd == 0.0 {
            0.0
        } else {
            -dd
        }
    }
}

pub struct ProfitFactor;

impl ObjectiveFunction for ProfitFactor {
    fn name(&self) -> &'static str {
        "ProfitFactor"
    }

    fn raw_score(
        &self,
        stats: &PerformanceStats,
        _: Option<&ConstraintSpec>,
        _: &mut ConstraintAdherence,
    ) -> f64 {
        let profit = stats.gross_profit;
        let loss = stats.gross_loss.abs();
        if loss > Decimal::ZERO {
            to_f64(profit / loss)
        } else if profit > Decimal::ZERO {
            PROFIT_FACTOR_CAP
        } else {
            0.0
        }
    }
}

/// Fraction of profitable trades
pub struct WinRate;

impl ObjectiveFunction for WinRate {
    fn name(&self) -> &'static str {
        "WinRate"
    }

    fn raw_score(
        &self,
        stats: &PerformanceStats,
        _: Option<&ConstraintSpec>,
        _: &mut ConstraintAdherence,
    ) -> f64 {
        if stats.total_trades == 0 {
            return 0.0;
        }
        stats.winning_trades as f64 / stats.total_trades as f64
    }
}

/// `sharpe * trades_in_range / total_trades`
///
/// A trial with no trades scores 0 and is always flagged as missing its trade
/// minimum (at least one trade, or the configured `min_trades`), so it also
/// carries the min-trades penalty.
pub struct SharpeWithHoldPeriodConstraint {
    pub risk_free_rate: f64,
}

impl ObjectiveFunction for SharpeWithHoldPeriodConstraint {
    fn name(&self) -> &'static str {
        "SharpeWithHoldPeriodConstraint"
    }

    fn check_constraints(&self, constraints: Option<&ConstraintSpec>) -> Result<(), ConfigError> {
        match constraints {
            Some(c) if c.target_hold_period_days.is_some() => Ok(()),
            _ => Err(ConfigError::InvalidConstraint(
                "SharpeWithHoldPeriodConstraint requires target_hold_period_days".to_string(),
            )),
        }
    }

    fn raw_score(
        &self,
        stats: &PerformanceStats,
        constraints: Option<&ConstraintSpec>,
        adherence: &mut ConstraintAdherence,
    ) -> f64 {
        let sharpe = adjusted_sharpe(stats, self.risk_free_rate);
        let total = stats.total_trades;

        let in_range = constraints
            .and_then(|c| c.hold_range())
            .map(|(min, max)| stats.hold_periods.count_within(min, max).min(total))
            .unwrap_or(0);

        let fraction = if total == 0 {
            0.0
        } else {
            in_range as f64 / total as f64
        };

        adherence.trades_in_range = Some(in_range);
        adherence.hold_period_fraction = Some(fraction);

        if total == 0 && constraints.and_then(|c| c.min_trades).is_none() {
            apply_min_trades(0, 1, adherence);
        }

        sharpe * fraction
    }
}

/// Build a registered objective by exact name.
pub fn build_objective(
    name: &str,
    params: &ObjectiveParams,
) -> Result<Box<dyn ObjectiveFunction>, ConfigError> {
    let objective: Box<dyn ObjectiveFunction> = match name {
        "SharpeRatio" => Box::new(SharpeRatio {
            risk_free_rate: params.risk_free_rate,
        }),
        "TotalReturn" => Box::new(TotalReturn),
        "MaxDrawdown" => Box::new(MaxDrawdown),
        "ProfitFactor" => Box::new(ProfitFactor),
        "WinRate" => Box::new(WinRate),
        "SharpeWithHoldPeriodConstraint" => Box::new(SharpeWithHoldPeriodConstraint {
            risk_free_rate: params.risk_free_rate,
        }),
        other => {
            return Err(ConfigError::UnknownObjective {
                name: other.to_string(),
                registered: REGISTERED_OBJECTIVES.to_vec(),
            })
        }
    };
    Ok(objective)
}
