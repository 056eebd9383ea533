// crates/analytics/src/kpis.rs
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::ledger::period_returns;

pub const TRADING_PERIODS_PER_YEAR: f64 = 252.0;

/// Headline performance figures of an equity curve
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceKpis {
    pub total_return: f64,
    /// Annualized, sample standard deviation
    pub sharpe: f64,
    /// Annualized, downside (negative returns only) deviation
    pub sortino: f64,
    /// Largest peak-to-trough drop relative to the highest peak
    pub max_drawdown: f64,
}

pub fn kpis(values: &[f64]) -> PerformanceKpis {
    let returns = Array1::from(period_returns(values));
    if returns.is_empty() {
        return PerformanceKpis::default();
    }

    let total_return = returns.fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0;
    let mean = returns.mean().unwrap_or(0.0);
    let sharpe = annualized(mean, sample_std(&returns));

    let downside: Array1<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let sortino = annualized(mean, sample_std(&downside));

    PerformanceKpis {
        total_return,
        sharpe,
        sortino,
        max_drawdown: max_drawdown(values),
    }
}

fn sample_std(xs: &Array1<f64>) -> Option<f64> {
    (xs.len() >= 2).then(|| xs.std(1.0))
}

fn annualized(mean: f64, std: Option<f64>) -> f64 {
    match std {
        Some(std) if std > 0.0 && std.is_finite() => {
            TRADING_PERIODS_PER_YEAR.sqrt() * mean / std
        }
        _ => 0.0,
    }
}

fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &v in values {
        peak = peak.max(v);
        worst = worst.max(peak - v);
    }
    if peak > 0.0 { worst / peak } else { 0.0 }
}
