// crates/analytics/src/reward.rs
use ndarray::ArrayView1;

/// Standard deviations this small relative to |mean| are rounding noise of
/// identical returns
const ZERO_VARIANCE_TOLERANCE: f64 = 1e-12;

/// Windowed, non-annualized Sharpe-like ratio: `mean / std` of the returns
/// (population standard deviation), or 0 when there is no variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct RewardEstimator;

impl RewardEstimator {
    pub fn new() -> Self {
        Self
    }

    pub fn reward(&self, returns: &[f64]) -> f64 {
        let returns = ArrayView1::from(returns);
        let Some(mean) = returns.mean() else {
            return 0.0;
        };
        let std = returns.std(0.0);

        if !mean.is_finite() || !std.is_finite() {
            return 0.0;
        }
        if std <= ZERO_VARIANCE_TOLERANCE * mean.abs() {
            return 0.0;
        }
        mean / std
    }
}
