// crates/analytics/src/ledger.rs
use common::{EquityObservation, EquitySeries, Error, Result};
use std::sync::Arc;

use crate::kpis::{kpis, PerformanceKpis};

/// Cap on how many trailing observations feed a return window
pub const DEFAULT_MAX_WINDOW: usize = 20;

/// Read side of the equity curve plus a validated append path.
///
/// The series is never reordered or deduplicated here; whatever the writer
/// appended is what the returns are computed from.
pub struct EquityCurveLedger {
    series: Arc<dyn EquitySeries>,
    max_window: usize,
}

impl EquityCurveLedger {
    pub fn new(series: Arc<dyn EquitySeries>, max_window: usize) -> Self {
        Self { series, max_window }
    }

    pub fn max_window(&self) -> usize {
        self.max_window
    }

    /// `window` capped at the configured maximum
    pub fn effective_window(&self, window: usize) -> usize {
        window.min(self.max_window)
    }

    pub fn append(&self, observation: EquityObservation) -> Result<()> {
        if !observation.value.is_finite() || observation.value <= 0.0 {
            return Err(Error::InvalidData(format!(
                "portfolio value must be positive and finite, got {}",
                observation.value
            )));
        }
        self.series.append(&observation)
    }

    /// Append the current portfolio value stamped with the current time
    pub fn record(&self, value: f64) -> Result<EquityObservation> {
        let observation = EquityObservation::now(value);
        self.append(observation)?;
        tracing::debug!(value, "equity observation recorded");
        Ok(observation)
    }

    pub fn observations(&self) -> Result<Vec<EquityObservation>> {
        self.series.observations()
    }

    /// Fractional returns over the most recent `window` observations (capped).
    /// Yields `window - 1` returns at most; empty with fewer than two
    /// observations.
    pub fn returns(&self, window: usize) -> Result<Vec<f64>> {
        let window = self.effective_window(window);
        let values: Vec<f64> = self
            .series
            .tail(window)?
            .iter()
            .map(|o| o.value)
            .collect();
        Ok(period_returns(&values))
    }

    /// Whole-history KPIs
    pub fn kpis(&self) -> Result<PerformanceKpis> {
        let values: Vec<f64> = self.observations()?.iter().map(|o| o.value).collect();
        Ok(kpis(&values))
    }
}

/// `r_t = (v_t - v_{t-1}) / v_{t-1}`; the undefined first return is dropped,
/// as is any non-finite return (zero previous value).
pub fn period_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter_map(|pair| {
            let r = (pair[1] - pair[0]) / pair[0];
            if r.is_finite() {
                Some(r)
            } else {
                tracing::debug!(prev = pair[0], next = pair[1], "dropping undefined return");
                None
            }
        })
        .collect()
}
