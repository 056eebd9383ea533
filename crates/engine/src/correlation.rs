// crates/engine/src/correlation.rs
use analytics::metric_correlations;
use common::*;
use std::sync::Arc;

use crate::WeightLearner;

pub const DEFAULT_CORRELATION_ALPHA: f64 = 0.1;

/// Nudges each weight toward metrics that historically moved with realized
/// P&L: `w[m] = clip(w[m] + alpha * corr[m], 0, 1)`, then renormalize.
///
/// Stateless apart from the weight vector itself; every invocation applies.
pub struct CorrelationWeightLearner {
    alpha: f64,
    weights: MetricWeightStore,
    performance: Arc<dyn PerformanceLog>,
}

impl CorrelationWeightLearner {
    pub fn new(alpha: f64, weights: MetricWeightStore, performance: Arc<dyn PerformanceLog>) -> Result<Self> {
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(Error::Config(format!(
                "correlation step size must be finite and non-negative, got {}",
                alpha
            )));
        }
        Ok(Self {
            alpha,
            weights,
            performance,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl WeightLearner for CorrelationWeightLearner {
    fn kind(&self) -> LearnerKind {
        LearnerKind::Correlation
    }

    fn weight_store(&self) -> &MetricWeightStore {
        &self.weights
    }

    fn update(&self) -> Result<UpdateOutcome> {
        let _cycle = self.weights.lock_cycle()?;

        let w_old = self.weights.load()?;
        let records = self.performance.records()?;

        metrics::counter!("learner_cycles_total", "learner" => "correlation").increment(1);

        if records.len() < 2 {
            tracing::warn!(records = records.len(), "Not enough P&L history to correlate");
            return Ok(UpdateOutcome::skipped(LearnerKind::Correlation, None, w_old));
        }

        let correlations = metric_correlations(&records, self.weights.metrics());
        let nudged: Vec<f64> = w_old
            .iter()
            .map(|(metric, w)| {
                let corr = correlations.get(metric).copied().unwrap_or(0.0);
                (w + self.alpha * corr).clamp(0.0, 1.0)
            })
            .collect();

        let (w_new, uniform_fallback) = w_old.with_values(&nudged)?.normalized_or_uniform();
        let w_new = self.weights.save(&w_new)?;

        tracing::info!(
            records = records.len(),
            uniform_fallback,
            "Metric weights updated from P&L correlation"
        );

        Ok(UpdateOutcome {
            learner: LearnerKind::Correlation,
            skipped: false,
            intervals: None,
            window: 0,
            records: Some(records.len()),
            reward: 0.0,
            old_weights: w_old,
            new_weights: w_new,
            correlations: Some(correlations),
            uniform_fallback,
            degraded: None,
        })
    }
}
