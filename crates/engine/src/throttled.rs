// crates/engine/src/throttled.rs
use analytics::{EquityCurveLedger, RewardEstimator};
use common::config::LearnerSection;
use common::*;
use ndarray::Array1;
use std::sync::Arc;

use crate::WeightLearner;

/// Floor applied to weights before taking the log in the entropy gradient
const ENTROPY_EPSILON: f64 = 1e-12;

/// Hyper-parameters of the throttled learner
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleParams {
    /// Apply an update on every n-th invocation only
    pub cycles_per_update: u64,
    /// Cap on the trailing equity window
    pub max_window: usize,
    /// Step size of the reward-driven component
    pub eta_base: f64,
    /// Share of the old vector kept when smoothing (0.9 = move 10% per update)
    pub alpha: f64,
    pub beta_entropy: f64,
    pub eta_turnover: f64,
}

impl Default for ThrottleParams {
    fn default() -> Self {
        Self::from(&LearnerSection::default())
    }
}

impl From<&LearnerSection> for ThrottleParams {
    fn from(section: &LearnerSection) -> Self {
        Self {
            cycles_per_update: section.cycles_per_update,
            max_window: section.max_window,
            eta_base: section.eta_base,
            alpha: section.alpha,
            beta_entropy: section.beta_entropy,
            eta_turnover: section.eta_turnover,
        }
    }
}

/// Reward-driven learner that only acts every `cycles_per_update`
/// invocations.
///
/// Each applied update moves the weights by a uniform reward step plus an
/// entropy gradient (toward uniform) plus a turnover penalty (against
/// repeating the previous update's movement), clips at zero, smooths against
/// the old vector and renormalizes.
///
/// One invocation (count, gate, compute, persist) runs under the state
/// store's cycle lock, so overlapping calls never observe the same counter,
/// even from separate processes sharing a state directory.
pub struct ThrottledWeightLearner {
    params: ThrottleParams,
    weights: MetricWeightStore,
    state: Arc<dyn StateStore>,
    ledger: EquityCurveLedger,
    estimator: RewardEstimator,
}

impl ThrottledWeightLearner {
    pub fn new(
        params: ThrottleParams,
        weights: MetricWeightStore,
        state: Arc<dyn StateStore>,
        equity: Arc<dyn EquitySeries>,
    ) -> Result<Self> {
        if params.cycles_per_update == 0 {
            return Err(Error::Config("cycles_per_update must be positive".to_string()));
        }
        let ledger = EquityCurveLedger::new(equity, params.max_window);

        tracing::info!(
            cycles_per_update = params.cycles_per_update,
            max_window = params.max_window,
            "Throttled weight learner ready"
        );

        Ok(Self {
            params,
            weights,
            state,
            ledger,
            estimator: RewardEstimator::new(),
        })
    }

    pub fn params(&self) -> &ThrottleParams {
        &self.params
    }

    /// Returns over the window for this interval, with the window size
    /// actually used (0 when the ledger has no usable history)
    fn windowed_reward(&self, intervals: u64) -> Result<(usize, f64)> {
        let requested = usize::try_from(intervals)
            .unwrap_or(usize::MAX)
            .min(self.params.max_window);
        let window = self.ledger.effective_window(requested);
        let returns = self.ledger.returns(window)?;

        if returns.is_empty() {
            let reason = Error::DataUnavailable(format!(
                "fewer than 2 equity observations in a window of {}",
                window
            ));
            tracing::warn!(intervals, "{}; using zero reward", reason);
            return Ok((0, 0.0));
        }
        Ok((window, self.estimator.reward(&returns)))
    }

    /// The previous vector, if it still matches the configured key set
    fn previous_weights(&self, state: &LearnerState) -> Option<Array1<f64>> {
        let previous = state.previous_weights.as_ref()?;
        if !previous.has_keys(self.weights.metrics()) {
            tracing::warn!("stored previous weights have foreign keys, ignoring turnover");
            return None;
        }
        Some(Array1::from(previous.values()))
    }
}

impl WeightLearner for ThrottledWeightLearner {
    fn kind(&self) -> LearnerKind {
        LearnerKind::Throttled
    }

    fn weight_store(&self) -> &MetricWeightStore {
        &self.weights
    }

    fn update(&self) -> Result<UpdateOutcome> {
        let _cycle = self.weights.lock_cycle()?;

        // Count the invocation before anything else can fail.
        let w_old = self.weights.load()?;
        let mut state = self.state.load_learner_state()?.unwrap_or_default();
        state.intervals += 1;
        self.state.save_learner_state(&state)?;
        let intervals = state.intervals;

        metrics::counter!("learner_cycles_total", "learner" => "throttled").increment(1);

        if intervals % self.params.cycles_per_update != 0 {
            tracing::debug!(
                intervals,
                cycles_per_update = self.params.cycles_per_update,
                "Waiting for next update slot"
            );
            return Ok(UpdateOutcome::skipped(
                LearnerKind::Throttled,
                Some(intervals),
                w_old,
            ));
        }

        let (window, reward) = self.windowed_reward(intervals)?;

        let old = Array1::from(w_old.values());
        let previous = self.previous_weights(&state);
        let stepped = smoothed_step(&self.params, &old, previous.as_ref(), reward);
        let (w_new, uniform_fallback) = w_old.with_values(&stepped.to_vec())?.normalized_or_uniform();

        // Counters first: if the weight write fails the old vector stays live
        // and the next turnover term is simply zero.
        state.previous_weights = Some(w_old.clone());
        self.state.save_learner_state(&state)?;
        let w_new = self.weights.save(&w_new)?;

        tracing::info!(intervals, window, reward, uniform_fallback, "Metric weights updated");
        metrics::gauge!("learner_reward", "learner" => "throttled").set(reward);

        Ok(UpdateOutcome {
            learner: LearnerKind::Throttled,
            skipped: false,
            intervals: Some(intervals),
            window,
            records: None,
            reward,
            old_weights: w_old,
            new_weights: w_new,
            correlations: None,
            uniform_fallback,
            degraded: None,
        })
    }
}

/// `∂/∂w [-Σ w ln w] = -(1 + ln w)`, with w floored at a tiny epsilon
pub fn entropy_gradient(w: &Array1<f64>) -> Array1<f64> {
    w.mapv(|x| -(1.0 + x.max(ENTROPY_EPSILON).ln()))
}

/// One update before renormalization: tentative step clipped at zero, then
/// smoothed against the old vector.
pub fn smoothed_step(
    params: &ThrottleParams,
    w_old: &Array1<f64>,
    previous: Option<&Array1<f64>>,
    reward: f64,
) -> Array1<f64> {
    let entropy = entropy_gradient(w_old) * params.beta_entropy;
    let turnover = match previous {
        Some(prev) => (w_old - prev) * -params.eta_turnover,
        None => Array1::zeros(w_old.len()),
    };

    let tentative = (w_old + params.eta_base * reward + &entropy + &turnover).mapv(|x| x.max(0.0));
    w_old * params.alpha + tentative * (1.0 - params.alpha)
}
