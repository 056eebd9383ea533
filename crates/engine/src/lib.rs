// crates/engine/src/lib.rs - Weight learning cycle
//
// Exactly one learner owns the weight vector per deployment. Running both
// against the same vector in one cycle would only break normalization until
// the last writer renormalizes, but it interleaves two update rules, so the
// active learner is chosen once from configuration in `build_learner`.

pub mod correlation;
pub mod throttled;
pub mod tick;

use common::config::AppConfig;
use common::*;
use std::sync::Arc;

pub use correlation::CorrelationWeightLearner;
pub use throttled::{ThrottleParams, ThrottledWeightLearner};
pub use tick::{run_tick, TickReport, ENTITY_TABLE_FILE, SELECTION_FILE};

/// A learner that reads and rewrites the persisted weight vector
pub trait WeightLearner: Send + Sync {
    fn kind(&self) -> LearnerKind;

    fn weight_store(&self) -> &MetricWeightStore;

    /// One invocation. Either a fully valid vector is persisted or the prior
    /// one is left untouched.
    fn update(&self) -> Result<UpdateOutcome>;
}

/// Storage handles the learners read from and write to
#[derive(Clone)]
pub struct LearnerStores {
    pub state: Arc<dyn StateStore>,
    pub equity: Arc<dyn EquitySeries>,
    pub performance: Arc<dyn PerformanceLog>,
}

impl LearnerStores {
    pub fn from_file_store(files: Arc<FileStore>) -> Self {
        Self {
            state: files.clone(),
            equity: files.clone(),
            performance: files,
        }
    }

    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            state: store.clone(),
            equity: store.clone(),
            performance: store,
        }
    }
}

/// Build the single active learner selected by `config.learner.kind`
pub fn build_learner(config: &AppConfig, stores: &LearnerStores) -> Result<Box<dyn WeightLearner>> {
    let weights = MetricWeightStore::new(stores.state.clone(), config.scoring.metrics.clone())?;

    let learner: Box<dyn WeightLearner> = match config.learner.kind {
        LearnerKind::Throttled => Box::new(ThrottledWeightLearner::new(
            ThrottleParams::from(&config.learner),
            weights,
            stores.state.clone(),
            stores.equity.clone(),
        )?),
        LearnerKind::Correlation => Box::new(CorrelationWeightLearner::new(
            config.learner.correlation_alpha,
            weights,
            stores.performance.clone(),
        )?),
    };

    tracing::info!(learner = %learner.kind(), "Weight learner selected");
    Ok(learner)
}

/// Per-cycle boundary. A failed update is logged and reported as a skipped,
/// degraded outcome instead of propagating: a missed learning cycle is
/// recoverable, a crashed scheduler is not.
pub fn run_cycle(learner: &dyn WeightLearner) -> UpdateOutcome {
    let kind = learner.kind();

    match learner.update() {
        Ok(outcome) => {
            if outcome.is_applied() {
                metrics::counter!("learner_updates_applied_total", "learner" => kind.to_string())
                    .increment(1);
            }
            tracing::debug!(
                learner = %kind,
                skipped = outcome.skipped,
                window = outcome.window,
                reward = outcome.reward,
                "Learner cycle complete"
            );
            outcome
        }
        Err(e) => {
            tracing::error!(learner = %kind, "Weight update failed, keeping previous weights: {}", e);
            metrics::counter!("learner_updates_degraded_total", "learner" => kind.to_string())
                .increment(1);

            let weights = learner.weight_store().load().unwrap_or_else(|load_err| {
                tracing::warn!("Could not reload weights for the audit record: {}", load_err);
                MetricWeights::default()
            });
            UpdateOutcome::degraded(kind, weights, &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: LearnerKind) -> AppConfig {
        let mut config = AppConfig::default();
        config.scoring.metrics = vec!["A".to_string(), "B".to_string()];
        config.learner.kind = kind;
        config
    }

    #[test]
    fn test_build_selects_configured_learner() {
        let stores = LearnerStores::in_memory(Arc::new(MemoryStore::new()));

        let learner = build_learner(&config(LearnerKind::Throttled), &stores).unwrap();
        assert_eq!(learner.kind(), LearnerKind::Throttled);

        let learner = build_learner(&config(LearnerKind::Correlation), &stores).unwrap();
        assert_eq!(learner.kind(), LearnerKind::Correlation);
    }

    #[test]
    fn test_run_cycle_degrades_on_persistence_failure() {
        let store = Arc::new(MemoryStore::with_equity(&[100.0, 101.0, 103.0, 102.0]));
        let stores = LearnerStores::in_memory(store.clone());
        let learner = build_learner(&config(LearnerKind::Throttled), &stores).unwrap();

        store.set_read_only(true);
        let outcome = run_cycle(learner.as_ref());
        assert!(outcome.skipped);
        assert!(outcome.degraded.is_some());
        assert_eq!(outcome.old_weights, MetricWeights::uniform(["A", "B"]));
        assert_eq!(outcome.old_weights, outcome.new_weights);
    }

    #[test]
    fn test_run_cycle_passes_outcome_through() {
        let stores = LearnerStores::in_memory(Arc::new(MemoryStore::new()));
        let learner = build_learner(&config(LearnerKind::Throttled), &stores).unwrap();

        let outcomes: Vec<UpdateOutcome> = (0..4).map(|_| run_cycle(learner.as_ref())).collect();
        let skipped: Vec<bool> = outcomes.iter().map(|o| o.skipped).collect();
        assert_eq!(skipped, vec![true, true, true, false]);
        assert!(outcomes.iter().all(|o| o.degraded.is_none()));
    }
}
