// crates/universe/src/lib.rs
use common::{EntityTable, MetricWeightStore, Result, ScoredEntity};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub mod scoring;

pub use scoring::{CompositeScorer, DEFAULT_TOP_N};

/// Selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub top_n: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// Scores the upstream entity table with the current weights and keeps the
/// latest top-N selection
pub struct CandidateSelector {
    config: SelectionConfig,
    scorer: CompositeScorer,
    weights: MetricWeightStore,
    current_selection: RwLock<Vec<ScoredEntity>>,
}

impl CandidateSelector {
    pub fn new(config: SelectionConfig, weights: MetricWeightStore) -> Self {
        Self {
            config,
            scorer: CompositeScorer::new(),
            weights,
            current_selection: RwLock::new(Vec::new()),
        }
    }

    /// Load weights, score, select. A failure leaves the previous selection
    /// in place.
    pub fn run_cycle(&self, table: &EntityTable) -> Result<Vec<ScoredEntity>> {
        tracing::info!(candidates = table.len(), top_n = self.config.top_n, "Selecting candidates");

        let start = std::time::Instant::now();

        let weights = self.weights.load()?;
        let selection = self
            .scorer
            .select(table, &weights, self.config.top_n)
            .inspect_err(|e| tracing::error!("Candidate selection aborted: {}", e))?;

        *self.current_selection.write() = selection.clone();

        let elapsed = start.elapsed();
        tracing::info!(selected = selection.len(), "Selection complete in {:?}", elapsed);

        metrics::histogram!("selection_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
        metrics::gauge!("selection_size").set(selection.len() as f64);

        Ok(selection)
    }

    /// Get current selection
    pub fn get_selection(&self) -> Vec<ScoredEntity> {
        self.current_selection.read().clone()
    }

    /// Get top N of the current selection
    pub fn get_top(&self, n: usize) -> Vec<ScoredEntity> {
        let selection = self.current_selection.read();
        selection.iter().take(n).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{EntityRecord, MemoryStore, MetricWeights};
    use std::sync::Arc;

    fn selector(metrics: &[&str], top_n: usize) -> (CandidateSelector, MetricWeightStore) {
        let store = MetricWeightStore::new(
            Arc::new(MemoryStore::new()),
            metrics.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        (CandidateSelector::new(SelectionConfig { top_n }, store.clone()), store)
    }

    fn table() -> EntityTable {
        EntityTable::from_rows(vec![
            EntityRecord::new("AAA").with_metric("A", 1.0).with_metric("B", 9.0),
            EntityRecord::new("BBB").with_metric("A", 8.0).with_metric("B", 0.0),
            EntityRecord::new("CCC").with_metric("A", 3.0).with_metric("B", 3.0),
        ])
    }

    #[test]
    fn test_cold_start_uses_uniform_weights() {
        let (selector, _) = selector(&["A", "B"], 2);
        let selection = selector.run_cycle(&table()).unwrap();
        let symbols: Vec<&str> = selection.iter().map(|e| e.record.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAA", "BBB"]);
        assert_eq!(selector.get_selection(), selection);
        assert_eq!(selector.get_top(1).len(), 1);
    }

    #[test]
    fn test_follows_stored_weights() {
        let (selector, store) = selector(&["A", "B"], 1);
        let w: MetricWeights = [("A", 1.0), ("B", 0.0)].into_iter().collect();
        store.save(&w).unwrap();

        let selection = selector.run_cycle(&table()).unwrap();
        assert_eq!(selection[0].record.symbol, "BBB");
    }

    #[test]
    fn test_missing_column_keeps_previous_selection() {
        let (selector, _) = selector(&["A", "B"], 3);
        let first = selector.run_cycle(&table()).unwrap();

        let narrow = EntityTable::from_rows(vec![EntityRecord::new("ZZZ").with_metric("A", 1.0)]);
        assert!(selector.run_cycle(&narrow).unwrap_err().is_fatal());
        assert_eq!(selector.get_selection(), first);
    }
}
