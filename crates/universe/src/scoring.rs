// crates/universe/src/scoring.rs
use common::{EntityRecord, EntityTable, Error, MetricWeights, Result, ScoredEntity};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;

pub const DEFAULT_TOP_N: usize = 250;

/// Composite scorer: `score(e) = Σ_m weight[m] * value(e, m)`.
///
/// A weighted metric missing from the table's columns is a configuration
/// error. A value missing for a single entity (or non-finite) counts as 0,
/// which biases sparse entities downward rather than upward.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositeScorer;

impl CompositeScorer {
    pub fn new() -> Self {
        Self
    }

    /// Every weighted metric must be a declared column
    pub fn check_columns(&self, table: &EntityTable, weights: &MetricWeights) -> Result<()> {
        let missing: Vec<&str> = weights.metrics().filter(|m| !table.has_column(m)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!("missing metrics: {:?}", missing)))
        }
    }

    pub fn score_entity(&self, record: &EntityRecord, weights: &MetricWeights) -> f64 {
        weights
            .iter()
            .map(|(metric, weight)| weight * metric_value(record, metric))
            .sum()
    }

    /// Scores in table order, unranked
    pub fn score(&self, table: &EntityTable, weights: &MetricWeights) -> Result<Vec<ScoredEntity>> {
        self.check_columns(table, weights)?;

        Ok(table
            .rows
            .iter()
            .map(|record| ScoredEntity {
                record: record.clone(),
                score: self.score_entity(record, weights),
                rank: 0,
            })
            .collect())
    }

    /// Top `top_n` by descending score, ranked from 1.
    ///
    /// The sort is stable, so equal scores keep table order and the first
    /// occurrence wins.
    pub fn select(
        &self,
        table: &EntityTable,
        weights: &MetricWeights,
        top_n: usize,
    ) -> Result<Vec<ScoredEntity>> {
        let mut scored = self.score(table, weights)?;
        scored.sort_by_key(|e| Reverse(OrderedFloat(e.score)));
        scored.truncate(top_n);

        for (i, entity) in scored.iter_mut().enumerate() {
            entity.rank = i + 1;
        }
        Ok(scored)
    }
}

fn metric_value(record: &EntityRecord, metric: &str) -> f64 {
    record
        .metrics
        .get(metric)
        .copied()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}
