// crates/common/src/lib.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod config;
pub mod error;
pub mod storage;
pub mod weights;

pub use error::{Error, Result};
pub use storage::{
    EquitySeries, FileStore, MemoryStore, MetricWeightStore, PerformanceLog, StateStore,
};
pub use weights::{MetricWeights, SUM_TOLERANCE};

/// Which weight learner owns the weight vector in a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearnerKind {
    /// Reward-driven, entropy-regularized, throttled
    #[default]
    Throttled,
    /// Nudges weights toward metrics correlated with realized P&L
    Correlation,
}

impl fmt::Display for LearnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearnerKind::Throttled => write!(f, "throttled"),
            LearnerKind::Correlation => write!(f, "correlation"),
        }
    }
}

impl std::str::FromStr for LearnerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "throttled" => Ok(LearnerKind::Throttled),
            "correlation" => Ok(LearnerKind::Correlation),
            other => Err(Error::Config(format!("unknown learner kind: {}", other))),
        }
    }
}

/// One candidate row as produced by the upstream ingestion job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub symbol: String,
    /// Metric values; an absent entry is a missing value
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Fields carried through untouched (price, sector, ...)
    #[serde(flatten)]
    pub passthrough: serde_json::Map<String, serde_json::Value>,
}

impl EntityRecord {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(metric.into(), value);
        self
    }
}

/// Entity x metric table. `columns` is the declared column set; a row may
/// still lack a value for a declared column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityTable {
    pub columns: Vec<String>,
    pub rows: Vec<EntityRecord>,
}

impl EntityTable {
    pub fn new(columns: Vec<String>, rows: Vec<EntityRecord>) -> Self {
        Self { columns, rows }
    }

    /// Columns inferred as the union of row metric keys, in first-seen order
    pub fn from_rows(rows: Vec<EntityRecord>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for metric in row.metrics.keys() {
                if !columns.contains(metric) {
                    columns.push(metric.clone());
                }
            }
        }
        Self { columns, rows }
    }

    pub fn has_column(&self, metric: &str) -> bool {
        self.columns.iter().any(|c| c == metric)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Entity plus its composite score and 1-based rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntity {
    #[serde(flatten)]
    pub record: EntityRecord,
    pub score: f64,
    pub rank: usize,
}

/// Portfolio value at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityObservation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl EquityObservation {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    pub fn now(value: f64) -> Self {
        Self::new(Utc::now(), value)
    }
}

/// Persisted counters of the throttled learner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnerState {
    /// Invocations so far, including skipped ones
    pub intervals: u64,
    /// Live vector as it stood before the last applied update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_weights: Option<MetricWeights>,
}

/// Metric values of one past period joined with its realized P&L
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub pnl: f64,
}

/// Audit record of one learner cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub learner: LearnerKind,
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervals: Option<u64>,
    /// Equity observations behind the reward (throttled learner)
    pub window: usize,
    /// P&L records behind the correlations (correlation learner)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    pub reward: f64,
    pub old_weights: MetricWeights,
    pub new_weights: MetricWeights,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlations: Option<BTreeMap<String, f64>>,
    /// The update collapsed to zero and was replaced by the uniform vector
    #[serde(default)]
    pub uniform_fallback: bool,
    /// Set when a failure turned the cycle into a no-op
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl UpdateOutcome {
    /// A cycle that left the weights untouched
    pub fn skipped(learner: LearnerKind, intervals: Option<u64>, weights: MetricWeights) -> Self {
        Self {
            learner,
            skipped: true,
            intervals,
            window: 0,
            records: None,
            reward: 0.0,
            old_weights: weights.clone(),
            new_weights: weights,
            correlations: None,
            uniform_fallback: false,
            degraded: None,
        }
    }

    /// A cycle whose update failed and was absorbed at the cycle boundary
    pub fn degraded(learner: LearnerKind, weights: MetricWeights, error: &Error) -> Self {
        Self {
            degraded: Some(error.to_string()),
            ..Self::skipped(learner, None, weights)
        }
    }

    pub fn is_applied(&self) -> bool {
        !self.skipped
    }

    /// Per-metric weight movement of this cycle
    pub fn deltas(&self) -> BTreeMap<String, f64> {
        self.old_weights.deltas(&self.new_weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learner_kind_parse() {
        assert_eq!("throttled".parse::<LearnerKind>().unwrap(), LearnerKind::Throttled);
        assert_eq!(" Correlation ".parse::<LearnerKind>().unwrap(), LearnerKind::Correlation);
        assert!("bandit".parse::<LearnerKind>().is_err());
    }

    #[test]
    fn test_entity_record_passthrough() {
        let json = r#"{"symbol":"AAPL","metrics":{"Beta":1.2},"Sector":"Technology","Price":190.5}"#;
        let record: EntityRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.symbol, "AAPL");
        assert_eq!(record.metrics.get("Beta"), Some(&1.2));
        assert_eq!(record.passthrough["Sector"], "Technology");

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["Price"], 190.5);
    }

    #[test]
    fn test_table_infers_columns_in_first_seen_order() {
        let table = EntityTable::from_rows(vec![
            EntityRecord::new("X").with_metric("B", 1.0),
            EntityRecord::new("Y").with_metric("A", 2.0).with_metric("B", 0.0),
        ]);
        assert_eq!(table.columns, vec!["B".to_string(), "A".to_string()]);
        assert!(table.has_column("A"));
        assert!(!table.has_column("C"));
    }

    #[test]
    fn test_degraded_outcome_keeps_weights() {
        let w = MetricWeights::uniform(["A", "B"]);
        let outcome = UpdateOutcome::degraded(
            LearnerKind::Throttled,
            w.clone(),
            &Error::Persistence("read-only".into()),
        );
        assert!(outcome.skipped);
        assert_eq!(outcome.old_weights, outcome.new_weights);
        assert!(outcome.degraded.as_ref().unwrap().contains("read-only"));
        assert!(outcome.deltas().values().all(|d| *d == 0.0));
    }

    #[test]
    fn test_outcome_audit_json() {
        let outcome = UpdateOutcome::skipped(
            LearnerKind::Throttled,
            Some(3),
            MetricWeights::uniform(["A", "B"]),
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["learner"], "throttled");
        assert_eq!(json["skipped"], true);
        assert_eq!(json["intervals"], 3);
        assert_eq!(json["new_weights"]["A"], 0.5);
        assert!(json.get("degraded").is_none());
        assert!(json.get("correlations").is_none());
        assert!(json.get("records").is_none());

        let back: UpdateOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }
}
