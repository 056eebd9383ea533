// crates/analytics/src/lib.rs - Return-series statistics for the weight learners
pub mod kpis;
pub mod ledger;
pub mod reward;
pub mod stats;

pub use kpis::{kpis, PerformanceKpis, TRADING_PERIODS_PER_YEAR};
pub use ledger::{period_returns, EquityCurveLedger, DEFAULT_MAX_WINDOW};
pub use reward::RewardEstimator;
pub use stats::{metric_correlations, pearson};
