// crates/engine/src/tick.rs
use analytics::EquityCurveLedger;
use common::config::AppConfig;
use common::*;
use serde::Serialize;
use std::sync::Arc;
use universe::{CandidateSelector, SelectionConfig};

use crate::{build_learner, run_cycle, LearnerStores};

/// Upstream entity table, dropped into the state directory by ingestion
pub const ENTITY_TABLE_FILE: &str = "entity_metrics.json";
pub const SELECTION_FILE: &str = "top_selection.json";

/// Everything one scheduling tick did
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    /// Size of the published selection; `None` if nothing was published
    pub selected: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equity_error: Option<String>,
    pub outcome: UpdateOutcome,
}

impl TickReport {
    /// No step of the tick failed
    pub fn is_clean(&self) -> bool {
        self.selection_error.is_none() && self.equity_error.is_none() && self.outcome.degraded.is_none()
    }
}

/// Publish the selection, record the portfolio value, run the active learner.
///
/// A failed selection or equity append is logged and reported but never
/// costs the learner its cycle. Only an unusable learner configuration is
/// returned as an error.
pub fn run_tick(
    config: &AppConfig,
    files: Arc<FileStore>,
    portfolio_value: Option<f64>,
) -> Result<TickReport> {
    let stores = LearnerStores::from_file_store(files.clone());

    let (selected, selection_error) = match publish_selection(config, &files, &stores) {
        Ok(selected) => (selected, None),
        Err(e) => {
            tracing::error!("Selection step aborted, continuing with learning: {}", e);
            (None, Some(e.to_string()))
        }
    };

    let equity_error = portfolio_value.and_then(|value| {
        let ledger = EquityCurveLedger::new(stores.equity.clone(), config.learner.max_window);
        match ledger.record(value) {
            Ok(_) => {
                tracing::info!(value, "Portfolio value recorded");
                None
            }
            Err(e) => {
                tracing::error!(value, "Portfolio value not recorded: {}", e);
                Some(e.to_string())
            }
        }
    });

    let learner = build_learner(config, &stores)?;
    let outcome = run_cycle(learner.as_ref());

    Ok(TickReport {
        selected,
        selection_error,
        equity_error,
        outcome,
    })
}

/// Score the entity table, if present, and write the ranked top-N next to it
fn publish_selection(config: &AppConfig, files: &FileStore, stores: &LearnerStores) -> Result<Option<usize>> {
    let Some(rows) = files.read_document::<Vec<EntityRecord>>(ENTITY_TABLE_FILE)? else {
        tracing::warn!("No {} in state directory, skipping selection", ENTITY_TABLE_FILE);
        return Ok(None);
    };

    let weights = MetricWeightStore::new(stores.state.clone(), config.scoring.metrics.clone())?;
    let selector = CandidateSelector::new(
        SelectionConfig {
            top_n: config.scoring.top_n,
        },
        weights,
    );

    let selection = selector.run_cycle(&EntityTable::from_rows(rows))?;
    files.write_document(SELECTION_FILE, &selection)?;
    tracing::info!(selected = selection.len(), "Selection written to {}", SELECTION_FILE);
    Ok(Some(selection.len()))
}
