// crates/engine/tests/learning_cycle.rs
use analytics::EquityCurveLedger;
use common::config::AppConfig;
use common::*;
use engine::*;
use std::sync::Arc;
use universe::{CandidateSelector, SelectionConfig};

fn config(kind: LearnerKind, state_dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.state_dir = state_dir.to_path_buf();
    config.scoring.metrics = vec!["Momentum".to_string(), "Value".to_string()];
    config.scoring.top_n = 2;
    config.learner.kind = kind;
    config.learner.cycles_per_update = 2;
    config
}

fn table() -> EntityTable {
    EntityTable::from_rows(vec![
        EntityRecord::new("MOMO").with_metric("Momentum", 10.0).with_metric("Value", 0.0),
        EntityRecord::new("VALU").with_metric("Momentum", 0.0).with_metric("Value", 10.0),
        EntityRecord::new("FLAT").with_metric("Momentum", 1.0).with_metric("Value", 1.0),
    ])
}

#[test]
fn throttled_cycles_persist_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(LearnerKind::Throttled, dir.path());
    let files = Arc::new(FileStore::new(dir.path()));
    let stores = LearnerStores::from_file_store(files.clone());

    let ledger = EquityCurveLedger::new(stores.equity.clone(), config.learner.max_window);
    for value in [100.0, 101.0, 99.5, 102.0, 103.5] {
        ledger.record(value).unwrap();
    }

    let learner = build_learner(&config, &stores).unwrap();
    let first = run_cycle(learner.as_ref());
    let second = run_cycle(learner.as_ref());
    assert!(first.skipped);
    assert!(second.is_applied());
    assert_eq!(second.window, 2);
    drop(learner);

    // a fresh process picks the counter up from disk
    let learner = build_learner(&config, &stores).unwrap();
    let third = run_cycle(learner.as_ref());
    let fourth = run_cycle(learner.as_ref());
    assert_eq!(third.intervals, Some(3));
    assert!(third.skipped);
    assert_eq!(fourth.intervals, Some(4));
    assert!(fourth.is_applied());
    assert_eq!(fourth.window, 4);

    let state = files.load_learner_state().unwrap().unwrap();
    assert_eq!(state.intervals, 4);
    assert_eq!(state.previous_weights, Some(fourth.old_weights.clone()));

    let stored = files.load_weights().unwrap().unwrap();
    assert!(stored.is_normalized());
    assert_eq!(stored, fourth.new_weights);
    assert!(dir.path().join(storage::WEIGHTS_FILE).exists());
}

#[test]
fn correlation_learner_steers_selection() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(LearnerKind::Correlation, dir.path());
    let files = Arc::new(FileStore::new(dir.path()));
    let stores = LearnerStores::from_file_store(files.clone());

    // momentum tracked P&L, value ran against it
    for (momentum, value, pnl) in [(1.0, 4.0, -5.0), (2.0, 3.0, 0.0), (3.0, 2.0, 4.0), (4.0, 1.0, 9.0)] {
        PerformanceLog::append(
            files.as_ref(),
            &PerformanceRecord {
                metrics: [("Momentum".to_string(), momentum), ("Value".to_string(), value)]
                    .into_iter()
                    .collect(),
                pnl,
            },
        )
        .unwrap();
    }

    let weights = MetricWeightStore::new(stores.state.clone(), config.scoring.metrics.clone()).unwrap();
    let selector = CandidateSelector::new(
        SelectionConfig {
            top_n: config.scoring.top_n,
        },
        weights,
    );

    // uniform weights: MOMO and VALU tie, table order wins
    let before = selector.run_cycle(&table()).unwrap();
    let symbols: Vec<&str> = before.iter().map(|e| e.record.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["MOMO", "VALU"]);

    let learner = build_learner(&config, &stores).unwrap();
    for _ in 0..3 {
        let outcome = run_cycle(learner.as_ref());
        assert!(outcome.is_applied());
        assert!(outcome.degraded.is_none());
    }

    let learned = files.load_weights().unwrap().unwrap();
    assert!(learned.is_normalized());
    assert!(learned.get("Momentum").unwrap() > learned.get("Value").unwrap());

    let after = selector.run_cycle(&table()).unwrap();
    assert_eq!(after[0].record.symbol, "MOMO");
    assert_eq!(after[0].rank, 1);
    assert!(after[0].score > after[1].score);
    assert_eq!(selector.get_top(1)[0].record.symbol, "MOMO");
}

#[test]
fn foreign_weight_document_degrades_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(LearnerKind::Throttled, dir.path());
    let files = Arc::new(FileStore::new(dir.path()));
    let stores = LearnerStores::from_file_store(files.clone());

    let foreign: MetricWeights = [("Beta", 0.5), ("PERatio", 0.5)].into_iter().collect();
    files.save_weights(&foreign).unwrap();

    let learner = build_learner(&config, &stores).unwrap();
    let outcome = run_cycle(learner.as_ref());
    assert!(outcome.skipped);
    assert!(outcome.degraded.is_some());

    // the stored document is left exactly as it was
    assert_eq!(files.load_weights().unwrap().unwrap(), foreign);
}

#[test]
fn separate_handles_on_one_state_dir_never_share_a_counter() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(LearnerKind::Throttled, dir.path());
    let per_worker = 40;
    let state_dir = dir.path();

    // two independent handles, as two overlapping engine processes would hold
    let outcomes: Vec<UpdateOutcome> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let config = &config;
                scope.spawn(move || {
                    let stores = LearnerStores::from_file_store(Arc::new(FileStore::new(state_dir)));
                    let learner = build_learner(config, &stores).unwrap();
                    (0..per_worker)
                        .map(|_| run_cycle(learner.as_ref()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
    });

    assert!(outcomes.iter().all(|o| o.degraded.is_none()));

    let mut intervals: Vec<u64> = outcomes.iter().filter_map(|o| o.intervals).collect();
    intervals.sort_unstable();
    let expected: Vec<u64> = (1..=2 * per_worker as u64).collect();
    assert_eq!(intervals, expected);

    let applied = outcomes.iter().filter(|o| o.is_applied()).count();
    assert_eq!(applied, per_worker);

    let files = FileStore::new(dir.path());
    assert_eq!(files.load_learner_state().unwrap().unwrap().intervals, 2 * per_worker as u64);
    assert!(files.load_weights().unwrap().unwrap().is_normalized());
}

#[test]
fn tick_publishes_selection_and_learns() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(LearnerKind::Throttled, dir.path());
    let files = Arc::new(FileStore::new(dir.path()));
    files.write_document(ENTITY_TABLE_FILE, &table().rows).unwrap();

    let report = run_tick(&config, files.clone(), Some(100.0)).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.selected, Some(2));
    assert_eq!(report.outcome.intervals, Some(1));

    let published: Vec<ScoredEntity> = files.read_document(SELECTION_FILE).unwrap().unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].rank, 1);
    assert_eq!(EquitySeries::observations(files.as_ref()).unwrap().len(), 1);
}

#[test]
fn failed_selection_does_not_cost_the_learning_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(LearnerKind::Throttled, dir.path());
    let files = Arc::new(FileStore::new(dir.path()));

    // no Value column anywhere in the table
    let rows = vec![
        EntityRecord::new("MOMO").with_metric("Momentum", 10.0),
        EntityRecord::new("FLAT").with_metric("Momentum", 1.0),
    ];
    files.write_document(ENTITY_TABLE_FILE, &rows).unwrap();

    let first = run_tick(&config, files.clone(), Some(100.0)).unwrap();
    assert!(!first.is_clean());
    assert!(first.selection_error.as_ref().unwrap().contains("missing metrics"));
    assert_eq!(first.selected, None);
    assert!(!files.path(SELECTION_FILE).exists());

    // the learner and the equity curve still advanced
    assert!(first.equity_error.is_none());
    assert!(first.outcome.degraded.is_none());
    assert_eq!(first.outcome.intervals, Some(1));

    let second = run_tick(&config, files.clone(), Some(101.0)).unwrap();
    assert_eq!(second.outcome.intervals, Some(2));
    assert!(second.outcome.is_applied());
    assert_eq!(EquitySeries::observations(files.as_ref()).unwrap().len(), 2);
}

#[test]
fn rejected_portfolio_value_still_runs_the_learner() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(LearnerKind::Throttled, dir.path());
    let files = Arc::new(FileStore::new(dir.path()));

    let report = run_tick(&config, files.clone(), Some(-5.0)).unwrap();
    assert!(report.equity_error.is_some());
    assert!(report.selection_error.is_none());
    assert_eq!(report.outcome.intervals, Some(1));
    assert!(EquitySeries::observations(files.as_ref()).unwrap().is_empty());
}
