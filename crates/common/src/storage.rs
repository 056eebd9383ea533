// crates/common/src/storage.rs
//! Persisted state behind explicit handles.
//!
//! Three kinds of state survive between cycles: the weight vector and the
//! learner counters (small documents, replaced wholesale) and the equity
//! curve (append-only). [`FileStore`] keeps them as files in one state
//! directory; [`MemoryStore`] keeps them in memory for tests and embedding.

use crate::{EquityObservation, Error, LearnerState, MetricWeights, PerformanceRecord, Result};
use itertools::Itertools;
use parking_lot::{Mutex, RawMutex, RwLock};
use parking_lot::lock_api::ArcMutexGuard;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const WEIGHTS_FILE: &str = "metric_weights.json";
pub const LEARNER_STATE_FILE: &str = "learner_state.json";
pub const EQUITY_CURVE_FILE: &str = "equity_curve.jsonl";
pub const PERFORMANCE_FILE: &str = "signal_performance.jsonl";
pub const CYCLE_LOCK_FILE: &str = ".learner.lock";

/// Held for one whole learner cycle; released on drop.
///
/// A file guard is an exclusive lock on [`CYCLE_LOCK_FILE`], so it excludes
/// other processes sharing the state directory as well as other handles in
/// this one.
#[must_use = "the cycle lock is released as soon as the guard is dropped"]
pub enum CycleGuard {
    File(File),
    Memory(ArcMutexGuard<RawMutex, ()>),
}

impl std::fmt::Debug for CycleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleGuard::File(_) => f.write_str("CycleGuard::File"),
            CycleGuard::Memory(_) => f.write_str("CycleGuard::Memory"),
        }
    }
}

/// Read-modify-write documents: weights and learner counters
pub trait StateStore: Send + Sync {
    /// Block until no other cycle holds the state, then hold it until the
    /// guard drops
    fn lock_cycle(&self) -> Result<CycleGuard>;

    /// `None` when no weights were ever saved
    fn load_weights(&self) -> Result<Option<MetricWeights>>;

    /// Must replace the previous vector atomically
    fn save_weights(&self, weights: &MetricWeights) -> Result<()>;

    fn load_learner_state(&self) -> Result<Option<LearnerState>>;

    fn save_learner_state(&self, state: &LearnerState) -> Result<()>;
}

/// Append-only portfolio value series, oldest first
pub trait EquitySeries: Send + Sync {
    fn append(&self, observation: &EquityObservation) -> Result<()>;

    fn observations(&self) -> Result<Vec<EquityObservation>>;

    /// The most recent `n` observations, oldest first
    fn tail(&self, n: usize) -> Result<Vec<EquityObservation>> {
        let mut all = self.observations()?;
        let skip = all.len().saturating_sub(n);
        Ok(all.split_off(skip))
    }
}

/// Per-period metric values joined with realized P&L
pub trait PerformanceLog: Send + Sync {
    fn append(&self, record: &PerformanceRecord) -> Result<()>;

    fn records(&self) -> Result<Vec<PerformanceRecord>>;
}

/// Directory-backed store
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Read a JSON document; `None` if the file does not exist
    pub fn read_document<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| {
            Error::Persistence(format!("failed to read {}: {}", path.display(), e))
        })?;
        let value = serde_json::from_str(&content).map_err(|e| {
            Error::Persistence(format!("corrupt document {}: {}", path.display(), e))
        })?;
        Ok(Some(value))
    }

    /// Write a JSON document via temp file + rename so readers never see a
    /// partial write
    pub fn write_document<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Persistence(format!("failed to create {}: {}", self.dir.display(), e))
        })?;

        let path = self.path(name);
        let content = serde_json::to_string_pretty(value)?;

        // Unique sibling temp file; dropped (and removed) on any failure.
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| Error::Persistence(format!("failed to create temp file for {}: {}", name, e)))?;
        temp.write_all(content.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| Error::Persistence(format!("failed to write temp file for {}: {}", name, e)))?;

        temp.persist(&path).map_err(|e| {
            Error::Persistence(format!("failed to replace {}: {}", path.display(), e.error))
        })?;
        Ok(())
    }

    fn append_line<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Persistence(format!("failed to create {}: {}", self.dir.display(), e))
        })?;

        let path = self.path(name);
        let line = serde_json::to_string(value)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Persistence(format!("failed to open {}: {}", path.display(), e)))?;
        writeln!(file, "{}", line)
            .and_then(|_| file.sync_data())
            .map_err(|e| Error::Persistence(format!("failed to append {}: {}", path.display(), e)))
    }

    fn read_lines<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path)
            .map_err(|e| Error::Persistence(format!("failed to open {}: {}", path.display(), e)))?;

        BufReader::new(file)
            .lines()
            .enumerate()
            .filter(|(_, line)| !matches!(line, Ok(l) if l.trim().is_empty()))
            .map(|(i, line)| {
                let line = line.map_err(|e| {
                    Error::Persistence(format!("failed to read {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&line).map_err(|e| {
                    Error::Persistence(format!("corrupt line {} of {}: {}", i + 1, path.display(), e))
                })
            })
            .collect()
    }
}

impl StateStore for FileStore {
    fn lock_cycle(&self) -> Result<CycleGuard> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Persistence(format!("failed to create {}: {}", self.dir.display(), e))
        })?;

        let path = self.path(CYCLE_LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Persistence(format!("failed to open {}: {}", path.display(), e)))?;
        lock_exclusive(&file)
            .map_err(|e| Error::Persistence(format!("failed to lock {}: {}", path.display(), e)))?;

        tracing::trace!(lock = %path.display(), "cycle lock acquired");
        Ok(CycleGuard::File(file))
    }

    fn load_weights(&self) -> Result<Option<MetricWeights>> {
        self.read_document(WEIGHTS_FILE)
    }

    fn save_weights(&self, weights: &MetricWeights) -> Result<()> {
        self.write_document(WEIGHTS_FILE, weights)
    }

    fn load_learner_state(&self) -> Result<Option<LearnerState>> {
        self.read_document(LEARNER_STATE_FILE)
    }

    fn save_learner_state(&self, state: &LearnerState) -> Result<()> {
        self.write_document(LEARNER_STATE_FILE, state)
    }
}

impl EquitySeries for FileStore {
    fn append(&self, observation: &EquityObservation) -> Result<()> {
        self.append_line(EQUITY_CURVE_FILE, observation)
    }

    fn observations(&self) -> Result<Vec<EquityObservation>> {
        self.read_lines(EQUITY_CURVE_FILE)
    }
}

impl PerformanceLog for FileStore {
    fn append(&self, record: &PerformanceRecord) -> Result<()> {
        self.append_line(PERFORMANCE_FILE, record)
    }

    fn records(&self) -> Result<Vec<PerformanceRecord>> {
        self.read_lines(PERFORMANCE_FILE)
    }
}

/// Exclusive advisory lock on the whole file, waiting for other holders.
/// Closing the file releases it.
#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    loop {
        // SAFETY: `fd` is an open descriptor owned by `file` for this call.
        if unsafe { libc::flock(fd, libc::LOCK_EX) } == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    file.lock()
}

/// In-memory store. Writes can be switched off to simulate an unwritable
/// backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    weights: RwLock<Option<MetricWeights>>,
    learner_state: RwLock<Option<LearnerState>>,
    equity: RwLock<Vec<EquityObservation>>,
    performance: RwLock<Vec<PerformanceRecord>>,
    read_only: AtomicBool,
    cycle: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with a portfolio value series, one second apart
    pub fn with_equity(values: &[f64]) -> Self {
        let store = Self::new();
        let start = chrono::Utc::now();
        *store.equity.write() = values
            .iter()
            .enumerate()
            .map(|(i, v)| EquityObservation::new(start + chrono::TimeDelta::seconds(i as i64), *v))
            .collect();
        store
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(Error::Persistence("store is read-only".to_string()));
        }
        Ok(())
    }
}

impl StateStore for MemoryStore {
    fn lock_cycle(&self) -> Result<CycleGuard> {
        Ok(CycleGuard::Memory(self.cycle.lock_arc()))
    }

    fn load_weights(&self) -> Result<Option<MetricWeights>> {
        Ok(self.weights.read().clone())
    }

    fn save_weights(&self, weights: &MetricWeights) -> Result<()> {
        self.check_writable()?;
        *self.weights.write() = Some(weights.clone());
        Ok(())
    }

    fn load_learner_state(&self) -> Result<Option<LearnerState>> {
        Ok(self.learner_state.read().clone())
    }

    fn save_learner_state(&self, state: &LearnerState) -> Result<()> {
        self.check_writable()?;
        *self.learner_state.write() = Some(state.clone());
        Ok(())
    }
}

impl EquitySeries for MemoryStore {
    fn append(&self, observation: &EquityObservation) -> Result<()> {
        self.check_writable()?;
        self.equity.write().push(*observation);
        Ok(())
    }

    fn observations(&self) -> Result<Vec<EquityObservation>> {
        Ok(self.equity.read().clone())
    }
}

impl PerformanceLog for MemoryStore {
    fn append(&self, record: &PerformanceRecord) -> Result<()> {
        self.check_writable()?;
        self.performance.write().push(record.clone());
        Ok(())
    }

    fn records(&self) -> Result<Vec<PerformanceRecord>> {
        Ok(self.performance.read().clone())
    }
}

/// The persisted weight vector over a fixed metric key set.
///
/// Shared by the scorer (read) and the active learner (read-modify-write).
/// Whatever a caller hands to [`save`](Self::save) is clamped and
/// renormalized first, so the stored vector always satisfies the
/// non-negative, sum-to-one invariant.
#[derive(Clone)]
pub struct MetricWeightStore {
    store: Arc<dyn StateStore>,
    metrics: Vec<String>,
}

impl MetricWeightStore {
    pub fn new(store: Arc<dyn StateStore>, metrics: Vec<String>) -> Result<Self> {
        if metrics.is_empty() {
            return Err(Error::Config("weight store needs at least one metric".to_string()));
        }
        if metrics.iter().duplicates().next().is_some() {
            return Err(Error::Config(format!("duplicate metrics in {:?}", metrics)));
        }
        Ok(Self { store, metrics })
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// Exclusive hold on the backing state for one learner cycle
    pub fn lock_cycle(&self) -> Result<CycleGuard> {
        self.store.lock_cycle()
    }

    pub fn uniform(&self) -> MetricWeights {
        MetricWeights::uniform(self.metrics.iter().cloned())
    }

    /// Current vector, or the uniform one on a cold start
    pub fn load(&self) -> Result<MetricWeights> {
        let Some(weights) = self.store.load_weights()? else {
            tracing::debug!(metrics = self.metrics.len(), "no stored weights, using uniform");
            return Ok(self.uniform());
        };

        self.check_keys(&weights)?;
        if weights.is_normalized() {
            return Ok(weights);
        }

        tracing::warn!(sum = weights.sum(), "stored weights not normalized, renormalizing");
        Ok(weights.normalized_or_uniform().0)
    }

    /// Clamp, renormalize and persist; returns the vector actually stored
    pub fn save(&self, weights: &MetricWeights) -> Result<MetricWeights> {
        self.check_keys(weights)?;
        let (normalized, fallback) = weights.normalized_or_uniform();
        if fallback {
            tracing::warn!("saving uniform weights in place of a zero-sum vector");
        }
        self.store.save_weights(&normalized)?;
        Ok(normalized)
    }

    fn check_keys(&self, weights: &MetricWeights) -> Result<()> {
        if weights.has_keys(&self.metrics) {
            return Ok(());
        }
        let missing: Vec<&String> = self
            .metrics
            .iter()
            .filter(|m| weights.get(m).is_none())
            .collect();
        let unknown: Vec<&str> = weights
            .metrics()
            .filter(|k| !self.metrics.iter().any(|m| m == k))
            .collect();
        Err(Error::Config(format!(
            "weight keys do not match configured metrics (missing: {:?}, unknown: {:?})",
            missing, unknown
        )))
    }
}
