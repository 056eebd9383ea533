// crates/common/src/config.rs
use crate::{Error, LearnerKind, Result};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "config/engine.toml";

/// Full runtime configuration. Every field has a default so a partial
/// (or absent) file still yields a usable config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageSection,
    pub scoring: ScoringSection,
    pub learner: LearnerSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub state_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSection {
    /// Weighted metric columns; also the key set of the weight vector
    pub metrics: Vec<String>,
    pub top_n: usize,
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            metrics: ["ChangePct", "YTDChange", "DividendYield", "Beta", "PERatio", "PBRatio"]
                .into_iter()
                .map(String::from)
                .collect(),
            top_n: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerSection {
    pub kind: LearnerKind,
    pub cycles_per_update: u64,
    pub max_window: usize,
    pub eta_base: f64,
    pub alpha: f64,
    pub beta_entropy: f64,
    pub eta_turnover: f64,
    pub correlation_alpha: f64,
}

impl Default for LearnerSection {
    fn default() -> Self {
        Self {
            kind: LearnerKind::Throttled,
            cycles_per_update: 4,
            max_window: 20,
            eta_base: 0.05,
            alpha: 0.9,
            beta_entropy: 0.01,
            eta_turnover: 0.1,
            correlation_alpha: 0.1,
        }
    }
}

impl AppConfig {
    /// Read a TOML file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let config_str = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;
            Self::from_toml(&config_str)?
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        toml::from_str(config_str)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Override fields from `lookup` (normally the process environment)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("STATE_DIR") {
            self.storage.state_dir = PathBuf::from(dir);
        }
        override_parsed(&lookup, "TOP_N", &mut self.scoring.top_n)?;
        override_parsed(&lookup, "LEARNER_KIND", &mut self.learner.kind)?;
        override_parsed(&lookup, "CYCLES_PER_UPDATE", &mut self.learner.cycles_per_update)?;
        override_parsed(&lookup, "MAX_WINDOW", &mut self.learner.max_window)?;
        override_parsed(&lookup, "ETA_BASE", &mut self.learner.eta_base)?;
        override_parsed(&lookup, "ALPHA", &mut self.learner.alpha)?;
        override_parsed(&lookup, "BETA_ENTROPY", &mut self.learner.beta_entropy)?;
        override_parsed(&lookup, "ETA_TURNOVER", &mut self.learner.eta_turnover)?;
        override_parsed(&lookup, "CORRELATION_ALPHA", &mut self.learner.correlation_alpha)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let metrics = &self.scoring.metrics;
        if metrics.is_empty() {
            return Err(Error::Config("scoring.metrics must not be empty".to_string()));
        }
        let duplicates: Vec<&String> = metrics.iter().duplicates().collect();
        if !duplicates.is_empty() {
            return Err(Error::Config(format!(
                "duplicate metrics: {:?}",
                duplicates
            )));
        }
        if self.scoring.top_n == 0 {
            return Err(Error::Config("scoring.top_n must be positive".to_string()));
        }

        let learner = &self.learner;
        if learner.cycles_per_update == 0 {
            return Err(Error::Config("learner.cycles_per_update must be positive".to_string()));
        }
        if learner.max_window < 2 {
            return Err(Error::Config(format!(
                "learner.max_window must be at least 2, got {}",
                learner.max_window
            )));
        }
        if !(0.0..=1.0).contains(&learner.alpha) {
            return Err(Error::Config(format!(
                "learner.alpha must lie in [0, 1], got {}",
                learner.alpha
            )));
        }
        for (name, value) in [
            ("eta_base", learner.eta_base),
            ("beta_entropy", learner.beta_entropy),
            ("eta_turnover", learner.eta_turnover),
            ("correlation_alpha", learner.correlation_alpha),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "learner.{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {}={:?}: {}", key, raw, e)))?;
    }
    Ok(())
}
