// crates/common/src/weights.rs
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Allowed drift of a normalized vector's sum away from 1
pub const SUM_TOLERANCE: f64 = 1e-9;

/// Metric name -> weight. Iteration order is the sorted key order, which is
/// also the component order of every array view handed to the learners.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricWeights(BTreeMap<String, f64>);

impl MetricWeights {
    /// `{metric: 1/|metrics|}`
    pub fn uniform<I, S>(metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = metrics.into_iter().map(Into::into).collect();
        let weight = if keys.is_empty() {
            0.0
        } else {
            1.0 / keys.len() as f64
        };
        Self(keys.into_iter().map(|k| (k, weight)).collect())
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(metric).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Component values in key order
    pub fn values(&self) -> Vec<f64> {
        self.0.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    /// True when the key set equals `metrics` exactly
    pub fn has_keys(&self, metrics: &[String]) -> bool {
        self.0.len() == metrics.len() && metrics.iter().all(|m| self.0.contains_key(m))
    }

    pub fn is_normalized(&self) -> bool {
        !self.0.is_empty()
            && self.0.values().all(|w| w.is_finite() && *w >= 0.0)
            && (self.sum() - 1.0).abs() <= SUM_TOLERANCE
    }

    /// Same keys, new component values (in key order)
    pub fn with_values(&self, values: &[f64]) -> Result<Self> {
        if values.len() != self.0.len() {
            return Err(Error::InvalidData(format!(
                "expected {} weight components, got {}",
                self.0.len(),
                values.len()
            )));
        }
        Ok(Self(
            self.0.keys().cloned().zip(values.iter().copied()).collect(),
        ))
    }

    /// Clamp to non-negative and rescale to sum 1.
    ///
    /// Non-finite components count as zero. Fails with
    /// [`Error::Normalization`] when nothing positive is left.
    pub fn normalized(&self) -> Result<Self> {
        let clamped: Vec<f64> = self
            .0
            .values()
            .map(|w| if w.is_finite() && *w > 0.0 { *w } else { 0.0 })
            .collect();

        let peak = clamped.iter().copied().fold(0.0_f64, f64::max);
        if peak <= 0.0 {
            return Err(Error::Normalization(format!(
                "weight vector over {} metrics sums to zero",
                self.0.len()
            )));
        }

        // Scale by the peak first so the sum cannot overflow.
        let scaled: Vec<f64> = clamped.iter().map(|w| w / peak).collect();
        let total: f64 = scaled.iter().sum();
        let normalized: Vec<f64> = scaled.iter().map(|w| w / total).collect();
        self.with_values(&normalized)
    }

    /// [`normalized`](Self::normalized), falling back to the uniform vector
    /// over the same keys. The flag reports whether the fallback was taken.
    pub fn normalized_or_uniform(&self) -> (Self, bool) {
        match self.normalized() {
            Ok(weights) => (weights, false),
            Err(e) => {
                tracing::warn!(error = %e, "falling back to uniform weights");
                (Self::uniform(self.0.keys().cloned()), true)
            }
        }
    }

    /// Per-metric `other - self`, over the keys of `self`
    pub fn deltas(&self, other: &MetricWeights) -> BTreeMap<String, f64> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), other.get(k).unwrap_or(0.0) - v))
            .collect()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for MetricWeights {
    fn from_iter<T: IntoIterator<Item = (S, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
