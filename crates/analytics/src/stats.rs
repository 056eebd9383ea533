// crates/analytics/src/stats.rs
use common::PerformanceRecord;
use ndarray::Array2;
use ndarray_stats::CorrelationExt;
use std::collections::BTreeMap;

/// Pearson correlation of two equally long samples.
///
/// `None` for fewer than two pairs or when either side has no variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len();
    if n != ys.len() || n < 2 {
        return None;
    }

    // One random variable per row, one observation per column.
    let mut data = Vec::with_capacity(2 * n);
    data.extend_from_slice(xs);
    data.extend_from_slice(ys);
    let samples = Array2::from_shape_vec((2, n), data).ok()?;

    let corr = samples.pearson_correlation().ok()?[[0, 1]];
    corr.is_finite().then(|| corr.clamp(-1.0, 1.0))
}

/// Correlation of each metric with realized P&L.
///
/// Pairs are taken from the records that carry a finite value for the metric;
/// a metric with no usable pairs, or no variance, correlates at 0.
pub fn metric_correlations(
    records: &[PerformanceRecord],
    metrics: &[String],
) -> BTreeMap<String, f64> {
    metrics
        .iter()
        .map(|metric| {
            let (xs, ys): (Vec<f64>, Vec<f64>) = records
                .iter()
                .filter(|r| r.pnl.is_finite())
                .filter_map(|r| {
                    r.metrics
                        .get(metric)
                        .filter(|v| v.is_finite())
                        .map(|v| (*v, r.pnl))
                })
                .unzip();
            (metric.clone(), pearson(&xs, &ys).unwrap_or(0.0))
        })
        .collect()
}
