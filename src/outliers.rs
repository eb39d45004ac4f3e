//! Statistical outlier detection over sales measures.

use std::cmp::Ordering;

/// Scores (quantity, revenue) points and flags the fraction considered
/// anomalous. Implementations must be deterministic for a given input.
pub trait AnomalyDetector {
    /// One flag per input point; `true` marks an anomaly.
    fn flag(&self, points: &[(f64, f64)], contamination: f64) -> Vec<bool>;
}

/// Robust-distance detector: each point is scored by its worst per-feature
/// deviation from the feature median, scaled by the interquartile range, and
/// the `round(n * contamination)` highest scores are flagged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IqrDetector;

impl AnomalyDetector for IqrDetector {
    fn flag(&self, points: &[(f64, f64)], contamination: f64) -> Vec<bool> {
        let n = points.len();
        let mut flags = vec![false; n];
        if n == 0 || contamination <= 0.0 {
            return flags;
        }
        let target = ((n as f64) * contamination).round() as usize;
        if target == 0 {
            return flags;
        }

        let quantity_scale = RobustScale::fit(points.iter().map(|p| p.0));
        let revenue_scale = RobustScale::fit(points.iter().map(|p| p.1));

        let mut scored: Vec<(usize, f64)> = points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let score = quantity_scale.distance(p.0).max(revenue_scale.distance(p.1));
                (i, score)
            })
            .collect();
        // Highest score first; index breaks ties deterministically.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        for (index, _) in scored.into_iter().take(target) {
            flags[index] = true;
        }
        flags
    }
}

struct RobustScale {
    median: f64,
    iqr: f64,
}

impl RobustScale {
    fn fit(values: impl Iterator<Item = f64>) -> Self {
        let mut sorted: Vec<f64> = values.filter(|v| v.is_finite()).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        if sorted.is_empty() {
            return Self { median: 0.0, iqr: 1.0 };
        }
        let median = percentile(&sorted, 0.5);
        let iqr = percentile(&sorted, 0.75) - percentile(&sorted, 0.25);
        Self {
            median,
            iqr: if iqr > f64::EPSILON { iqr } else { 1.0 },
        }
    }

    fn distance(&self, value: f64) -> f64 {
        if value.is_finite() {
            (value - self.median).abs() / self.iqr
        } else {
            f64::MAX
        }
    }
}

/// Linear-interpolated percentile over a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    let weight = rank - low as f64;
    sorted[low] * (1.0 - weight) + sorted[high] * weight
}
