//! Order-independent aggregation and distribution summaries
//!
//! Every reduction sorts its input before folding, so the result does not depend
//! on the order in which parallel workers delivered the values.

use crate::core_types::NullSummary;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How per-event values are reduced to one event-set statistic
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    #[default]
    Mean,
    Median,
    /// Linear-interpolated quantile in `[0, 1]`
    Quantile(f64),
}

impl Aggregate {
    /// Reduce `values`; `None` when empty
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let sorted = sorted_copy(values);
        Some(match self {
            Aggregate::Mean => sorted.iter().sum::<f64>() / sorted.len() as f64,
            Aggregate::Median => quantile_sorted(&sorted, 0.5),
            Aggregate::Quantile(q) => quantile_sorted(&sorted, q),
        })
    }

    /// Label used in statistic names
    pub fn label(self) -> String {
        match self {
            Aggregate::Mean => "mean".to_string(),
            Aggregate::Median => "median".to_string(),
            Aggregate::Quantile(q) => format!("q{:.0}", q * 100.0),
        }
    }
}

/// Finite values in ascending total order
pub fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Linear-interpolated quantile of ascending `sorted`
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Mean, spread and percentiles of a null distribution
pub fn summarize(values: &[f64]) -> NullSummary {
    let sorted = sorted_copy(values);
    let n = sorted.len();
    let mean = if n == 0 {
        f64::NAN
    } else {
        sorted.iter().sum::<f64>() / n as f64
    };
    let std_dev = if n < 2 {
        0.0
    } else {
        (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    };
    NullSummary {
        mean,
        std_dev,
        p2_5: quantile_sorted(&sorted, 0.025),
        p25: quantile_sorted(&sorted, 0.25),
        p50: quantile_sorted(&sorted, 0.5),
        p75: quantile_sorted(&sorted, 0.75),
        p97_5: quantile_sorted(&sorted, 0.975),
    }
}

/// Two-sided resampling p-value.
///
/// Twice the smaller tail fraction, with the `(k + 1) / (n + 1)` correction so a
/// finite null never yields exactly zero. Clamped to `[0, 1]`.
pub fn two_sided_p_value(observed: f64, null: &[f64]) -> f64 {
    let n = null.len();
    if n == 0 || !observed.is_finite() {
        return 1.0;
    }
    let (above, below) = null.iter().fold((0_usize, 0_usize), |(above, below), v| {
        match v.partial_cmp(&observed) {
            Some(Ordering::Greater) => (above + 1, below),
            Some(Ordering::Less) => (above, below + 1),
            Some(Ordering::Equal) => (above + 1, below + 1),
            None => (above, below),
        }
    });
    let tail = (above.min(below) + 1) as f64 / (n + 1) as f64;
    (2.0 * tail).clamp(0.0, 1.0)
}
