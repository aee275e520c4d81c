//! Percentile bootstrap over events

use super::null_model::stream_rng;
use super::summary::{quantile_sorted, sorted_copy, Aggregate};
use rand::Rng;
use rayon::prelude::*;

/// Lower and upper percentile bounds of a resampled aggregate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Resample `values` with replacement `n_bootstrap` times and return the
/// `(1 ± level) / 2` percentiles of the aggregate.
///
/// `stream` separates the random streams of different scopes. `None` for an
/// empty sample.
pub fn percentile_interval(
    values: &[f64],
    aggregate: Aggregate,
    n_bootstrap: usize,
    level: f64,
    seed: u64,
    stream: u64,
    parallel: bool,
) -> Option<PercentileInterval> {
    if values.is_empty() || n_bootstrap == 0 {
        return None;
    }
    let n = values.len();
    let replicate = |b: usize| {
        let mut rng = stream_rng(seed, stream, b as u64);
        let resample: Vec<f64> = (0..n).map(|_| values[rng.random_range(0..n)]).collect();
        aggregate.apply(&resample)
    };
    let replicates: Vec<f64> = if parallel {
        (0..n_bootstrap).into_par_iter().filter_map(replicate).collect()
    } else {
        (0..n_bootstrap).filter_map(replicate).collect()
    };

    let sorted = sorted_copy(&replicates);
    if sorted.is_empty() {
        return None;
    }
    let alpha = (1.0 - level) / 2.0;
    Some(PercentileInterval {
        lower: quantile_sorted(&sorted, alpha),
        upper: quantile_sorted(&sorted, 1.0 - alpha),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_brackets_sample_mean() {
        let values: Vec<f64> = (0..30).map(|i| f64::from(i % 7) + 1.0).collect();
        let mean = Aggregate::Mean.apply(&values).unwrap();
        let ci = percentile_interval(&values, Aggregate::Mean, 2_000, 0.95, 11, 0, false).unwrap();
        assert!(ci.lower < mean && mean < ci.upper, "{ci:?} vs {mean}");
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let values = [0.3, 1.2, -0.4, 2.2, 0.9, 1.1];
        let seq = percentile_interval(&values, Aggregate::Median, 500, 0.9, 3, 4, false);
        let par = percentile_interval(&values, Aggregate::Median, 500, 0.9, 3, 4, true);
        assert_eq!(seq, par);
    }

    #[test]
    fn test_constant_sample_has_degenerate_interval() {
        let ci = percentile_interval(&[2.0; 8], Aggregate::Mean, 100, 0.95, 1, 0, true).unwrap();
        assert_eq!((ci.lower, ci.upper), (2.0, 2.0));
    }
}
