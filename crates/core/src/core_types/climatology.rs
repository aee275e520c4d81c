//! Climatological baselines and anomaly views
//!
//! The baseline is built from the domain-mean series restricted to the baseline
//! years. Calendar bins that receive no baseline samples stay empty, and any
//! timestep falling into an empty bin has no anomaly rather than a fabricated one.

use super::series::{TimeAxis, TimeSeries, TimeSeriesStore};
use crate::config::{ClimatologyConfig, ClimatologyKey};
use crate::error::SeriesError;
use chrono::{DateTime, Datelike, Utc};

/// Calendar-day bins of a common year; Feb 29 shares the Feb 28 bin
const DAY_BINS: usize = 365;
/// Zero-based ordinal of Feb 29 in a leap year
const LEAP_DAY_ORDINAL0: u32 = 59;
const MONTH_BINS: usize = 12;

/// Mean and spread of one calendar bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinStats {
    pub mean: f64,
    /// Sample standard deviation; `None` with fewer than two samples
    pub std_dev: Option<f64>,
    pub count: usize,
}

/// Per-bin baseline of one variable
#[derive(Debug, Clone, PartialEq)]
pub struct Climatology {
    key: ClimatologyKey,
    bins: Vec<Option<BinStats>>,
}

impl Climatology {
    /// Build the baseline of `series` over `axis`.
    pub fn compute(series: &TimeSeries, axis: &TimeAxis, config: &ClimatologyConfig) -> Self {
        let bin_count = match config.key {
            ClimatologyKey::DayOfYear { .. } => DAY_BINS,
            ClimatologyKey::Month => MONTH_BINS,
        };

        let mut raw: Vec<Vec<f64>> = vec![Vec::new(); bin_count];
        for (t, ts) in axis.timestamps().iter().enumerate() {
            if config.baseline.is_some_and(|b| !b.contains(ts.year())) {
                continue;
            }
            if let Some(sample) = series.domain_mean(t) {
                raw[bin_of(config.key, ts)].push(sample.value);
            }
        }

        let bins = (0..bin_count)
            .map(|bin| {
                let pooled: Vec<f64> = match config.key {
                    ClimatologyKey::DayOfYear { half_window } => {
                        circular_window(bin, half_window as usize, bin_count)
                            .flat_map(|b| raw[b].iter().copied())
                            .collect()
                    }
                    ClimatologyKey::Month => raw[bin].clone(),
                };
                bin_stats(&pooled)
            })
            .collect();

        Self {
            key: config.key,
            bins,
        }
    }

    /// Baseline statistics for the bin containing `ts`
    #[inline]
    pub fn stats_at(&self, ts: &DateTime<Utc>) -> Option<BinStats> {
        self.bins[bin_of(self.key, ts)]
    }

    /// `value` minus the climatological mean
    #[inline]
    pub fn anomaly(&self, ts: &DateTime<Utc>, value: f64) -> Option<f64> {
        self.stats_at(ts).map(|s| value - s.mean)
    }

    /// Anomaly divided by the climatological standard deviation.
    ///
    /// `None` when the bin has no usable spread.
    #[inline]
    pub fn standardized(&self, ts: &DateTime<Utc>, value: f64) -> Option<f64> {
        let stats = self.stats_at(ts)?;
        let sd = stats.std_dev.filter(|sd| *sd > f64::EPSILON)?;
        Some((value - stats.mean) / sd)
    }

    /// Number of bins holding a baseline
    pub fn populated_bins(&self) -> usize {
        self.bins.iter().filter(|b| b.is_some()).count()
    }
}

fn bin_of(key: ClimatologyKey, ts: &DateTime<Utc>) -> usize {
    match key {
        ClimatologyKey::DayOfYear { .. } => calendar_day(ts),
        ClimatologyKey::Month => ts.month0() as usize,
    }
}

/// Day of a common year, so (month, day) lands in the same bin every year
fn calendar_day(ts: &DateTime<Utc>) -> usize {
    let ordinal = ts.ordinal0();
    let shift = u32::from(ts.date_naive().leap_year() && ordinal >= LEAP_DAY_ORDINAL0);
    (ordinal - shift) as usize
}

fn circular_window(center: usize, half: usize, len: usize) -> impl Iterator<Item = usize> {
    let half = half.min(len / 2);
    (0..=2 * half).map(move |offset| (center + len + offset - half) % len)
}

fn bin_stats(values: &[f64]) -> Option<BinStats> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std_dev = (values.len() > 1).then(|| {
        let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (n - 1.0)).sqrt()
    });
    Some(BinStats {
        mean,
        std_dev,
        count: values.len(),
    })
}

// ============================================================================
// ANOMALY SERIES
// ============================================================================

/// Which anomaly view to extract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    Raw,
    Standardized,
}

/// Domain-mean anomaly per timestep, with the number of valid cells behind it
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalySeries {
    variable: String,
    values: Vec<Option<f64>>,
    sample_counts: Vec<usize>,
}

impl AnomalySeries {
    pub fn build(
        series: &TimeSeries,
        axis: &TimeAxis,
        climatology: &Climatology,
        kind: AnomalyKind,
    ) -> Self {
        let mut values = Vec::with_capacity(axis.len());
        let mut sample_counts = Vec::with_capacity(axis.len());
        for (t, ts) in axis.timestamps().iter().enumerate() {
            let sample = series.domain_mean(t);
            let anomaly = sample.and_then(|s| match kind {
                AnomalyKind::Raw => climatology.anomaly(ts, s.value),
                AnomalyKind::Standardized => climatology.standardized(ts, s.value),
            });
            values.push(anomaly);
            sample_counts.push(if anomaly.is_some() {
                sample.map_or(0, |s| s.valid_cells)
            } else {
                0
            });
        }
        Self {
            variable: series.variable().to_string(),
            values,
            sample_counts,
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    #[inline]
    pub fn get(&self, t: usize) -> Option<f64> {
        self.values.get(t).copied().flatten()
    }

    #[inline]
    pub fn sample_count(&self, t: usize) -> usize {
        self.sample_counts.get(t).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl TimeSeriesStore {
    /// Baseline for `variable`.
    ///
    /// # Errors
    /// Unknown variable.
    pub fn climatology(
        &self,
        variable: &str,
        config: &ClimatologyConfig,
    ) -> Result<Climatology, SeriesError> {
        Ok(Climatology::compute(self.get(variable)?, self.axis(), config))
    }

    /// Anomaly view of `variable` against its own baseline.
    ///
    /// # Errors
    /// Unknown variable.
    pub fn anomalies(
        &self,
        variable: &str,
        config: &ClimatologyConfig,
        kind: AnomalyKind,
    ) -> Result<AnomalySeries, SeriesError> {
        let series = self.get(variable)?;
        let climatology = Climatology::compute(series, self.axis(), config);
        Ok(AnomalySeries::build(series, self.axis(), &climatology, kind))
    }
}
