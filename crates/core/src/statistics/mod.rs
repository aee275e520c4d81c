//! Significance of observed persistence against a resampled null
//!
//! The observed statistic for each scope aggregates per-event values over the
//! qualifying (non-truncated) events. The null distribution comes from
//! `n_resamples` sets of pseudo-events drawn where no real event can have left a
//! trace; each set has as many pseudo-events as there are qualifying real
//! events, and each pseudo-event is analysed exactly like a real one.
//!
//! Tests are produced per variable: one persistence-time test followed by one
//! lag-anomaly test per lag. A test with too few events or resamples carries an
//! [`InsufficientSampleError`] and the other tests proceed. P-values of all
//! computable tests are adjusted together with Benjamini-Hochberg.

pub mod bootstrap;
pub mod fdr;
pub mod null_model;
pub mod summary;

pub use bootstrap::{percentile_interval, PercentileInterval};
pub use fdr::benjamini_hochberg;
pub use null_model::{stream_rng, NullSampler};
pub use summary::{summarize, two_sided_p_value, Aggregate};

use crate::config::AnalysisConfig;
use crate::core_types::{
    AnomalySeries, ConfidenceInterval, DustEvent, FitQuality, PersistenceRecord,
    StatisticalTestResult, TestScope, TimeSeriesStore,
};
use crate::error::{ConfigurationError, InsufficientSampleError, SeriesError};
use crate::temporal::{build_anomalies, fit_profile, lag_profile};
use chrono::Datelike;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

/// Random stream reserved for pseudo-event draws; bootstrap scopes use 1..
const NULL_STREAM: u64 = 0;

/// One test's outcome: a result, or why it could not be computed
#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub scope: TestScope,
    pub result: Result<StatisticalTestResult, InsufficientSampleError>,
}

/// Everything the statistical stage produces
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignificanceReport {
    /// Per variable (sorted): persistence time, then lags ascending
    pub outcomes: Vec<TestOutcome>,
    pub intervals: Vec<ConfidenceInterval>,
    pub requested_resamples: usize,
    pub effective_resamples: usize,
    /// Admissible pseudo-event windows in the series
    pub null_windows: usize,
}

impl SignificanceReport {
    /// Successfully computed tests
    pub fn results(&self) -> impl Iterator<Item = &StatisticalTestResult> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Tests surviving the false-discovery-rate control
    pub fn significant(&self) -> impl Iterator<Item = &StatisticalTestResult> {
        self.results().filter(|r| r.significant)
    }

    pub fn outcome(&self, scope: &TestScope) -> Option<&TestOutcome> {
        self.outcomes.iter().find(|o| &o.scope == scope)
    }
}

/// Null statistics of one resample for one variable
#[derive(Debug, Clone)]
struct NullDraw {
    lag_aggregates: Vec<Option<f64>>,
    tau_aggregate: Option<f64>,
}

/// Observed per-event values for one variable
#[derive(Debug, Clone, Default)]
struct Observed {
    by_lag: Vec<Vec<f64>>,
    taus: Vec<f64>,
}

/// Tests persistence statistics against pseudo-event nulls
#[derive(Debug, Clone)]
pub struct StatisticalAnalyzer {
    config: AnalysisConfig,
    variables: Vec<String>,
}

impl StatisticalAnalyzer {
    /// # Errors
    /// Invalid statistical or temporal parameters.
    pub fn new(config: &AnalysisConfig) -> Result<Self, ConfigurationError> {
        config.statistics.validate()?;
        config.temporal.validate()?;
        if config.domain.target_variables.is_empty() {
            return Err(ConfigurationError::Missing("target_variables"));
        }
        let mut variables = config.domain.target_variables.clone();
        variables.sort();
        variables.dedup();
        Ok(Self {
            config: config.clone(),
            variables,
        })
    }

    /// Run every test and bootstrap interval.
    ///
    /// `events` must be the detected events the records were built from; they
    /// define the regions excluded from null sampling.
    ///
    /// # Errors
    /// Only when a target variable is missing from the store.
    pub fn test_significance(
        &self,
        records: &[PersistenceRecord],
        events: &[DustEvent],
        store: &TimeSeriesStore,
    ) -> Result<SignificanceReport, SeriesError> {
        let stats = &self.config.statistics;
        let temporal = &self.config.temporal;
        let lag_window = temporal.lag_window;

        let observed = self.collect_observed(records);
        let qualifying = events.iter().filter(|e| !e.truncated).count();

        let anomalies = build_anomalies(
            store,
            &self.variables,
            &self.config.climatology,
            temporal.standardize_anomalies,
        )?;

        let axis = store.axis();
        let domain = &self.config.domain;
        let sampler = NullSampler::new(
            axis.len(),
            events,
            self.config.detection.min_duration,
            lag_window,
            stats.exclusion_buffer,
            |start| axis.get(start).is_some_and(|ts| domain.in_focus(ts.month())),
        );

        let sets: Vec<Vec<usize>> = if qualifying == 0 {
            Vec::new()
        } else {
            let draw = |r: usize| {
                let mut rng = stream_rng(stats.seed, NULL_STREAM, r as u64);
                sampler.draw(qualifying, &mut rng)
            };
            if stats.parallel {
                (0..stats.n_resamples).into_par_iter().filter_map(draw).collect()
            } else {
                (0..stats.n_resamples).filter_map(draw).collect()
            }
        };
        let effective = sets.len();
        if effective < stats.n_resamples {
            warn!(
                "Null sampling drew {}/{} resamples ({} admissible windows)",
                effective,
                stats.n_resamples,
                sampler.window_count()
            );
        }

        let mut outcomes = Vec::new();
        let mut intervals = Vec::new();
        for (variable, series) in self.variables.iter().zip(&anomalies) {
            let draws = self.null_draws(series, &sets);
            let obs = observed.get(variable.as_str()).cloned().unwrap_or_default();

            let tau_scope = TestScope::PersistenceTime {
                variable: variable.clone(),
            };
            let tau_null: Vec<f64> = draws.iter().filter_map(|d| d.tau_aggregate).collect();
            let stream = outcomes.len();
            outcomes.push(self.outcome(tau_scope.clone(), "tau", &obs.taus, &tau_null));
            intervals.extend(self.interval(tau_scope, "tau", &obs.taus, stream));

            for lag in 0..=lag_window {
                let scope = TestScope::LagAnomaly {
                    variable: variable.clone(),
                    lag,
                };
                let values = obs.by_lag.get(lag).map_or(&[][..], Vec::as_slice);
                let null: Vec<f64> = draws
                    .iter()
                    .filter_map(|d| d.lag_aggregates.get(lag).copied().flatten())
                    .collect();
                let stream = outcomes.len();
                outcomes.push(self.outcome(scope.clone(), "anomaly", values, &null));
                intervals.extend(self.interval(scope, "anomaly", values, stream));
            }
        }

        self.apply_fdr(&mut outcomes);

        let computed = outcomes.iter().filter(|o| o.result.is_ok()).count();
        info!(
            "Significance: {} of {} tests computed, {} significant at FDR {}",
            computed,
            outcomes.len(),
            outcomes
                .iter()
                .filter(|o| o.result.as_ref().is_ok_and(|r| r.significant))
                .count(),
            stats.fdr_level
        );

        Ok(SignificanceReport {
            outcomes,
            intervals,
            requested_resamples: stats.n_resamples,
            effective_resamples: effective,
            null_windows: sampler.window_count(),
        })
    }

    /// Group observed lag anomalies and persistence times by variable.
    /// Truncated events never contribute.
    fn collect_observed<'a>(&self, records: &'a [PersistenceRecord]) -> FxHashMap<&'a str, Observed> {
        let lag_window = self.config.temporal.lag_window;
        let mut observed: FxHashMap<&str, Observed> = FxHashMap::default();
        let mut seen_fit: FxHashSet<(&str, u32)> = FxHashSet::default();

        for record in records.iter().filter(|r| !r.truncated) {
            let entry = observed.entry(record.variable.as_str()).or_insert_with(|| Observed {
                by_lag: vec![Vec::new(); lag_window + 1],
                taus: Vec::new(),
            });
            if let Some(bucket) = entry.by_lag.get_mut(record.lag) {
                bucket.push(record.anomaly_value);
            }
            if record.fit_quality == FitQuality::Ok
                && seen_fit.insert((record.variable.as_str(), record.event_id))
            {
                if let Some(fit) = record.decay_fit_params {
                    entry.taus.push(fit.tau);
                }
            }
        }
        observed
    }

    /// Analyse every pseudo-event set for one variable
    fn null_draws(&self, series: &AnomalySeries, sets: &[Vec<usize>]) -> Vec<NullDraw> {
        let temporal = &self.config.temporal;
        let aggregate = self.config.statistics.aggregate;
        let lag_window = temporal.lag_window;

        let analyse = |ends: &Vec<usize>| {
            let mut by_lag: Vec<Vec<f64>> = vec![Vec::new(); lag_window + 1];
            let mut taus = Vec::new();
            for &end in ends {
                let profile = lag_profile(series, end, lag_window);
                for sample in &profile {
                    by_lag[sample.lag].push(sample.anomaly);
                }
                if let (Some(fit), FitQuality::Ok) = fit_profile(&profile, temporal) {
                    taus.push(fit.tau);
                }
            }
            NullDraw {
                lag_aggregates: by_lag.iter().map(|v| aggregate.apply(v)).collect(),
                tau_aggregate: aggregate.apply(&taus),
            }
        };

        if self.config.statistics.parallel {
            sets.par_iter().map(analyse).collect()
        } else {
            sets.iter().map(analyse).collect()
        }
    }

    fn statistic_name(&self, quantity: &str) -> String {
        format!("{}_{}", self.config.statistics.aggregate.label(), quantity)
    }

    fn outcome(&self, scope: TestScope, quantity: &str, values: &[f64], null: &[f64]) -> TestOutcome {
        let stats = &self.config.statistics;
        if values.len() < stats.min_event_count {
            debug!("{}: {} events, test skipped", scope, values.len());
            return TestOutcome {
                result: Err(InsufficientSampleError::TooFewEvents {
                    scope: scope.to_string(),
                    available: values.len(),
                    required: stats.min_event_count,
                }),
                scope,
            };
        }
        if null.len() < stats.min_resamples {
            return TestOutcome {
                result: Err(InsufficientSampleError::TooFewResamples {
                    scope: scope.to_string(),
                    effective: null.len(),
                    required: stats.min_resamples,
                }),
                scope,
            };
        }

        let Some(observed_statistic) = stats.aggregate.apply(values) else {
            return TestOutcome {
                result: Err(InsufficientSampleError::TooFewEvents {
                    scope: scope.to_string(),
                    available: 0,
                    required: stats.min_event_count,
                }),
                scope,
            };
        };
        let p_value = two_sided_p_value(observed_statistic, null);
        TestOutcome {
            result: Ok(StatisticalTestResult {
                scope: scope.clone(),
                statistic_name: self.statistic_name(quantity),
                observed_statistic,
                null_distribution_summary: summarize(null),
                p_value,
                adjusted_p_value: p_value,
                significant: false,
                sample_size: values.len(),
                effective_resamples: null.len(),
                requested_resamples: stats.n_resamples,
            }),
            scope,
        }
    }

    fn interval(
        &self,
        scope: TestScope,
        quantity: &str,
        values: &[f64],
        index: usize,
    ) -> Option<ConfidenceInterval> {
        let stats = &self.config.statistics;
        if values.len() < stats.min_event_count {
            return None;
        }
        let estimate = stats.aggregate.apply(values)?;
        let ci = percentile_interval(
            values,
            stats.aggregate,
            stats.n_bootstrap,
            stats.confidence_level,
            stats.seed,
            NULL_STREAM + 1 + index as u64,
            stats.parallel,
        )?;
        Some(ConfidenceInterval {
            scope,
            statistic_name: self.statistic_name(quantity),
            estimate,
            lower: ci.lower,
            upper: ci.upper,
            confidence_level: stats.confidence_level,
            n_bootstrap: stats.n_bootstrap,
            sample_size: values.len(),
        })
    }

    fn apply_fdr(&self, outcomes: &mut [TestOutcome]) {
        let fdr_level = self.config.statistics.fdr_level;
        let raw: Vec<f64> = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|r| r.p_value))
            .collect();
        let adjusted = benjamini_hochberg(&raw);
        for (result, adj) in outcomes
            .iter_mut()
            .filter_map(|o| o.result.as_mut().ok())
            .zip(adjusted)
        {
            result.adjusted_p_value = adj;
            result.significant = adj <= fdr_level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClimatologyConfig, ClimatologyKey};
    use crate::core_types::{TimeAxis, TimeSeries};
    use crate::temporal::TemporalAnalyzer;
    use chrono::{Duration, TimeZone, Utc};

    const LEN: usize = 120;
    const LAG_WINDOW: usize = 5;

    fn event(id: u32, end: usize) -> DustEvent {
        let t0 = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
        DustEvent {
            event_id: id,
            start_time: t0 + Duration::days(end as i64 - 1),
            end_time: t0 + Duration::days(end as i64),
            start_index: end - 1,
            end_index: end,
            peak_magnitude: 3.0,
            peak_time: t0 + Duration::days(end as i64),
            spatial_extent: 1.0,
            exceedance_steps: 2,
            truncated: false,
        }
    }

    /// Small deterministic noise plus a decaying response after each event end
    fn store(event_ends: &[usize]) -> TimeSeriesStore {
        let mut values: Vec<f64> = (0..LEN)
            .map(|i| 0.05 * (((i * 37) % 11) as f64 - 5.0))
            .collect();
        for &end in event_ends {
            for lag in 0..=LAG_WINDOW {
                values[end + lag] += 3.0 * (-(lag as f64) / 2.0).exp();
            }
        }
        let series: Vec<Option<f64>> = values.into_iter().map(Some).collect();
        let axis = TimeAxis::daily(Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap(), LEN);
        TimeSeriesStore::new(axis)
            .with_series(TimeSeries::domain_aggregate("cer", &series).unwrap())
            .unwrap()
    }

    fn config(min_event_count: usize, parallel: bool) -> AnalysisConfig {
        let mut config = AnalysisConfig::mediterranean_summer();
        config.domain.target_variables = vec!["cer".to_string()];
        config.climatology = ClimatologyConfig {
            key: ClimatologyKey::Month,
            baseline: None,
        };
        config.temporal.lag_window = LAG_WINDOW;
        config.temporal.parallel = parallel;
        config.statistics.n_resamples = 200;
        config.statistics.n_bootstrap = 200;
        config.statistics.min_event_count = min_event_count;
        config.statistics.parallel = parallel;
        config
    }

    fn run(config: &AnalysisConfig, events: &[DustEvent]) -> SignificanceReport {
        let ends: Vec<usize> = events.iter().map(|e| e.end_index).collect();
        let store = store(&ends);
        let temporal = TemporalAnalyzer::new(config).unwrap().analyze(events, &store).unwrap();
        StatisticalAnalyzer::new(config)
            .unwrap()
            .test_significance(&temporal.records, events, &store)
            .unwrap()
    }

    #[test]
    fn test_too_few_events_is_reported_per_test() {
        let events = [event(0, 20), event(1, 50), event(2, 80)];
        let report = run(&config(5, false), &events);

        let tau = report
            .outcome(&TestScope::PersistenceTime {
                variable: "cer".to_string(),
            })
            .unwrap();
        assert!(matches!(
            tau.result,
            Err(InsufficientSampleError::TooFewEvents { required: 5, .. })
        ));
        assert_eq!(report.outcomes.len(), 1 + LAG_WINDOW + 1);
        assert_eq!(report.results().count(), 0);
        assert!(report.intervals.is_empty());
    }

    #[test]
    fn test_strong_response_is_significant_at_lag_zero() {
        let events = [event(0, 20), event(1, 50), event(2, 80)];
        let report = run(&config(3, false), &events);
        assert_eq!(report.effective_resamples, 200);

        let lag0 = report
            .outcome(&TestScope::LagAnomaly {
                variable: "cer".to_string(),
                lag: 0,
            })
            .unwrap()
            .result
            .as_ref()
            .unwrap();
        assert_eq!(lag0.sample_size, 3);
        assert_eq!(lag0.statistic_name, "mean_anomaly");
        assert!(lag0.p_value < 0.05, "p = {}", lag0.p_value);
        assert!(lag0.significant);

        for result in report.results() {
            assert!((0.0..=1.0).contains(&result.p_value));
            assert!(result.adjusted_p_value >= result.p_value);
        }
        let ci = report
            .intervals
            .iter()
            .find(|ci| ci.scope == lag0.scope)
            .unwrap();
        assert!(ci.lower <= ci.estimate && ci.estimate <= ci.upper);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let events = [event(0, 20), event(1, 50), event(2, 80)];
        let seq = run(&config(3, false), &events);
        let par = run(&config(3, true), &events);
        assert_eq!(seq, par);
    }

    #[test]
    fn test_exhausted_null_reports_too_few_resamples() {
        // Footprints cover almost the whole series, leaving no room for three
        // disjoint pseudo-events
        let mut config = config(1, false);
        config.statistics.exclusion_buffer = 30;
        let events = [event(0, 20), event(1, 50), event(2, 80)];
        let report = run(&config, &events);
        assert_eq!(report.effective_resamples, 0);
        assert_eq!(report.null_windows, 0);
        let lag_outcomes = report.outcomes.iter().filter(|o| o.scope.lag().is_some());
        for outcome in lag_outcomes {
            assert!(matches!(
                outcome.result,
                Err(InsufficientSampleError::TooFewResamples { effective: 0, .. })
            ));
        }
    }

    #[test]
    fn test_invalid_levels_rejected() {
        let mut config = config(3, false);
        config.statistics.fdr_level = 1.5;
        assert!(StatisticalAnalyzer::new(&config).is_err());
    }
}
