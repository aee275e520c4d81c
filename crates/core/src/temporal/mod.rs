//! Lag analysis of cloud-variable anomalies after each dust event
//!
//! For every (event, variable) pair the analyzer samples the variable's anomaly
//! at lags `0..=lag_window` after the event's last exceeding step, skipping lags
//! whose sample is invalid, then fits a decay model to the surviving lags.
//! Pairs are independent and run in parallel; output order is fixed by
//! `(event_id, variable, lag)` regardless of scheduling.

pub mod decay;

pub use decay::{fit_decay, DecayModel, DecayModelKind, ExponentialDecay, PowerLawDecay};

use crate::config::{AnalysisConfig, ClimatologyConfig, TemporalConfig};
use crate::core_types::{
    AnomalyKind, AnomalySeries, DecayFit, DustEvent, FitQuality, FitSummary, PersistenceRecord,
    TimeSeriesStore,
};
use crate::error::{ConfigurationError, SeriesError};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

/// One valid lag sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagSample {
    pub lag: usize,
    pub index: usize,
    pub anomaly: f64,
    pub sample_count: usize,
}

/// Valid anomalies at lags `0..=lag_window` after `end_index`
pub fn lag_profile(anomalies: &AnomalySeries, end_index: usize, lag_window: usize) -> Vec<LagSample> {
    (0..=lag_window)
        .filter_map(|lag| {
            let index = end_index + lag;
            anomalies.get(index).map(|anomaly| LagSample {
                lag,
                index,
                anomaly,
                sample_count: anomalies.sample_count(index),
            })
        })
        .collect()
}

/// Fit the configured decay model to a lag profile
pub fn fit_profile(profile: &[LagSample], config: &TemporalConfig) -> (Option<DecayFit>, FitQuality) {
    let points: Vec<(f64, f64)> = profile.iter().map(|s| (s.lag as f64, s.anomaly)).collect();
    fit_decay(config.decay_model.model(), &points, config)
}

/// Anomaly views for `variables`, in the given order
///
/// # Errors
/// Any variable missing from the store.
pub fn build_anomalies(
    store: &TimeSeriesStore,
    variables: &[String],
    climatology: &ClimatologyConfig,
    standardize: bool,
) -> Result<Vec<AnomalySeries>, SeriesError> {
    let kind = if standardize {
        AnomalyKind::Standardized
    } else {
        AnomalyKind::Raw
    };
    variables
        .iter()
        .map(|v| store.anomalies(v, climatology, kind))
        .collect()
}

/// Records and per-pair fit outcomes from one analysis run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TemporalOutput {
    /// Ordered by event id, then variable name, then lag
    pub records: Vec<PersistenceRecord>,
    /// One per (event, variable) pair attempted, same ordering
    pub fits: Vec<FitSummary>,
}

impl TemporalOutput {
    /// Count of fits per quality label
    pub fn quality_counts(&self) -> FxHashMap<FitQuality, usize> {
        let mut counts = FxHashMap::default();
        for fit in &self.fits {
            *counts.entry(fit.fit_quality).or_insert(0) += 1;
        }
        counts
    }
}

/// Links dust events to downstream cloud-variable anomalies
#[derive(Debug, Clone)]
pub struct TemporalAnalyzer {
    temporal: TemporalConfig,
    climatology: ClimatologyConfig,
    variables: Vec<String>,
}

impl TemporalAnalyzer {
    /// # Errors
    /// Invalid temporal parameters or an empty variable list.
    pub fn new(config: &AnalysisConfig) -> Result<Self, ConfigurationError> {
        Self::from_parts(
            config.temporal,
            config.climatology,
            config.domain.target_variables.clone(),
        )
    }

    /// # Errors
    /// Invalid temporal parameters or an empty variable list.
    pub fn from_parts(
        temporal: TemporalConfig,
        climatology: ClimatologyConfig,
        mut variables: Vec<String>,
    ) -> Result<Self, ConfigurationError> {
        temporal.validate()?;
        if variables.is_empty() {
            return Err(ConfigurationError::Missing("target_variables"));
        }
        variables.sort();
        variables.dedup();
        Ok(Self {
            temporal,
            climatology,
            variables,
        })
    }

    /// Variables analysed, in output order
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn config(&self) -> &TemporalConfig {
        &self.temporal
    }

    /// Build persistence records for every event and target variable.
    ///
    /// # Errors
    /// Only when a target variable is missing from the store. Individual fit
    /// failures are recorded in the output, never raised.
    pub fn analyze(
        &self,
        events: &[DustEvent],
        store: &TimeSeriesStore,
    ) -> Result<TemporalOutput, SeriesError> {
        let anomalies = build_anomalies(
            store,
            &self.variables,
            &self.climatology,
            self.temporal.standardize_anomalies,
        )?;

        let mut ordered: Vec<&DustEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.event_id);

        let pairs: Vec<(&DustEvent, &AnomalySeries)> = ordered
            .iter()
            .flat_map(|event| anomalies.iter().map(move |series| (*event, series)))
            .collect();

        let analyze_pair = |(event, series): &(&DustEvent, &AnomalySeries)| {
            self.analyze_pair(event, series, store)
        };
        let results: Vec<(Vec<PersistenceRecord>, FitSummary)> = if self.temporal.parallel {
            pairs.par_iter().map(analyze_pair).collect()
        } else {
            pairs.iter().map(analyze_pair).collect()
        };

        let mut output = TemporalOutput::default();
        for (records, fit) in results {
            output.records.extend(records);
            output.fits.push(fit);
        }

        let counts = output.quality_counts();
        let failed = counts.get(&FitQuality::FitFailed).copied().unwrap_or(0);
        info!(
            "Temporal analysis: {} events x {} variables -> {} records, {} fits ok",
            ordered.len(),
            self.variables.len(),
            output.records.len(),
            counts.get(&FitQuality::Ok).copied().unwrap_or(0)
        );
        if failed > 0 {
            warn!("{} decay fits failed to converge or were rejected", failed);
        }
        Ok(output)
    }

    fn analyze_pair(
        &self,
        event: &DustEvent,
        anomalies: &AnomalySeries,
        store: &TimeSeriesStore,
    ) -> (Vec<PersistenceRecord>, FitSummary) {
        let profile = lag_profile(anomalies, event.end_index, self.temporal.lag_window);

        let (fit, fit_quality) = if event.truncated {
            (None, FitQuality::Truncated)
        } else {
            fit_profile(&profile, &self.temporal)
        };
        if fit_quality != FitQuality::Ok {
            debug!(
                "Event {} / {}: {} ({} valid lags)",
                event.event_id,
                anomalies.variable(),
                fit_quality,
                profile.len()
            );
        }

        let records = profile
            .iter()
            .filter_map(|sample| {
                Some(PersistenceRecord {
                    event_id: event.event_id,
                    variable: anomalies.variable().to_string(),
                    lag: sample.lag,
                    time: store.axis().get(sample.index)?,
                    anomaly_value: sample.anomaly,
                    sample_count: sample.sample_count,
                    decay_fit_params: fit,
                    fit_quality,
                    truncated: event.truncated,
                })
            })
            .collect();

        let summary = FitSummary {
            event_id: event.event_id,
            variable: anomalies.variable().to_string(),
            valid_lags: profile.len(),
            fit,
            fit_quality,
            truncated: event.truncated,
        };
        (records, summary)
    }
}
