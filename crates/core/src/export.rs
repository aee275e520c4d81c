//! Flat output tables
//!
//! Each table is a list of serde rows written as a JSON array. The persistence
//! table is complete: every (event, variable, lag) combination that was
//! attempted appears, with a status saying why a value is absent.

use crate::config::AnalysisConfig;
use crate::core_types::{FitQuality, TimeAxis};
use crate::error::AnalysisError;
use crate::pipeline::AnalysisOutput;
use crate::statistics::TestOutcome;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Study context written alongside the tables
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    pub domain: String,
    pub bbox: [f64; 4],
    pub focus_months: Vec<u32>,
    pub aod_variable: String,
    pub target_variables: Vec<String>,
    pub series_start: Option<DateTime<Utc>>,
    pub series_end: Option<DateTime<Utc>>,
    pub timesteps: usize,
    pub events: usize,
    pub requested_resamples: usize,
    pub effective_resamples: usize,
    pub config: Option<AnalysisConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_index: usize,
    pub end_index: usize,
    pub duration_steps: usize,
    pub exceedance_steps: usize,
    pub peak_magnitude: f64,
    pub peak_time: DateTime<Utc>,
    pub spatial_extent: f64,
    pub truncated: bool,
}

/// Why a lag row does or does not carry a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LagStatus {
    Ok,
    /// Sample missing, masked, or without climatology
    MissingData,
    /// Lag falls past the end of the series
    BeyondSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceRow {
    pub event_id: u32,
    pub variable: String,
    pub lag: usize,
    pub time: Option<DateTime<Utc>>,
    pub anomaly_value: Option<f64>,
    pub sample_count: usize,
    pub status: LagStatus,
    pub fit_quality: FitQuality,
    pub amplitude: Option<f64>,
    pub tau: Option<f64>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRow {
    pub event_id: u32,
    pub variable: String,
    pub valid_lags: usize,
    pub fit_quality: FitQuality,
    pub amplitude: Option<f64>,
    pub rate_param: Option<f64>,
    pub tau: Option<f64>,
    pub r_squared: Option<f64>,
    pub rmse: Option<f64>,
    pub iterations: Option<usize>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRow {
    pub scope: String,
    pub variable: String,
    pub lag: Option<usize>,
    pub statistic_name: Option<String>,
    pub observed_statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub adjusted_p_value: Option<f64>,
    pub significant: bool,
    pub sample_size: Option<usize>,
    pub effective_resamples: Option<usize>,
    pub requested_resamples: Option<usize>,
    pub null_mean: Option<f64>,
    pub null_p2_5: Option<f64>,
    pub null_p50: Option<f64>,
    pub null_p97_5: Option<f64>,
    /// Set when the test could not be computed
    pub insufficient: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalRow {
    pub scope: String,
    pub variable: String,
    pub lag: Option<usize>,
    pub statistic_name: String,
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub confidence_level: f64,
    pub n_bootstrap: usize,
    pub sample_size: usize,
}

impl From<&TestOutcome> for TestRow {
    fn from(outcome: &TestOutcome) -> Self {
        let scope = &outcome.scope;
        let mut row = TestRow {
            scope: scope.kind().to_string(),
            variable: scope.variable().to_string(),
            lag: scope.lag(),
            statistic_name: None,
            observed_statistic: None,
            p_value: None,
            adjusted_p_value: None,
            significant: false,
            sample_size: None,
            effective_resamples: None,
            requested_resamples: None,
            null_mean: None,
            null_p2_5: None,
            null_p50: None,
            null_p97_5: None,
            insufficient: None,
        };
        match &outcome.result {
            Ok(result) => {
                let null = &result.null_distribution_summary;
                row.statistic_name = Some(result.statistic_name.clone());
                row.observed_statistic = Some(result.observed_statistic);
                row.p_value = Some(result.p_value);
                row.adjusted_p_value = Some(result.adjusted_p_value);
                row.significant = result.significant;
                row.sample_size = Some(result.sample_size);
                row.effective_resamples = Some(result.effective_resamples);
                row.requested_resamples = Some(result.requested_resamples);
                row.null_mean = Some(null.mean);
                row.null_p2_5 = Some(null.p2_5);
                row.null_p50 = Some(null.p50);
                row.null_p97_5 = Some(null.p97_5);
            }
            Err(err) => row.insufficient = Some(err.to_string()),
        }
        row
    }
}

/// The result tables of one run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputTables {
    pub metadata: RunMetadata,
    pub events: Vec<EventRow>,
    pub persistence: Vec<PersistenceRow>,
    pub fits: Vec<FitRow>,
    pub tests: Vec<TestRow>,
    pub intervals: Vec<IntervalRow>,
}

impl OutputTables {
    /// Flatten a run. `axis` is the store's time axis; together with the lag
    /// window it lets absent lags be listed explicitly.
    pub fn build(output: &AnalysisOutput, axis: &TimeAxis, config: &AnalysisConfig) -> Self {
        let lag_window = config.temporal.lag_window;
        let domain = &config.domain;
        let metadata = RunMetadata {
            domain: domain.name.clone(),
            bbox: domain.bbox,
            focus_months: domain.focus_months.clone(),
            aod_variable: domain.aod_variable.clone(),
            target_variables: domain.target_variables.clone(),
            series_start: axis.timestamps().first().copied(),
            series_end: axis.timestamps().last().copied(),
            timesteps: axis.len(),
            events: output.events.len(),
            requested_resamples: output.report.requested_resamples,
            effective_resamples: output.report.effective_resamples,
            config: Some(config.clone()),
        };

        let events = output
            .events
            .iter()
            .map(|e| EventRow {
                event_id: e.event_id,
                start_time: e.start_time,
                end_time: e.end_time,
                start_index: e.start_index,
                end_index: e.end_index,
                duration_steps: e.span_steps(),
                exceedance_steps: e.exceedance_steps,
                peak_magnitude: e.peak_magnitude,
                peak_time: e.peak_time,
                spatial_extent: e.spatial_extent,
                truncated: e.truncated,
            })
            .collect();

        let end_index: FxHashMap<u32, usize> =
            output.events.iter().map(|e| (e.event_id, e.end_index)).collect();
        let observed: FxHashMap<(u32, &str, usize), _> = output
            .records
            .iter()
            .map(|r| ((r.event_id, r.variable.as_str(), r.lag), r))
            .collect();

        let mut persistence = Vec::new();
        for fit in &output.fits {
            let Some(&end) = end_index.get(&fit.event_id) else {
                continue;
            };
            for lag in 0..=lag_window {
                let time = axis.get(end + lag);
                let record = observed.get(&(fit.event_id, fit.variable.as_str(), lag));
                let status = match (record, time) {
                    (Some(_), _) => LagStatus::Ok,
                    (None, Some(_)) => LagStatus::MissingData,
                    (None, None) => LagStatus::BeyondSeries,
                };
                persistence.push(PersistenceRow {
                    event_id: fit.event_id,
                    variable: fit.variable.clone(),
                    lag,
                    time,
                    anomaly_value: record.map(|r| r.anomaly_value),
                    sample_count: record.map_or(0, |r| r.sample_count),
                    status,
                    fit_quality: fit.fit_quality,
                    amplitude: fit.fit.map(|f| f.amplitude),
                    tau: fit.fit.map(|f| f.tau),
                    truncated: fit.truncated,
                });
            }
        }

        let fits = output
            .fits
            .iter()
            .map(|s| FitRow {
                event_id: s.event_id,
                variable: s.variable.clone(),
                valid_lags: s.valid_lags,
                fit_quality: s.fit_quality,
                amplitude: s.fit.map(|f| f.amplitude),
                rate_param: s.fit.map(|f| f.rate_param),
                tau: s.fit.map(|f| f.tau),
                r_squared: s.fit.map(|f| f.r_squared),
                rmse: s.fit.map(|f| f.rmse),
                iterations: s.fit.map(|f| f.iterations),
                truncated: s.truncated,
            })
            .collect();

        let tests = output.report.outcomes.iter().map(TestRow::from).collect();

        let intervals = output
            .report
            .intervals
            .iter()
            .map(|ci| IntervalRow {
                scope: ci.scope.kind().to_string(),
                variable: ci.scope.variable().to_string(),
                lag: ci.scope.lag(),
                statistic_name: ci.statistic_name.clone(),
                estimate: ci.estimate,
                lower: ci.lower,
                upper: ci.upper,
                confidence_level: ci.confidence_level,
                n_bootstrap: ci.n_bootstrap,
                sample_size: ci.sample_size,
            })
            .collect();

        Self {
            metadata,
            events,
            persistence,
            fits,
            tests,
            intervals,
        }
    }

    /// Write the metadata and every table into `dir` as `<table>.json`, creating
    /// the directory.
    ///
    /// # Errors
    /// Returns error if the directory or a file cannot be written
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>, AnalysisError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| AnalysisError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let metadata = dir.join("metadata.json");
        let contents = serde_json::to_string_pretty(&self.metadata)?;
        fs::write(&metadata, contents).map_err(|source| AnalysisError::Io {
            path: metadata.display().to_string(),
            source,
        })?;
        let written = vec![
            metadata,
            write_json(dir.join("events.json"), &self.events)?,
            write_json(dir.join("persistence.json"), &self.persistence)?,
            write_json(dir.join("fits.json"), &self.fits)?,
            write_json(dir.join("tests.json"), &self.tests)?,
            write_json(dir.join("intervals.json"), &self.intervals)?,
        ];
        Ok(written)
    }
}

/// Write `rows` as a pretty JSON array and return the path written
///
/// # Errors
/// Returns error if the rows cannot be serialized or the file written
pub fn write_json<T: Serialize>(path: PathBuf, rows: &[T]) -> Result<PathBuf, AnalysisError> {
    let contents = serde_json::to_string_pretty(rows)?;
    fs::write(&path, contents).map_err(|source| AnalysisError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path)
}
