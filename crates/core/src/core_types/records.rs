//! Typed records exchanged between the analysis stages
//!
//! Each stage builds its output collection once and hands it downstream by
//! shared reference; nothing here is mutated after construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// DUST EVENTS
// ============================================================================

/// A contiguous (gap-bridged) run of AOD exceedance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DustEvent {
    /// Position in ascending `start_time` order, starting at 0
    pub event_id: u32,
    pub start_time: DateTime<Utc>,
    /// Last exceeding timestep, never bridged filler
    pub end_time: DateTime<Utc>,
    pub start_index: usize,
    pub end_index: usize,
    /// Largest exceedance value, in the units of the threshold mode
    pub peak_magnitude: f64,
    pub peak_time: DateTime<Utc>,
    /// Largest fraction of valid cells individually exceeding the threshold
    pub spatial_extent: f64,
    /// Observed exceeding steps (bridged gaps and missing steps excluded)
    pub exceedance_steps: usize,
    /// Open at the start or end of the series
    pub truncated: bool,
}

impl DustEvent {
    /// Steps from first to last exceeding timestep, inclusive
    #[inline]
    pub fn span_steps(&self) -> usize {
        self.end_index - self.start_index + 1
    }
}

// ============================================================================
// DECAY FITS
// ============================================================================

/// Outcome of fitting a decay model to one (event, variable) lag sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitQuality {
    Ok,
    FitFailed,
    InsufficientData,
    /// Event is open-ended; fitting skipped
    Truncated,
}

impl FitQuality {
    /// Whether fitted parameters are present and usable
    #[inline]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for FitQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitQuality::Ok => write!(f, "ok"),
            FitQuality::FitFailed => write!(f, "fit_failed"),
            FitQuality::InsufficientData => write!(f, "insufficient_data"),
            FitQuality::Truncated => write!(f, "truncated"),
        }
    }
}

/// Fitted decay parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayFit {
    /// A0, the anomaly extrapolated to lag 0
    pub amplitude: f64,
    /// Model rate parameter: τ for exponential, α for power law
    pub rate_param: f64,
    /// Persistence time constant in steps (e-folding lag), always > 0
    pub tau: f64,
    pub r_squared: f64,
    pub rmse: f64,
    pub iterations: usize,
}

/// Fit outcome for one (event, variable) pair, emitted even when no lag is valid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub event_id: u32,
    pub variable: String,
    pub valid_lags: usize,
    pub fit: Option<DecayFit>,
    pub fit_quality: FitQuality,
    pub truncated: bool,
}

/// Anomaly of one variable at one lag after one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceRecord {
    pub event_id: u32,
    pub variable: String,
    /// Steps after the event's last exceeding timestep
    pub lag: usize,
    pub time: DateTime<Utc>,
    pub anomaly_value: f64,
    /// Valid spatial samples behind the domain-mean anomaly
    pub sample_count: usize,
    pub decay_fit_params: Option<DecayFit>,
    pub fit_quality: FitQuality,
    pub truncated: bool,
}

// ============================================================================
// STATISTICAL RESULTS
// ============================================================================

/// What a statistical test is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum TestScope {
    /// Aggregate persistence time over the event set for one variable
    PersistenceTime { variable: String },
    /// Aggregate anomaly over the event set for one variable at one lag
    LagAnomaly { variable: String, lag: usize },
}

impl TestScope {
    pub fn variable(&self) -> &str {
        match self {
            TestScope::PersistenceTime { variable } | TestScope::LagAnomaly { variable, .. } => {
                variable
            }
        }
    }

    pub fn lag(&self) -> Option<usize> {
        match self {
            TestScope::PersistenceTime { .. } => None,
            TestScope::LagAnomaly { lag, .. } => Some(*lag),
        }
    }

    /// Short kind label used in tables
    pub fn kind(&self) -> &'static str {
        match self {
            TestScope::PersistenceTime { .. } => "persistence_time",
            TestScope::LagAnomaly { .. } => "lag_anomaly",
        }
    }
}

impl fmt::Display for TestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestScope::PersistenceTime { variable } => write!(f, "{variable}/tau"),
            TestScope::LagAnomaly { variable, lag } => write!(f, "{variable}/lag{lag}"),
        }
    }
}

/// Percentile summary of a null distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NullSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub p2_5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p97_5: f64,
}

/// Significance of one observed aggregate against its resampled null
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalTestResult {
    pub scope: TestScope,
    pub statistic_name: String,
    pub observed_statistic: f64,
    pub null_distribution_summary: NullSummary,
    /// Two-sided, in `[0, 1]`
    pub p_value: f64,
    /// Benjamini-Hochberg adjusted across the whole test table
    pub adjusted_p_value: f64,
    pub significant: bool,
    /// Real events contributing to the observed statistic
    pub sample_size: usize,
    /// Null resamples actually drawn
    pub effective_resamples: usize,
    pub requested_resamples: usize,
}

/// Bootstrap percentile interval for an event-set aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub scope: TestScope,
    pub statistic_name: String,
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub confidence_level: f64,
    pub n_bootstrap: usize,
    pub sample_size: usize,
}
