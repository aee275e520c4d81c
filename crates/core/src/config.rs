//! Immutable analysis configuration
//!
//! Every recognised option is enumerated here and validated once, before any
//! stage runs. Stages receive the section they need by reference and never read
//! process-wide state.
//!
//! # Example
//!
//! ```
//! use dust_persistence_core::config::AnalysisConfig;
//!
//! let config = AnalysisConfig::from_toml_str(r#"
//!     [domain]
//!     name = "test"
//!     target_variables = ["cer"]
//!
//!     [detection]
//!     threshold = 2.0
//!     min_duration = 2
//!     max_gap = 1
//! "#).unwrap();
//! assert_eq!(config.detection.min_duration, 2);
//! ```

use crate::error::ConfigurationError;
use crate::statistics::Aggregate;
use crate::temporal::DecayModelKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// STUDY DOMAIN
// ============================================================================

/// Where and when the study looks, and which variables it reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyDomain {
    pub name: String,
    /// `[min_lon, min_lat, max_lon, max_lat]` in degrees
    pub bbox: [f64; 4],
    /// Calendar months (1-12) eligible for event detection; empty means all
    pub focus_months: Vec<u32>,
    /// Name of the aerosol optical depth variable in the store
    pub aod_variable: String,
    /// Cloud variables linked to each event
    pub target_variables: Vec<String>,
}

impl Default for StudyDomain {
    fn default() -> Self {
        Self {
            name: "unnamed".to_string(),
            bbox: [-180.0, -90.0, 180.0, 90.0],
            focus_months: Vec::new(),
            aod_variable: "aod".to_string(),
            target_variables: Vec::new(),
        }
    }
}

impl StudyDomain {
    /// Whether timesteps in `month` take part in detection
    #[inline]
    pub fn in_focus(&self, month: u32) -> bool {
        self.focus_months.is_empty() || self.focus_months.contains(&month)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let [min_lon, min_lat, max_lon, max_lat] = self.bbox;
        let lon_ok = (-180.0..=180.0).contains(&min_lon) && (-180.0..=180.0).contains(&max_lon);
        let lat_ok = (-90.0..=90.0).contains(&min_lat) && (-90.0..=90.0).contains(&max_lat);
        if !(lon_ok && lat_ok && min_lon < max_lon && min_lat < max_lat) {
            return Err(ConfigurationError::out_of_range(
                "bbox",
                format!("invalid bounding box {:?}", self.bbox),
            ));
        }
        if let Some(bad) = self.focus_months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(ConfigurationError::out_of_range(
                "focus_months",
                format!("month {bad} not in 1..=12"),
            ));
        }
        if self.aod_variable.is_empty() {
            return Err(ConfigurationError::Missing("aod_variable"));
        }
        if self.target_variables.is_empty() {
            return Err(ConfigurationError::Missing("target_variables"));
        }
        Ok(())
    }
}

// ============================================================================
// CLIMATOLOGY
// ============================================================================

/// Calendar binning for the climatological baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClimatologyKey {
    /// Day of year, pooled over a circular window of ±`half_window` days
    DayOfYear { half_window: u32 },
    /// Calendar month
    Month,
}

/// Inclusive range of calendar years used to build the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselinePeriod {
    pub start_year: i32,
    pub end_year: i32,
}

impl BaselinePeriod {
    #[inline]
    pub fn contains(&self, year: i32) -> bool {
        (self.start_year..=self.end_year).contains(&year)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimatologyConfig {
    pub key: ClimatologyKey,
    /// `None` uses the whole series as baseline
    pub baseline: Option<BaselinePeriod>,
}

impl Default for ClimatologyConfig {
    fn default() -> Self {
        Self {
            key: ClimatologyKey::DayOfYear { half_window: 15 },
            baseline: None,
        }
    }
}

impl ClimatologyConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if let ClimatologyKey::DayOfYear { half_window } = self.key {
            if half_window > 182 {
                return Err(ConfigurationError::out_of_range(
                    "climatology.half_window",
                    format!("{half_window} exceeds half a year"),
                ));
            }
        }
        if let Some(b) = self.baseline {
            if b.start_year > b.end_year {
                return Err(ConfigurationError::out_of_range(
                    "climatology.baseline",
                    format!("start year {} after end year {}", b.start_year, b.end_year),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// DETECTION
// ============================================================================

/// What quantity the detection threshold is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Raw domain-mean AOD
    Absolute,
    /// AOD minus its climatological mean
    Anomaly,
    /// Anomaly divided by the climatological standard deviation
    #[default]
    ZScore,
}

/// Event segmentation parameters. All three are required.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub threshold: f64,
    #[serde(default)]
    pub threshold_mode: ThresholdMode,
    /// Minimum exceeding steps for a candidate to qualify as an event
    pub min_duration: usize,
    /// Maximum consecutive sub-threshold steps bridged inside one event
    pub max_gap: usize,
}

impl DetectionConfig {
    pub fn new(threshold: f64, min_duration: usize, max_gap: usize) -> Self {
        Self {
            threshold,
            threshold_mode: ThresholdMode::default(),
            min_duration,
            max_gap,
        }
    }

    pub fn with_mode(mut self, mode: ThresholdMode) -> Self {
        self.threshold_mode = mode;
        self
    }

    /// # Errors
    /// Any of `threshold`, `min_duration`, `max_gap` non-positive.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::require_positive("threshold", self.threshold)?;
        ConfigurationError::require_positive("min_duration", self.min_duration as f64)?;
        ConfigurationError::require_positive("max_gap", self.max_gap as f64)?;
        Ok(())
    }
}

// ============================================================================
// TEMPORAL ANALYSIS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Last lag (in steps after event end) sampled; lags run `0..=lag_window`
    pub lag_window: usize,
    pub min_points_for_fit: usize,
    pub max_fit_iterations: usize,
    /// Relative parameter change below which the optimiser has converged
    pub convergence_tolerance: f64,
    /// Fits whose persistence time exceeds this many steps are rejected
    pub max_persistence_steps: f64,
    pub decay_model: DecayModelKind,
    /// Divide cloud anomalies by climatological standard deviation
    pub standardize_anomalies: bool,
    pub parallel: bool,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            lag_window: 10,
            min_points_for_fit: 3,
            max_fit_iterations: 200,
            convergence_tolerance: 1e-8,
            max_persistence_steps: 1_000.0,
            decay_model: DecayModelKind::Exponential,
            standardize_anomalies: false,
            parallel: true,
        }
    }
}

impl TemporalConfig {
    /// # Errors
    /// Non-positive window, fit sizes or tolerances.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::require_positive("lag_window", self.lag_window as f64)?;
        ConfigurationError::require_positive("max_fit_iterations", self.max_fit_iterations as f64)?;
        ConfigurationError::require_positive("convergence_tolerance", self.convergence_tolerance)?;
        ConfigurationError::require_positive("max_persistence_steps", self.max_persistence_steps)?;
        if self.min_points_for_fit < 2 {
            return Err(ConfigurationError::out_of_range(
                "min_points_for_fit",
                "a two-parameter decay needs at least 2 points",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// STATISTICAL ANALYSIS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticalConfig {
    pub n_resamples: usize,
    pub min_event_count: usize,
    /// Effective null resamples below this make a test unusable
    pub min_resamples: usize,
    /// Benjamini-Hochberg false-discovery-rate level
    pub fdr_level: f64,
    pub aggregate: Aggregate,
    /// Steps around each real event that pseudo-events must avoid
    pub exclusion_buffer: usize,
    pub n_bootstrap: usize,
    pub confidence_level: f64,
    pub seed: u64,
    pub parallel: bool,
}

impl Default for StatisticalConfig {
    fn default() -> Self {
        Self {
            n_resamples: 1_000,
            min_event_count: 5,
            min_resamples: 1,
            fdr_level: 0.05,
            aggregate: Aggregate::Mean,
            exclusion_buffer: 0,
            n_bootstrap: 1_000,
            confidence_level: 0.95,
            seed: 42,
            parallel: true,
        }
    }
}

impl StatisticalConfig {
    /// # Errors
    /// Non-positive counts, or levels outside the open unit interval.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::require_positive("n_resamples", self.n_resamples as f64)?;
        ConfigurationError::require_positive("min_event_count", self.min_event_count as f64)?;
        ConfigurationError::require_positive("min_resamples", self.min_resamples as f64)?;
        ConfigurationError::require_positive("n_bootstrap", self.n_bootstrap as f64)?;
        for (name, level) in [
            ("fdr_level", self.fdr_level),
            ("confidence_level", self.confidence_level),
        ] {
            if !(level > 0.0 && level < 1.0) {
                return Err(ConfigurationError::out_of_range(
                    name,
                    format!("{level} not in (0, 1)"),
                ));
            }
        }
        if let Aggregate::Quantile(q) = self.aggregate {
            if !(0.0..=1.0).contains(&q) {
                return Err(ConfigurationError::out_of_range(
                    "aggregate",
                    format!("quantile {q} not in [0, 1]"),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// FULL CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub domain: StudyDomain,
    #[serde(default)]
    pub climatology: ClimatologyConfig,
    pub detection: DetectionConfig,
    #[serde(default)]
    pub temporal: TemporalConfig,
    #[serde(default)]
    pub statistics: StatisticalConfig,
}

impl AnalysisConfig {
    /// Saharan dust over the Mediterranean basin, summer season
    pub fn mediterranean_summer() -> Self {
        Self {
            domain: StudyDomain {
                name: "Mediterranean Basin".to_string(),
                bbox: [-10.0, 30.0, 40.0, 46.0],
                focus_months: vec![6, 7, 8, 9],
                aod_variable: "aod".to_string(),
                target_variables: vec![
                    "cloud_effective_radius".to_string(),
                    "cloud_optical_thickness".to_string(),
                    "cloud_fraction".to_string(),
                    "liquid_water_path".to_string(),
                ],
            },
            climatology: ClimatologyConfig {
                key: ClimatologyKey::DayOfYear { half_window: 15 },
                baseline: Some(BaselinePeriod {
                    start_year: 2003,
                    end_year: 2022,
                }),
            },
            detection: DetectionConfig::new(1.5, 2, 1),
            temporal: TemporalConfig::default(),
            statistics: StatisticalConfig::default(),
        }
    }

    /// Check every section.
    ///
    /// # Errors
    /// The first invalid or missing parameter found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.domain.validate()?;
        self.climatology.validate()?;
        self.detection.validate()?;
        self.temporal.validate()?;
        self.statistics.validate()
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Parse failures (including missing required detection keys) and
    /// validation failures.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigurationError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    /// See [`AnalysisConfig::from_toml_str`]; unreadable files map to
    /// [`ConfigurationError::Parse`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigurationError::Parse(format!("{}: {e}", path.as_ref().display()))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Serialize back to TOML
    ///
    /// # Errors
    /// Only if a value cannot be represented in TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigurationError> {
        toml::to_string_pretty(self).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_is_valid() {
        AnalysisConfig::mediterranean_summer().validate().unwrap();
    }

    #[test]
    fn test_non_positive_detection_parameters_rejected() {
        for (cfg, name) in [
            (DetectionConfig::new(0.0, 2, 1), "threshold"),
            (DetectionConfig::new(-1.0, 2, 1), "threshold"),
            (DetectionConfig::new(f64::NAN, 2, 1), "threshold"),
            (DetectionConfig::new(2.0, 0, 1), "min_duration"),
            (DetectionConfig::new(2.0, 2, 0), "max_gap"),
        ] {
            match cfg.validate() {
                Err(ConfigurationError::NonPositive { name: n, .. }) => assert_eq!(n, name),
                other => panic!("expected NonPositive for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_missing_threshold_is_configuration_error() {
        let result = AnalysisConfig::from_toml_str(
            r#"
            [domain]
            target_variables = ["cer"]
            [detection]
            min_duration = 2
            max_gap = 1
            "#,
        );
        match result {
            Err(ConfigurationError::Parse(msg)) => assert!(msg.contains("threshold"), "{msg}"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_targets_rejected() {
        let mut config = AnalysisConfig::mediterranean_summer();
        config.domain.target_variables.clear();
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::Missing("target_variables"))
        );
    }

    #[test]
    fn test_levels_must_be_in_unit_interval() {
        let mut config = AnalysisConfig::mediterranean_summer();
        config.statistics.fdr_level = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::OutOfRange { name: "fdr_level", .. })
        ));
    }

    #[test]
    fn test_toml_roundtrip_keeps_strategy_choices() {
        let mut config = AnalysisConfig::mediterranean_summer();
        config.temporal.decay_model = DecayModelKind::PowerLaw;
        config.statistics.aggregate = Aggregate::Quantile(0.75);
        config.climatology.key = ClimatologyKey::Month;
        let text = config.to_toml_string().unwrap();
        let back = AnalysisConfig::from_toml_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_focus_months() {
        let domain = AnalysisConfig::mediterranean_summer().domain;
        assert!(domain.in_focus(7));
        assert!(!domain.in_focus(1));
        assert!(StudyDomain::default().in_focus(1));
    }
}
