//! End-to-end study: detection, lagged persistence, significance
//!
//! ```no_run
//! use dust_persistence_core::{AnalysisConfig, Pipeline, StoreFile};
//!
//! let store = StoreFile::load("store.json")?.into_store()?;
//! let pipeline = Pipeline::new(AnalysisConfig::mediterranean_summer())?;
//! let output = pipeline.run(&store)?;
//! println!("{} events, {} records", output.events.len(), output.records.len());
//! # Ok::<(), dust_persistence_core::AnalysisError>(())
//! ```

use crate::config::AnalysisConfig;
use crate::core_types::{DustEvent, FitSummary, PersistenceRecord, TimeSeriesStore};
use crate::detection::{DetectionSummary, DustEventDetector};
use crate::error::{AnalysisError, ConfigurationError};
use crate::statistics::{SignificanceReport, StatisticalAnalyzer};
use crate::temporal::TemporalAnalyzer;
use std::time::Instant;
use tracing::info;

/// Everything one run produces
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutput {
    pub events: Vec<DustEvent>,
    pub detection: DetectionSummary,
    pub records: Vec<PersistenceRecord>,
    pub fits: Vec<FitSummary>,
    pub report: SignificanceReport,
}

/// Configured analysis chain
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: AnalysisConfig,
    detector: DustEventDetector,
    temporal: TemporalAnalyzer,
    statistics: StatisticalAnalyzer,
}

impl Pipeline {
    /// Validate the whole configuration up front.
    ///
    /// # Errors
    /// The first invalid or missing parameter.
    pub fn new(config: AnalysisConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            detector: DustEventDetector::new(&config)?,
            temporal: TemporalAnalyzer::new(&config)?,
            statistics: StatisticalAnalyzer::new(&config)?,
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run every stage on `store`.
    ///
    /// # Errors
    /// Missing variables in the store, or no dust events at all.
    pub fn run(&self, store: &TimeSeriesStore) -> Result<AnalysisOutput, AnalysisError> {
        let started = Instant::now();

        let detected = self.detector.detect_in_store(store)?;
        if detected.events.is_empty() {
            return Err(AnalysisError::NoQualifyingEvents {
                variable: self.config.domain.aod_variable.clone(),
            });
        }

        let temporal = self.temporal.analyze(&detected.events, store)?;
        let report =
            self.statistics
                .test_significance(&temporal.records, &detected.events, store)?;

        info!(
            "Analysis of {} finished in {:.2?}: {} events, {} records, {} significant tests",
            self.config.domain.name,
            started.elapsed(),
            detected.events.len(),
            temporal.records.len(),
            report.significant().count()
        );

        Ok(AnalysisOutput {
            events: detected.events,
            detection: detected.summary,
            records: temporal.records,
            fits: temporal.fits,
            report,
        })
    }
}
