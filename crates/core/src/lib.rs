//! Dust Persistence Core Library
//!
//! Detects mineral-dust events in a domain-mean aerosol optical depth record and
//! measures how long cloud-property anomalies persist after each event ends.
//!
//! ## Stages
//!
//! - [`DustEventDetector`] turns an AOD series into discrete events, bridging
//!   short sub-threshold gaps and flagging events cut by the series boundary
//! - [`TemporalAnalyzer`] samples cloud anomalies at lags after each event and
//!   fits a decay model to estimate a persistence time
//! - [`StatisticalAnalyzer`] compares the observed statistics against
//!   pseudo-events drawn from event-free periods, with Benjamini-Hochberg control
//!   and bootstrap confidence intervals
//!
//! [`Pipeline`] runs the three stages in order and [`OutputTables`] flattens the
//! results into JSON tables.

// Configuration and errors
pub mod config;
pub mod error;

// Shared data model
pub mod core_types;

// Analysis stages
pub mod detection;
pub mod statistics;
pub mod temporal;

// Orchestration and I/O
pub mod export;
pub mod pipeline;
pub mod synthetic;

pub use config::{
    AnalysisConfig, BaselinePeriod, ClimatologyConfig, ClimatologyKey, DetectionConfig,
    StatisticalConfig, StudyDomain, TemporalConfig, ThresholdMode,
};
pub use error::{AnalysisError, ConfigurationError, InsufficientSampleError, SeriesError};

pub use core_types::{
    AnomalyKind, AnomalySeries, Climatology, ConfidenceInterval, DecayFit, DustEvent, FitQuality,
    FitSummary, PersistenceRecord, StatisticalTestResult, StoreFile, TestScope, TimeAxis,
    TimeSeries, TimeSeriesStore,
};

pub use detection::{DetectionOutput, DetectionSummary, DustEventDetector};
pub use statistics::{Aggregate, SignificanceReport, StatisticalAnalyzer, TestOutcome};
pub use temporal::{DecayModel, DecayModelKind, TemporalAnalyzer, TemporalOutput};

pub use export::OutputTables;
pub use pipeline::{AnalysisOutput, Pipeline};
pub use synthetic::{SyntheticData, SyntheticScenario};
