//! Error taxonomy for the persistence analysis
//!
//! Configuration problems are fatal and surface before any computation starts.
//! Sample-size problems are reported per statistical test and never abort the
//! remaining tests. Per-record fit outcomes are not errors at all: they live in
//! [`crate::core_types::FitQuality`] as data.

use thiserror::Error;

/// Invalid or missing analysis parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// A required parameter was absent from the configuration source
    #[error("missing parameter '{0}'")]
    Missing(&'static str),

    /// A parameter must be strictly positive (and finite)
    #[error("parameter '{name}' must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    /// A parameter is outside its admissible range
    #[error("parameter '{name}' out of range: {message}")]
    OutOfRange { name: &'static str, message: String },

    /// The configuration file could not be read or parsed
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

impl ConfigurationError {
    /// Reject non-finite or non-positive values.
    pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<(), Self> {
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(Self::NonPositive { name, value })
        }
    }

    pub(crate) fn out_of_range(name: &'static str, message: impl Into<String>) -> Self {
        Self::OutOfRange {
            name,
            message: message.into(),
        }
    }
}

/// Malformed time series handed over by the data-acquisition boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    /// Timestamps must be strictly increasing with no duplicates
    #[error("timestamps not strictly increasing at index {index}")]
    NonIncreasingTimestamps { index: usize },

    /// Value and validity buffers disagree with the declared shape
    #[error("series '{variable}' has {actual} samples, expected {expected}")]
    LengthMismatch {
        variable: String,
        expected: usize,
        actual: usize,
    },

    /// A series declared zero spatial cells
    #[error("series '{0}' has no spatial cells")]
    NoCells(String),

    /// A variable was requested that the store does not hold
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    /// A variable was inserted twice
    #[error("variable '{0}' already present in store")]
    DuplicateVariable(String),
}

/// Too few events or resamples to support a statistical claim.
///
/// Reported per test inside the significance report; other tests proceed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InsufficientSampleError {
    /// Fewer qualifying events than the configured minimum
    #[error("{scope}: {available} qualifying events, at least {required} required")]
    TooFewEvents {
        scope: String,
        available: usize,
        required: usize,
    },

    /// No usable null resamples could be drawn
    #[error("{scope}: {effective} effective null resamples, at least {required} required")]
    TooFewResamples {
        scope: String,
        effective: usize,
        required: usize,
    },
}

/// Pipeline-level failures.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Series(#[from] SeriesError),

    /// Detection produced no events at all, so downstream stages cannot run
    #[error("no qualifying dust events detected in '{variable}'")]
    NoQualifyingEvents { variable: String },

    #[error("failed to read or write '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
