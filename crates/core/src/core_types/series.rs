//! Gap-aware gridded time series and the store that holds them
//!
//! Every variable in a [`TimeSeriesStore`] shares one [`TimeAxis`], so a lag of
//! `k` steps is always an index offset of `k`, regardless of variable. Missing or
//! cloud-masked samples are kept in place with their validity flag cleared; they
//! are never dropped from the buffers.

use crate::error::{AnalysisError, SeriesError};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// TIME AXIS
// ============================================================================

/// Strictly increasing sequence of timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeAxis {
    timestamps: Vec<DateTime<Utc>>,
}

impl TimeAxis {
    /// Build an axis, rejecting duplicate or out-of-order timestamps.
    ///
    /// # Errors
    /// Returns [`SeriesError::NonIncreasingTimestamps`] at the first offending index.
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Result<Self, SeriesError> {
        if let Some(index) = timestamps
            .windows(2)
            .position(|pair| pair[1] <= pair[0])
        {
            return Err(SeriesError::NonIncreasingTimestamps { index: index + 1 });
        }
        Ok(Self { timestamps })
    }

    /// Regular axis of `len` steps starting at `start`
    pub fn regular(start: DateTime<Utc>, step: chrono::Duration, len: usize) -> Self {
        let timestamps = (0..len)
            .map(|i| start + step * i32::try_from(i).unwrap_or(i32::MAX))
            .collect();
        Self { timestamps }
    }

    /// Daily axis of `days` steps starting at `start`
    pub fn daily(start: DateTime<Utc>, days: usize) -> Self {
        Self::regular(start, chrono::Duration::days(1), days)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<DateTime<Utc>> {
        self.timestamps.get(index).copied()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }
}

// ============================================================================
// SERIES
// ============================================================================

/// Domain-averaged value at one timestep and how many valid cells produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainSample {
    pub value: f64,
    pub valid_cells: usize,
}

/// One variable over time, for one or more spatial cells.
///
/// Buffers are row-major: sample `(t, cell)` lives at `t * cells + cell`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    variable: String,
    cells: usize,
    values: Vec<f64>,
    valid: Vec<bool>,
}

impl TimeSeries {
    /// Build a series from raw buffers.
    ///
    /// Non-finite values are marked invalid regardless of their flag. Invalid
    /// samples are stored as `0.0`, so two series with the same valid data
    /// compare equal whatever filler they were built with.
    ///
    /// # Errors
    /// Returns an error when `cells == 0` or the buffer lengths disagree.
    pub fn new(
        variable: impl Into<String>,
        cells: usize,
        mut values: Vec<f64>,
        mut valid: Vec<bool>,
    ) -> Result<Self, SeriesError> {
        let variable = variable.into();
        if cells == 0 {
            return Err(SeriesError::NoCells(variable));
        }
        if values.len() != valid.len() || values.len() % cells != 0 {
            return Err(SeriesError::LengthMismatch {
                variable,
                expected: valid.len().max(cells),
                actual: values.len(),
            });
        }
        for (flag, value) in valid.iter_mut().zip(&mut values) {
            *flag &= value.is_finite();
            if !*flag {
                *value = 0.0;
            }
        }
        Ok(Self {
            variable,
            cells,
            values,
            valid,
        })
    }

    /// Build a series from `Option` samples where `None` marks a gap.
    ///
    /// # Errors
    /// See [`TimeSeries::new`].
    pub fn from_options(
        variable: impl Into<String>,
        cells: usize,
        samples: &[Option<f64>],
    ) -> Result<Self, SeriesError> {
        let values = samples.iter().map(|s| s.unwrap_or(f64::NAN)).collect();
        let valid = samples.iter().map(Option::is_some).collect();
        Self::new(variable, cells, values, valid)
    }

    /// Single-cell (domain-aggregate) series
    ///
    /// # Errors
    /// See [`TimeSeries::new`].
    pub fn domain_aggregate(
        variable: impl Into<String>,
        samples: &[Option<f64>],
    ) -> Result<Self, SeriesError> {
        Self::from_options(variable, 1, samples)
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn cells(&self) -> usize {
        self.cells
    }

    /// Number of timesteps
    pub fn len(&self) -> usize {
        self.values.len() / self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sample at `(t, cell)`, `None` when invalid or out of range
    #[inline]
    pub fn value(&self, t: usize, cell: usize) -> Option<f64> {
        if cell >= self.cells {
            return None;
        }
        let idx = t * self.cells + cell;
        match self.valid.get(idx) {
            Some(true) => Some(self.values[idx]),
            _ => None,
        }
    }

    /// Valid samples at timestep `t`
    pub fn row(&self, t: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.cells).filter_map(move |cell| self.value(t, cell))
    }

    /// Mean over valid cells at timestep `t`
    pub fn domain_mean(&self, t: usize) -> Option<DomainSample> {
        let (sum, count) = self
            .row(t)
            .fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
        (count > 0).then(|| DomainSample {
            value: sum / count as f64,
            valid_cells: count,
        })
    }

    /// Count of valid samples across all timesteps and cells
    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Typed container of every variable the analysis reads.
///
/// The axis is shared behind an `Arc` so views handed to later stages are cheap
/// and immutable.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    axis: Arc<TimeAxis>,
    series: FxHashMap<String, TimeSeries>,
}

impl TimeSeriesStore {
    pub fn new(axis: TimeAxis) -> Self {
        Self {
            axis: Arc::new(axis),
            series: FxHashMap::default(),
        }
    }

    /// Add a variable, checking it lines up with the store's axis.
    ///
    /// # Errors
    /// Fails on a length mismatch or a duplicate variable name.
    pub fn insert(&mut self, series: TimeSeries) -> Result<(), SeriesError> {
        if series.len() != self.axis.len() {
            return Err(SeriesError::LengthMismatch {
                variable: series.variable.clone(),
                expected: self.axis.len(),
                actual: series.len(),
            });
        }
        if self.series.contains_key(series.variable()) {
            return Err(SeriesError::DuplicateVariable(series.variable));
        }
        self.series.insert(series.variable.clone(), series);
        Ok(())
    }

    /// Builder-style [`TimeSeriesStore::insert`]
    ///
    /// # Errors
    /// See [`TimeSeriesStore::insert`].
    pub fn with_series(mut self, series: TimeSeries) -> Result<Self, SeriesError> {
        self.insert(series)?;
        Ok(self)
    }

    pub fn axis(&self) -> &TimeAxis {
        &self.axis
    }

    /// Look up a variable by name.
    ///
    /// # Errors
    /// Returns [`SeriesError::UnknownVariable`] when absent.
    pub fn get(&self, variable: &str) -> Result<&TimeSeries, SeriesError> {
        self.series
            .get(variable)
            .ok_or_else(|| SeriesError::UnknownVariable(variable.to_string()))
    }

    /// Variable names in sorted order
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.series.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.axis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axis.is_empty()
    }
}

// ============================================================================
// BOUNDARY FORMAT
// ============================================================================

/// JSON layout delivered by the data-acquisition collaborator.
///
/// ```json
/// { "timestamps": ["2020-06-01T00:00:00Z", ...],
///   "series": [ { "variable": "aod", "rows": [[0.21, null], [0.35, 0.40]] } ] }
/// ```
///
/// Each row holds one timestep; `null` marks an invalid (missing or masked) cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    pub timestamps: Vec<DateTime<Utc>>,
    pub series: Vec<SeriesFile>,
}

/// One variable within a [`StoreFile`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesFile {
    pub variable: String,
    pub rows: Vec<Vec<Option<f64>>>,
}

impl StoreFile {
    /// Validate and convert into a [`TimeSeriesStore`].
    ///
    /// # Errors
    /// Fails on non-increasing timestamps, ragged rows or duplicate variables.
    pub fn into_store(self) -> Result<TimeSeriesStore, SeriesError> {
        let mut store = TimeSeriesStore::new(TimeAxis::new(self.timestamps)?);
        for file in self.series {
            let cells = file.rows.first().map_or(0, Vec::len);
            if let Some(bad) = file.rows.iter().find(|row| row.len() != cells) {
                return Err(SeriesError::LengthMismatch {
                    variable: file.variable,
                    expected: cells,
                    actual: bad.len(),
                });
            }
            let samples: Vec<Option<f64>> = file.rows.into_iter().flatten().collect();
            store.insert(TimeSeries::from_options(file.variable, cells, &samples)?)?;
        }
        Ok(store)
    }

    /// Read a store file from disk
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| AnalysisError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the store file to disk
    ///
    /// # Errors
    /// Returns error if the file cannot be serialized or written
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), AnalysisError> {
        let path = path.as_ref();
        let contents = serde_json::to_string(self)?;
        fs::write(path, contents).map_err(|source| AnalysisError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Snapshot a store back into the boundary layout
    pub fn from_store(store: &TimeSeriesStore) -> Self {
        let series = store
            .variables()
            .into_iter()
            .filter_map(|name| store.get(name).ok())
            .map(|s| SeriesFile {
                variable: s.variable().to_string(),
                rows: (0..s.len())
                    .map(|t| (0..s.cells()).map(|c| s.value(t, c)).collect())
                    .collect(),
            })
            .collect();
        Self {
            timestamps: store.axis().timestamps().to_vec(),
            series,
        }
    }
}
