//! Core types: series storage, climatology and stage records

pub mod climatology;
pub mod records;
pub mod series;

pub use climatology::{AnomalyKind, AnomalySeries, BinStats, Climatology};
pub use records::*;
pub use series::{DomainSample, SeriesFile, StoreFile, TimeAxis, TimeSeries, TimeSeriesStore};
