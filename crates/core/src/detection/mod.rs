//! Dust event detection
//!
//! Classifies every timestep of the domain-mean AOD series against the
//! configured threshold, bridges short sub-threshold gaps, and keeps runs with at
//! least `min_duration` observed exceeding steps.
//!
//! # Example
//!
//! ```rust,ignore
//! use dust_persistence_core::detection::DustEventDetector;
//!
//! let detector = DustEventDetector::new(&config)?;
//! let output = detector.detect_in_store(&store)?;
//! for event in &output.events {
//!     println!("event {} ended {}", event.event_id, event.end_time);
//! }
//! ```

pub mod segmentation;

pub use segmentation::{segment, Candidate, StepState};

use crate::config::{AnalysisConfig, ClimatologyConfig, DetectionConfig, StudyDomain, ThresholdMode};
use crate::core_types::{Climatology, DustEvent, TimeAxis, TimeSeries, TimeSeriesStore};
use crate::error::{ConfigurationError, SeriesError};
use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, info};

/// Counts describing one detection pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DetectionSummary {
    pub exceeding_steps: usize,
    pub missing_steps: usize,
    /// Steps outside the focus months
    pub out_of_season_steps: usize,
    pub candidates: usize,
    pub discarded_short: usize,
    pub truncated_events: usize,
}

/// Events in ascending start order plus the pass summary
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutput {
    pub events: Vec<DustEvent>,
    pub summary: DetectionSummary,
}

/// Converts an AOD series into an ordered set of [`DustEvent`]s
#[derive(Debug, Clone)]
pub struct DustEventDetector {
    detection: DetectionConfig,
    climatology: ClimatologyConfig,
    domain: StudyDomain,
}

impl DustEventDetector {
    /// # Errors
    /// Returns [`ConfigurationError`] for non-positive detection parameters.
    pub fn new(config: &AnalysisConfig) -> Result<Self, ConfigurationError> {
        Self::from_parts(config.detection, config.climatology, config.domain.clone())
    }

    /// # Errors
    /// Returns [`ConfigurationError`] for non-positive detection parameters.
    pub fn from_parts(
        detection: DetectionConfig,
        climatology: ClimatologyConfig,
        domain: StudyDomain,
    ) -> Result<Self, ConfigurationError> {
        detection.validate()?;
        Ok(Self {
            detection,
            climatology,
            domain,
        })
    }

    /// Detect events in the store's configured AOD variable.
    ///
    /// # Errors
    /// Only when the AOD variable is absent; gaps in the data are never errors.
    pub fn detect_in_store(&self, store: &TimeSeriesStore) -> Result<DetectionOutput, SeriesError> {
        let aod = store.get(&self.domain.aod_variable)?;
        Ok(self.detect(aod, store.axis()))
    }

    /// Detect events in `aod` sampled on `axis`.
    ///
    /// Deterministic: identical input and configuration give identical ids and
    /// ordering.
    pub fn detect(&self, aod: &TimeSeries, axis: &TimeAxis) -> DetectionOutput {
        let climatology = match self.detection.threshold_mode {
            ThresholdMode::Absolute => None,
            ThresholdMode::Anomaly | ThresholdMode::ZScore => {
                Some(Climatology::compute(aod, axis, &self.climatology))
            }
        };
        let exceedance = |ts: &DateTime<Utc>, value: f64| -> Option<f64> {
            match (self.detection.threshold_mode, &climatology) {
                (ThresholdMode::Absolute, _) => Some(value),
                (ThresholdMode::Anomaly, Some(c)) => c.anomaly(ts, value),
                (ThresholdMode::ZScore, Some(c)) => c.standardized(ts, value),
                _ => None,
            }
        };

        let threshold = self.detection.threshold;
        let mut magnitudes = Vec::with_capacity(axis.len());
        let states: Vec<StepState> = axis
            .timestamps()
            .iter()
            .enumerate()
            .map(|(t, ts)| {
                if !self.domain.in_focus(ts.month()) {
                    magnitudes.push(None);
                    return StepState::OutOfSeason;
                }
                let magnitude = aod
                    .domain_mean(t)
                    .and_then(|sample| exceedance(ts, sample.value));
                magnitudes.push(magnitude);
                match magnitude {
                    Some(m) if m >= threshold => StepState::Exceeding,
                    Some(_) => StepState::Below,
                    None => StepState::Missing,
                }
            })
            .collect();

        let candidates = segment(&states, self.detection.max_gap);
        let mut summary = DetectionSummary {
            exceeding_steps: states.iter().filter(|s| **s == StepState::Exceeding).count(),
            missing_steps: states.iter().filter(|s| **s == StepState::Missing).count(),
            out_of_season_steps: states
                .iter()
                .filter(|s| **s == StepState::OutOfSeason)
                .count(),
            candidates: candidates.len(),
            ..DetectionSummary::default()
        };

        let mut events = Vec::new();
        for candidate in candidates {
            if candidate.exceeding < self.detection.min_duration {
                summary.discarded_short += 1;
                continue;
            }

            let mut peak: Option<(f64, usize)> = None;
            let mut extent: f64 = 0.0;
            for t in candidate.start..=candidate.end {
                if states[t] != StepState::Exceeding {
                    continue;
                }
                let Some(m) = magnitudes[t] else { continue };
                if peak.is_none_or(|(best, _)| m > best) {
                    peak = Some((m, t));
                }
                let ts = &axis.timestamps()[t];
                let (hits, valid) = aod.row(t).fold((0_usize, 0_usize), |(hits, valid), v| {
                    let hit = exceedance(ts, v).is_some_and(|e| e >= threshold);
                    (hits + usize::from(hit), valid + 1)
                });
                if valid > 0 {
                    extent = extent.max(hits as f64 / valid as f64);
                }
            }
            let Some((peak_magnitude, peak_index)) = peak else { continue };

            let (Some(start_time), Some(end_time), Some(peak_time)) = (
                axis.get(candidate.start),
                axis.get(candidate.end),
                axis.get(peak_index),
            ) else {
                continue;
            };

            if candidate.truncated() {
                summary.truncated_events += 1;
            }
            events.push(DustEvent {
                event_id: u32::try_from(events.len()).unwrap_or(u32::MAX),
                start_time,
                end_time,
                start_index: candidate.start,
                end_index: candidate.end,
                peak_magnitude,
                peak_time,
                spatial_extent: extent,
                exceedance_steps: candidate.exceeding,
                truncated: candidate.truncated(),
            });
        }

        debug!(
            "Detection pass on '{}': {} exceeding steps, {} missing, {} off-season, {} candidates, {} too short",
            aod.variable(),
            summary.exceeding_steps,
            summary.missing_steps,
            summary.out_of_season_steps,
            summary.candidates,
            summary.discarded_short
        );
        info!(
            "Detected {} dust events ({} truncated)",
            events.len(),
            summary.truncated_events
        );

        DetectionOutput { events, summary }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn axis(len: usize) -> TimeAxis {
        TimeAxis::daily(Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap(), len)
    }

    fn detector(threshold: f64, min_duration: usize, max_gap: usize) -> DustEventDetector {
        DustEventDetector::from_parts(
            DetectionConfig::new(threshold, min_duration, max_gap)
                .with_mode(ThresholdMode::Absolute),
            ClimatologyConfig::default(),
            StudyDomain::default(),
        )
        .unwrap()
    }

    fn aggregate(values: &[f64]) -> TimeSeries {
        let samples: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
        TimeSeries::domain_aggregate("aod", &samples).unwrap()
    }

    #[test]
    fn test_reference_scenario() {
        let z = [0.0, 0.0, 3.0, 4.0, 5.0, 1.0, 0.0, 0.0, 6.0, 0.0];
        let out = detector(2.5, 2, 1).detect(&aggregate(&z), &axis(z.len()));
        assert_eq!(out.events.len(), 1);
        let event = &out.events[0];
        assert_eq!((event.start_index, event.end_index), (2, 4));
        assert_eq!(event.peak_magnitude, 5.0);
        assert_eq!(event.exceedance_steps, 3);
        assert!(!event.truncated);
        assert_eq!(out.summary.discarded_short, 1);
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let result = DustEventDetector::from_parts(
            DetectionConfig::new(2.0, 2, 0),
            ClimatologyConfig::default(),
            StudyDomain::default(),
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::NonPositive { name: "max_gap", .. })
        ));
    }

    #[test]
    fn test_series_starting_mid_event_is_truncated() {
        let out = detector(1.0, 2, 1).detect(&aggregate(&[3.0, 3.0, 0.0, 0.0, 0.0]), &axis(5));
        assert_eq!(out.events.len(), 1);
        assert!(out.events[0].truncated);
    }

    #[test]
    fn test_gaps_never_raise() {
        let samples = [None, Some(3.0), None, Some(3.0), None, Some(0.0), Some(0.0)];
        let aod = TimeSeries::domain_aggregate("aod", &samples).unwrap();
        let out = detector(1.0, 2, 1).detect(&aod, &axis(samples.len()));
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].exceedance_steps, 2);
        assert_eq!(out.summary.missing_steps, 3);
    }

    #[test]
    fn test_spatial_extent_counts_exceeding_cells() {
        // Two cells: at t=1 both exceed, at t=2 one of two
        let samples = [
            Some(0.0), Some(0.0),
            Some(4.0), Some(3.0),
            Some(4.0), Some(0.5),
            Some(0.0), Some(0.0),
            Some(0.0), Some(0.0),
        ];
        let aod = TimeSeries::from_options("aod", 2, &samples).unwrap();
        let out = detector(1.0, 2, 1).detect(&aod, &axis(5));
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].spatial_extent, 1.0);
    }

    #[test]
    fn test_focus_months_mask_detection() {
        let mut domain = StudyDomain::default();
        domain.focus_months = vec![1];
        let det = DustEventDetector::from_parts(
            DetectionConfig::new(1.0, 1, 1).with_mode(ThresholdMode::Absolute),
            ClimatologyConfig::default(),
            domain,
        )
        .unwrap();
        let out = det.detect(&aggregate(&[0.0, 5.0, 5.0, 0.0, 0.0]), &axis(5));
        assert!(out.events.is_empty());
        assert_eq!(out.summary.missing_steps, 0);
        assert_eq!(out.summary.out_of_season_steps, 5);
    }

    #[test]
    fn test_events_do_not_merge_across_off_season() {
        let mut domain = StudyDomain::default();
        domain.focus_months = vec![6, 7, 8, 9];
        let det = DustEventDetector::from_parts(
            DetectionConfig::new(1.0, 2, 1).with_mode(ThresholdMode::Absolute),
            ClimatologyConfig::default(),
            domain,
        )
        .unwrap();

        let axis = TimeAxis::daily(Utc.with_ymd_and_hms(2020, 9, 27, 0, 0, 0).unwrap(), 252);
        let values: Vec<f64> = axis
            .timestamps()
            .iter()
            .map(|ts| match (ts.year(), ts.month(), ts.day()) {
                (2020, 9, 28..=30) | (2021, 6, 1..=3) => 3.0,
                _ => 0.0,
            })
            .collect();
        let out = det.detect(&aggregate(&values), &axis);

        assert_eq!(out.events.len(), 2);
        assert!(out.events.iter().all(|e| e.exceedance_steps == 3));
        assert_eq!(out.events[0].end_time.month(), 9);
        assert_eq!(out.events[1].start_time.month(), 6);
        assert_eq!(out.events[1].start_time.year(), 2021);
        assert!(out.summary.out_of_season_steps > 200);
    }
}
