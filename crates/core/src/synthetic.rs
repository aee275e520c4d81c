//! Seeded synthetic study data
//!
//! Builds a multi-year daily store with a seasonal AOD background, dust events
//! injected inside the focus months, and cloud variables that respond to each
//! event with an exponentially decaying anomaly. Random cells are dropped as
//! missing, and cloud cells are additionally masked.
//!
//! Identical scenarios (including the seed) generate identical stores.

use crate::core_types::{TimeAxis, TimeSeries, TimeSeriesStore};
use crate::error::{AnalysisError, ConfigurationError};
use chrono::{Datelike, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::debug;

/// Parameters of a synthetic study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticScenario {
    pub start_year: i32,
    pub years: usize,
    /// Spatial cells per timestep
    pub cells: usize,
    pub seed: u64,
    pub aod_variable: String,
    pub cloud_variables: Vec<String>,
    /// Months (1-12) in which events are injected
    pub focus_months: Vec<u32>,
    pub events_per_year: usize,
    /// Days each injected event lasts
    pub event_duration: usize,
    pub aod_background: f64,
    pub aod_seasonal: f64,
    pub aod_noise: f64,
    /// AOD added on event days
    pub event_aod: f64,
    /// Cloud anomaly at lag 0, in units of `cloud_noise`
    pub response_amplitude: f64,
    /// e-folding time of the cloud response in days
    pub response_tau: f64,
    pub cloud_noise: f64,
    /// Probability that any sample is missing
    pub missing_fraction: f64,
    /// Additional probability that a cloud sample is masked
    pub mask_fraction: f64,
}

impl Default for SyntheticScenario {
    fn default() -> Self {
        Self {
            start_year: 2015,
            years: 4,
            cells: 4,
            seed: 7,
            aod_variable: "aod".to_string(),
            cloud_variables: vec![
                "cloud_effective_radius".to_string(),
                "cloud_optical_thickness".to_string(),
                "cloud_fraction".to_string(),
                "liquid_water_path".to_string(),
            ],
            focus_months: vec![6, 7, 8, 9],
            events_per_year: 3,
            event_duration: 3,
            aod_background: 0.2,
            aod_seasonal: 0.05,
            aod_noise: 0.03,
            event_aod: 0.6,
            response_amplitude: 3.0,
            response_tau: 3.0,
            cloud_noise: 1.0,
            missing_fraction: 0.02,
            mask_fraction: 0.1,
        }
    }
}

/// Position of one injected event on the time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedEvent {
    pub start_index: usize,
    pub end_index: usize,
}

/// Generated store plus where the events were placed
#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub store: TimeSeriesStore,
    pub injected: Vec<InjectedEvent>,
}

impl SyntheticScenario {
    fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::require_positive("years", self.years as f64)?;
        ConfigurationError::require_positive("cells", self.cells as f64)?;
        ConfigurationError::require_positive("event_duration", self.event_duration as f64)?;
        ConfigurationError::require_positive("response_tau", self.response_tau)?;
        for (name, p) in [
            ("missing_fraction", self.missing_fraction),
            ("mask_fraction", self.mask_fraction),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(ConfigurationError::out_of_range(name, format!("{p} not in [0, 1)")));
            }
        }
        if self.cloud_variables.is_empty() {
            return Err(ConfigurationError::Missing("cloud_variables"));
        }
        Ok(())
    }

    /// Days after each event end that carry a cloud response
    fn response_span(&self) -> usize {
        (self.response_tau * 5.0).ceil() as usize
    }

    /// Generate the store.
    ///
    /// # Errors
    /// Invalid scenario parameters or an unrepresentable start year.
    pub fn generate(&self) -> Result<SyntheticData, AnalysisError> {
        self.validate()?;

        let first = NaiveDate::from_ymd_opt(self.start_year, 1, 1);
        let last = i32::try_from(self.years)
            .ok()
            .and_then(|years| NaiveDate::from_ymd_opt(self.start_year.checked_add(years)?, 1, 1));
        let midnight = first.and_then(|d| d.and_hms_opt(0, 0, 0));
        let (Some(first), Some(last), Some(midnight)) = (first, last, midnight) else {
            return Err(ConfigurationError::out_of_range(
                "start_year",
                format!("{} + {} years is not a valid date range", self.start_year, self.years),
            )
            .into());
        };
        let days = usize::try_from((last - first).num_days()).unwrap_or(0);
        let axis = TimeAxis::daily(midnight.and_utc(), days);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let injected = self.place_events(&axis, &mut rng);

        // Event-day indicator and per-step cloud response
        let mut on_event = vec![false; days];
        let mut response = vec![0.0_f64; days];
        for event in &injected {
            on_event[event.start_index..=event.end_index].fill(true);
            for lag in 0..=self.response_span() {
                if let Some(slot) = response.get_mut(event.end_index + lag) {
                    *slot += (-(lag as f64) / self.response_tau).exp();
                }
            }
        }

        let mut store = TimeSeriesStore::new(axis.clone());

        let mut aod = Vec::with_capacity(days * self.cells);
        for (t, ts) in axis.timestamps().iter().enumerate() {
            let season = (f64::from(ts.ordinal0()) / 365.25 * TAU).sin();
            let base = self.aod_background + self.aod_seasonal * season;
            let boost = if on_event[t] { self.event_aod } else { 0.0 };
            for _ in 0..self.cells {
                let value = (base + boost + self.aod_noise * centered(&mut rng)).max(0.0);
                aod.push((!rng.random_bool(self.missing_fraction)).then_some(value));
            }
        }
        store.insert(TimeSeries::from_options(self.aod_variable.clone(), self.cells, &aod)?)?;

        for (k, variable) in self.cloud_variables.iter().enumerate() {
            // Alternate the sign so both brightening and thinning responses occur
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            let base = 10.0 + 5.0 * k as f64;
            let drop_p = (self.missing_fraction + self.mask_fraction).min(0.99);
            let mut values = Vec::with_capacity(days * self.cells);
            for (t, ts) in axis.timestamps().iter().enumerate() {
                let season = (f64::from(ts.ordinal0()) / 365.25 * TAU).cos();
                let signal = sign * self.response_amplitude * self.cloud_noise * response[t];
                for _ in 0..self.cells {
                    let value = base + season + signal + self.cloud_noise * centered(&mut rng);
                    values.push((!rng.random_bool(drop_p)).then_some(value));
                }
            }
            store.insert(TimeSeries::from_options(variable.clone(), self.cells, &values)?)?;
        }

        debug!(
            "Synthetic store: {} days x {} cells, {} injected events",
            days,
            self.cells,
            injected.len()
        );
        Ok(SyntheticData { store, injected })
    }

    /// One event per equal slot of each year's focus season, at a random offset
    /// that leaves room for the cloud response before the next slot.
    fn place_events(&self, axis: &TimeAxis, rng: &mut StdRng) -> Vec<InjectedEvent> {
        let mut injected = Vec::new();
        if self.events_per_year == 0 {
            return injected;
        }
        let footprint = self.event_duration + self.response_span();

        for year_offset in 0..self.years {
            let year = self.start_year + year_offset as i32;
            let season: Vec<usize> = axis
                .timestamps()
                .iter()
                .enumerate()
                .filter(|(_, ts)| {
                    ts.year() == year
                        && (self.focus_months.is_empty() || self.focus_months.contains(&ts.month()))
                })
                .map(|(t, _)| t)
                .collect();
            let slot = season.len() / self.events_per_year;
            if slot <= footprint {
                continue;
            }
            for chunk in season.chunks_exact(slot) {
                let offset = rng.random_range(0..slot - footprint);
                let start_index = chunk[offset];
                injected.push(InjectedEvent {
                    start_index,
                    end_index: start_index + self.event_duration - 1,
                });
            }
        }
        injected
    }
}

/// Uniform noise in `[-1, 1)`
fn centered(rng: &mut StdRng) -> f64 {
    rng.random::<f64>() * 2.0 - 1.0
}
