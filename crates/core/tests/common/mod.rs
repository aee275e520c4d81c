//! Shared fixtures for the integration tests
#![allow(dead_code)]

use dust_persistence_core::{AnalysisConfig, DetectionConfig, SyntheticData, SyntheticScenario};
use tracing_subscriber::EnvFilter;

/// Route library logs through the test harness; `RUST_LOG=debug` to see them
#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const LAG_WINDOW: usize = 8;

/// Four summers of synthetic data with twelve injected events
pub fn scenario() -> SyntheticScenario {
    SyntheticScenario {
        years: 4,
        seed: 2024,
        ..SyntheticScenario::default()
    }
}

pub fn data() -> SyntheticData {
    scenario().generate().expect("valid scenario")
}

/// Preset study with a strict threshold, detection in every month and a
/// reduced resampling budget
pub fn config(parallel: bool) -> AnalysisConfig {
    let mut config = AnalysisConfig::mediterranean_summer();
    config.domain.focus_months.clear();
    config.detection = DetectionConfig::new(2.5, 2, 1);
    config.temporal.lag_window = LAG_WINDOW;
    config.temporal.parallel = parallel;
    config.statistics.n_resamples = 199;
    config.statistics.n_bootstrap = 200;
    config.statistics.parallel = parallel;
    config
}
