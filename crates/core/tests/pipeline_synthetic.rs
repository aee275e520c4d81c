//! End-to-end runs of the analysis pipeline on seeded synthetic data
mod common;

use dust_persistence_core::{
    AnalysisError, DetectionConfig, FitQuality, OutputTables, Pipeline, TestScope, ThresholdMode,
};

#[test]
fn test_injected_events_are_detected() {
    let data = common::data();
    let output = Pipeline::new(common::config(true)).unwrap().run(&data.store).unwrap();

    for injected in &data.injected {
        let covered = output
            .events
            .iter()
            .any(|e| e.start_index <= injected.end_index && injected.start_index <= e.end_index);
        assert!(covered, "injected event {injected:?} not detected");
    }
    assert!(output.events.iter().all(|e| !e.truncated));
    assert!(output.events.windows(2).all(|w| w[0].end_index < w[1].start_index));
}

#[test]
fn test_cloud_response_is_significant() {
    let data = common::data();
    let output = Pipeline::new(common::config(true)).unwrap().run(&data.store).unwrap();
    let report = &output.report;

    assert_eq!(report.effective_resamples, report.requested_resamples);
    for variable in &common::scenario().cloud_variables {
        let scope = TestScope::LagAnomaly {
            variable: variable.clone(),
            lag: 0,
        };
        let result = report.outcome(&scope).unwrap().result.as_ref().unwrap();
        assert!(
            result.significant,
            "{scope}: p = {}, q = {}",
            result.p_value,
            result.adjusted_p_value
        );
    }
    for result in report.results() {
        assert!((0.0..=1.0).contains(&result.p_value));
        assert!(result.adjusted_p_value >= result.p_value);
    }
}

#[test]
fn test_persistence_time_is_recovered() {
    let data = common::data();
    let output = Pipeline::new(common::config(true)).unwrap().run(&data.store).unwrap();

    let variable = &common::scenario().cloud_variables[0];
    let mut taus: Vec<f64> = output
        .fits
        .iter()
        .filter(|f| &f.variable == variable && f.fit_quality == FitQuality::Ok)
        .filter_map(|f| f.fit.map(|fit| fit.tau))
        .collect();
    assert!(taus.len() >= output.events.len() / 2, "only {} fits", taus.len());
    taus.sort_by(f64::total_cmp);
    let median = taus[taus.len() / 2];
    assert!((1.5..6.0).contains(&median), "median tau {median}");
}

#[test]
fn test_parallel_and_sequential_runs_agree() {
    let data = common::data();
    let par = Pipeline::new(common::config(true)).unwrap().run(&data.store).unwrap();
    let seq = Pipeline::new(common::config(false)).unwrap().run(&data.store).unwrap();
    assert_eq!(par, seq);
}

#[test]
fn test_outputs_are_complete_and_well_formed() {
    let data = common::data();
    let config = common::config(true);
    let output = Pipeline::new(config.clone()).unwrap().run(&data.store).unwrap();

    let n_vars = config.domain.target_variables.len();
    assert_eq!(output.fits.len(), output.events.len() * n_vars);
    for fit in &output.fits {
        let records = output
            .records
            .iter()
            .filter(|r| r.event_id == fit.event_id && r.variable == fit.variable)
            .count();
        assert_eq!(records, fit.valid_lags);
        if let (FitQuality::Ok, Some(params)) = (fit.fit_quality, fit.fit) {
            assert!(params.tau > 0.0 && params.tau.is_finite());
        }
    }
    assert!(output.records.iter().all(|r| r.lag <= common::LAG_WINDOW));
    assert_eq!(output.report.outcomes.len(), n_vars * (common::LAG_WINDOW + 2));

    let tables = OutputTables::build(&output, data.store.axis(), &config);
    assert_eq!(
        tables.persistence.len(),
        output.fits.len() * (common::LAG_WINDOW + 1)
    );
    assert_eq!(tables.tests.len(), output.report.outcomes.len());
}

#[test]
fn test_no_events_halts_pipeline() {
    let data = common::data();
    let mut config = common::config(false);
    config.detection = DetectionConfig::new(5.0, 2, 1).with_mode(ThresholdMode::Absolute);
    let err = Pipeline::new(config).unwrap().run(&data.store).unwrap_err();
    assert!(matches!(err, AnalysisError::NoQualifyingEvents { .. }));
}

#[test]
fn test_invalid_configuration_fails_before_running() {
    let mut config = common::config(false);
    config.temporal.min_points_for_fit = 1;
    assert!(Pipeline::new(config).is_err());
}
