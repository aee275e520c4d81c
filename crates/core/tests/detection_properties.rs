//! Threshold monotonicity, determinism and store I/O for event detection
mod common;

use dust_persistence_core::{
    DetectionConfig, DustEvent, DustEventDetector, StoreFile, ThresholdMode, TimeSeriesStore,
};

fn detect(threshold: f64, store: &TimeSeriesStore) -> Vec<DustEvent> {
    let mut config = common::config(false);
    config.detection = DetectionConfig::new(threshold, 2, 1).with_mode(ThresholdMode::Absolute);
    DustEventDetector::new(&config)
        .unwrap()
        .detect_in_store(store)
        .unwrap()
        .events
}

#[test]
fn test_raising_threshold_never_adds_exceedance() {
    let data = common::data();
    let mut previous: Option<(usize, usize)> = None;
    for threshold in [0.22, 0.26, 0.3, 0.45, 0.6, 0.75, 0.9] {
        let events = detect(threshold, &data.store);
        let exceeding: usize = events.iter().map(|e| e.exceedance_steps).sum();
        let span: usize = events.iter().map(DustEvent::span_steps).sum();
        if let Some((prev_exceeding, prev_span)) = previous {
            assert!(exceeding <= prev_exceeding, "threshold {threshold}");
            assert!(span <= prev_span, "threshold {threshold}");
        }
        previous = Some((exceeding, span));
    }
}

#[test]
fn test_events_satisfy_duration_and_ordering() {
    let data = common::data();
    let events = detect(0.5, &data.store);
    assert!(!events.is_empty());
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.event_id as usize, i);
        assert!(event.exceedance_steps >= 2);
        assert!(event.start_time <= event.peak_time && event.peak_time <= event.end_time);
        assert!(event.peak_magnitude >= 0.5);
        assert!((0.0..=1.0).contains(&event.spatial_extent));
    }
}

#[test]
fn test_detection_is_deterministic() {
    let a = detect(0.5, &common::data().store);
    let b = detect(0.5, &common::data().store);
    assert_eq!(a, b);
}

#[test]
fn test_store_file_roundtrip_preserves_detection() {
    let data = common::data();
    let path = std::env::temp_dir().join(format!("dust-store-{}.json", std::process::id()));
    StoreFile::from_store(&data.store).save(&path).unwrap();
    let reloaded = StoreFile::load(&path).unwrap().into_store().unwrap();
    std::fs::remove_file(&path).unwrap();

    let spans = |events: Vec<DustEvent>| -> Vec<(usize, usize)> {
        events.iter().map(|e| (e.start_index, e.end_index)).collect()
    };
    assert_eq!(spans(detect(0.5, &data.store)), spans(detect(0.5, &reloaded)));
}
