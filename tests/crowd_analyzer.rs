//! Integration tests for the crowd analytics engine
//!
//! These tests exercise `CrowdAnalyzer` end to end: density, zones, clusters,
//! motion and risk composed into one `CrowdMetrics` per frame.

use chrono::Utc;
use common::crowd::{AnomalyType, DensityLevel, Detection, Point, RiskLevel};
use crowd_analytics::{AnalyticsConfig, CrowdAnalyzer, FrameDimensions};

fn analyzer(width: u32, height: u32) -> CrowdAnalyzer {
    CrowdAnalyzer::new(FrameDimensions::new(width, height), AnalyticsConfig::default())
        .unwrap()
}

fn detections(points: &[(f64, f64)]) -> Vec<Detection> {
    points.iter().map(|&(x, y)| Detection::at(x, y)).collect()
}

/// Eight people in every 50px cell of a 200x200 frame
fn packed_square() -> Vec<Detection> {
    let mut points = Vec::new();
    for row in 0..4 {
        for col in 0..4 {
            for k in 0..8 {
                points.push((col as f64 * 50.0 + 5.0 + k as f64 * 5.0, row as f64 * 50.0 + 25.0));
            }
        }
    }
    detections(&points)
}

#[test]
fn test_reference_scenario() {
    let mut analyzer = analyzer(1280, 720);
    let dets = detections(&[
        (100.0, 100.0),
        (120.0, 105.0),
        (105.0, 120.0),
        (600.0, 400.0),
        (605.0, 405.0),
    ]);

    let metrics = analyzer.analyze(&dets, Utc::now());

    assert_eq!(metrics.frame_area, 921_600);
    assert_eq!(metrics.total_count, 5);
    assert_eq!(metrics.density_score, 2.71);
    assert!(metrics.zones.is_empty());
    assert!(metrics.clusters.is_empty());
    assert_eq!(metrics.avg_velocity, 0.0);
    assert_eq!(metrics.risk_score, 1.58);
    assert_eq!(metrics.risk_level, RiskLevel::Low);
    assert_eq!(metrics.anomaly_type, AnomalyType::Normal);
}

#[test]
fn test_empty_frame_is_fully_defined() {
    let mut analyzer = analyzer(1280, 720);
    for _ in 0..3 {
        let metrics = analyzer.analyze(&[], Utc::now());
        assert_eq!(metrics.total_count, 0);
        assert_eq!(metrics.density_score, 0.0);
        assert!(metrics.zones.is_empty());
        assert!(metrics.clusters.is_empty());
        assert_eq!(metrics.avg_velocity, 0.0);
        assert_eq!(metrics.risk_score, 0.0);
        assert_eq!(metrics.risk_level, RiskLevel::Low);
        assert_eq!(metrics.anomaly_type, AnomalyType::Normal);
    }
}

#[test]
fn test_zero_area_frame() {
    let mut analyzer = analyzer(0, 0);
    let metrics = analyzer.analyze(&detections(&[(0.0, 0.0), (3.0, 4.0)]), Utc::now());
    assert_eq!(metrics.frame_area, 0);
    assert!(metrics.zones.is_empty());
    assert!(metrics.density_score <= 100.0);
}

#[test]
fn test_scores_stay_in_range() {
    let mut small = analyzer(10, 10);
    let crowd: Vec<Detection> = (0..500)
        .map(|i| Detection::at((i % 10) as f64, (i / 50) as f64))
        .collect();
    let metrics = small.analyze(&crowd, Utc::now());
    assert_eq!(metrics.density_score, 100.0);
    assert!((0.0..=100.0).contains(&metrics.risk_score));

    // huge jumps between frames, all within the match distance
    let moved: Vec<Detection> = (0..500)
        .map(|i| Detection::at((i % 10) as f64 + 150.0, (i / 50) as f64))
        .collect();
    let metrics = small.analyze_with_delta(&moved, Utc::now(), 0.0);
    assert!((0.0..=100.0).contains(&metrics.risk_score));
    assert!((0.0..=100.0).contains(&metrics.density_score));
}

#[test]
fn test_density_is_monotonic_in_count() {
    let mut previous_density = -1.0;
    let mut previous_risk = -1.0;

    // people far apart so zones and clusters stay empty
    for n in 0..40 {
        let dets: Vec<Detection> = (0..n)
            .map(|i| Detection::at((i % 8) as f64 * 160.0 + 10.0, (i / 8) as f64 * 150.0 + 10.0))
            .collect();
        let metrics = analyzer(1280, 720).analyze(&dets, Utc::now());

        assert!(metrics.zones.is_empty());
        assert!(metrics.clusters.is_empty());
        assert!(metrics.density_score >= previous_density);
        assert!(metrics.risk_score >= previous_risk);
        previous_density = metrics.density_score;
        previous_risk = metrics.risk_score;
    }
}

#[test]
fn test_first_call_has_no_velocity() {
    let mut analyzer = analyzer(1280, 720);
    let metrics = analyzer.analyze_with_delta(&packed_square(), Utc::now(), 0.001);
    assert_eq!(metrics.avg_velocity, 0.0);
}

#[test]
fn test_motion_carries_across_frames() {
    let mut analyzer = analyzer(1280, 720);
    analyzer.analyze_with_delta(&detections(&[(100.0, 100.0), (400.0, 400.0)]), Utc::now(), 1.0);

    // one walker moves 30px, the other is replaced by a far-away entrant
    let moved = detections(&[(130.0, 100.0), (1000.0, 100.0)]);
    let metrics = analyzer.analyze_with_delta(&moved, Utc::now(), 0.5);
    assert_eq!(metrics.avg_velocity, 60.0);
    assert_eq!(metrics.anomaly_type, AnomalyType::SuddenMovement);
    assert_eq!(
        analyzer.previous_positions(),
        Some(&[Point::new(130.0, 100.0), Point::new(1000.0, 100.0)][..])
    );
}

#[test]
fn test_critical_forces_rush_behavior() {
    let mut analyzer = analyzer(200, 200);
    let metrics = analyzer.analyze(&packed_square(), Utc::now());

    assert_eq!(metrics.total_count, 128);
    assert_eq!(metrics.zones.len(), 16);
    assert!(metrics
        .zones
        .iter()
        .all(|z| z.density_level == DensityLevel::High && z.person_count == 8));
    assert_eq!(metrics.risk_score, 80.0);
    assert_eq!(metrics.risk_level, RiskLevel::Critical);
    assert_eq!(metrics.anomaly_type, AnomalyType::RushBehavior);
    assert_eq!(metrics.underlying_anomaly, AnomalyType::HighDensity);
}

#[test]
fn test_clusters_sorted_by_size() {
    let mut analyzer = analyzer(1280, 720);
    let mut points = Vec::new();
    for i in 0..12 {
        points.push((100.0 + i as f64 * 5.0, 100.0));
    }
    for i in 0..20 {
        points.push((900.0 + i as f64 * 3.0, 600.0));
    }
    // noise
    points.push((600.0, 50.0));

    let metrics = analyzer.analyze(&detections(&points), Utc::now());

    assert_eq!(metrics.clusters.len(), 2);
    assert_eq!(metrics.clusters[0].size, 20);
    assert_eq!(metrics.clusters[1].size, 12);
    assert!(metrics
        .clusters
        .windows(2)
        .all(|pair| pair[0].size >= pair[1].size));
}
