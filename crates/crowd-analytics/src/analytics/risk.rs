//! Weighted risk scoring and anomaly labelling

use common::crowd::{AnomalyType, DensityZone, RiskLevel};

use super::round2;
use crate::config::AnalyticsConfig;

const DENSITY_WEIGHT: f64 = 0.4;
const DENSITY_CAP: f64 = 40.0;
const ZONE_POINTS: f64 = 10.0;
const ZONE_CAP: f64 = 30.0;
const VELOCITY_CAP: f64 = 20.0;
const COUNT_CAP: f64 = 10.0;

/// Zones beyond this count label the frame as high density
const HIGH_DENSITY_ZONE_COUNT: usize = 3;
/// Density score beyond this labels the frame as clustering
const CLUSTERING_DENSITY_SCORE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    /// Clamped to 0-100 and rounded to two decimals
    pub score: f64,
    /// Final label, `RushBehavior` whenever the level is critical
    pub anomaly: AnomalyType,
    /// Label produced by the guard chain before the critical override
    pub underlying_anomaly: AnomalyType,
}

#[derive(Debug, Clone)]
pub struct RiskClassifier {
    movement_threshold: f64,
}

impl RiskClassifier {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            movement_threshold: config.anomaly_movement_threshold,
        }
    }

    pub fn classify(
        &self,
        count: usize,
        density_score: f64,
        zones: &[DensityZone],
        avg_velocity: f64,
    ) -> RiskAssessment {
        let density_factor = (density_score * DENSITY_WEIGHT).clamp(0.0, DENSITY_CAP);
        let zone_factor = (zones.len() as f64 * ZONE_POINTS).min(ZONE_CAP);
        let velocity_factor =
            (avg_velocity / self.movement_threshold * VELOCITY_CAP).clamp(0.0, VELOCITY_CAP);
        let count_factor = (count as f64 / 100.0 * COUNT_CAP).min(COUNT_CAP);

        let raw = (density_factor + zone_factor + velocity_factor + count_factor).clamp(0.0, 100.0);
        let level = level_for(raw);

        let underlying_anomaly = self.anomaly_for(density_score, zones.len(), avg_velocity);
        let anomaly = if level == RiskLevel::Critical {
            AnomalyType::RushBehavior
        } else {
            underlying_anomaly
        };

        RiskAssessment {
            level,
            score: round2(raw),
            anomaly,
            underlying_anomaly,
        }
    }

    /// Ordered guards; the first match wins
    fn anomaly_for(&self, density_score: f64, zone_count: usize, avg_velocity: f64) -> AnomalyType {
        if avg_velocity > self.movement_threshold {
            AnomalyType::SuddenMovement
        } else if zone_count > HIGH_DENSITY_ZONE_COUNT {
            AnomalyType::HighDensity
        } else if density_score > CLUSTERING_DENSITY_SCORE {
            AnomalyType::Clustering
        } else {
            AnomalyType::Normal
        }
    }
}

fn level_for(score: f64) -> RiskLevel {
    if score < 25.0 {
        RiskLevel::Low
    } else if score < 50.0 {
        RiskLevel::Medium
    } else if score < 75.0 {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}
