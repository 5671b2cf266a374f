//! Frame-to-frame velocity estimate from nearest-neighbour matching

use common::crowd::Point;

use crate::config::AnalyticsConfig;

/// Smallest time step used for velocity, guards against zero or negative deltas
pub const MIN_TIME_DELTA: f64 = 0.001;

/// Stateful estimator; owns the positions seen on the previous call
#[derive(Debug, Clone)]
pub struct MotionEstimator {
    previous_positions: Option<Vec<Point>>,
    max_match_distance: f64,
}

impl MotionEstimator {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            previous_positions: None,
            max_match_distance: config.max_match_distance,
        }
    }

    /// Positions stored by the last call, `None` before the first call
    pub fn previous_positions(&self) -> Option<&[Point]> {
        self.previous_positions.as_deref()
    }

    /// Mean velocity in pixels per second of points that matched a previous
    /// position closer than the match distance.
    ///
    /// The stored positions always advance to `current`, whatever the outcome.
    pub fn estimate(&mut self, current: &[Point], time_delta: f64) -> f64 {
        let previous = self.previous_positions.replace(current.to_vec());

        let previous = match previous {
            Some(prev) if !prev.is_empty() && !current.is_empty() => prev,
            _ => return 0.0,
        };

        let dt = if time_delta.is_finite() {
            time_delta.max(MIN_TIME_DELTA)
        } else {
            MIN_TIME_DELTA
        };

        let velocities: Vec<f64> = current
            .iter()
            .filter_map(|point| {
                previous
                    .iter()
                    .map(|prev| point.distance(prev))
                    .min_by(|a, b| a.total_cmp(b))
            })
            .filter(|&distance| distance < self.max_match_distance)
            .map(|distance| distance / dt)
            .collect();

        if velocities.is_empty() {
            0.0
        } else {
            velocities.iter().sum::<f64>() / velocities.len() as f64
        }
    }
}
