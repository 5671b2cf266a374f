//! Grid occupancy and density scoring

use common::crowd::{BoundingBox, DensityLevel, DensityZone, Point};

use super::round2;
use crate::config::AnalyticsConfig;

/// Density estimator bound to one frame geometry
#[derive(Debug, Clone)]
pub struct DensityEstimator {
    frame_width: u32,
    frame_height: u32,
    frame_area: u64,
    grid_size: u32,
    high_density_threshold: u32,
    pixels_per_sqm: f64,
}

impl DensityEstimator {
    pub fn new(frame_width: u32, frame_height: u32, config: &AnalyticsConfig) -> Self {
        Self {
            frame_width,
            frame_height,
            frame_area: frame_width as u64 * frame_height as u64,
            grid_size: config.grid_size,
            high_density_threshold: config.high_density_threshold,
            pixels_per_sqm: config.pixels_per_sqm,
        }
    }

    pub fn frame_area(&self) -> u64 {
        self.frame_area
    }

    /// Density score (0-100) for `count` people spread over the frame.
    ///
    /// 0.5 people/m² maps to 25, 2 people/m² and above to 100.
    pub fn density_score(&self, count: usize) -> f64 {
        if self.frame_area == 0 {
            return 0.0;
        }

        let area_sqm = self.frame_area as f64 / self.pixels_per_sqm;
        let people_per_sqm = count as f64 / area_sqm.max(1.0);
        let score = (people_per_sqm / 2.0 * 100.0).clamp(0.0, 100.0);

        round2(score)
    }

    /// Grid cells whose occupancy meets the high-density threshold, row-major
    pub fn zones(&self, centers: &[Point]) -> Vec<DensityZone> {
        if centers.is_empty() || self.grid_size == 0 {
            return Vec::new();
        }

        let rows = self.frame_height / self.grid_size;
        let cols = self.frame_width / self.grid_size;
        if rows == 0 || cols == 0 {
            return Vec::new();
        }

        let mut counts = vec![0u32; rows as usize * cols as usize];
        for center in centers {
            let col = self.cell_index(center.x, cols);
            let row = self.cell_index(center.y, rows);
            counts[(row * cols + col) as usize] += 1;
        }

        let grid = self.grid_size as f64;
        let mut zones = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                let count = counts[(row * cols + col) as usize];
                if count < self.high_density_threshold {
                    continue;
                }

                let density_level = if count > self.high_density_threshold * 2 {
                    DensityLevel::Critical
                } else {
                    DensityLevel::High
                };

                zones.push(DensityZone {
                    grid_position: (col, row),
                    bbox: BoundingBox::new(
                        col as f64 * grid,
                        row as f64 * grid,
                        (col + 1) as f64 * grid,
                        (row + 1) as f64 * grid,
                    ),
                    person_count: count,
                    density_level,
                });
            }
        }

        zones
    }

    /// Cell index along one axis; out-of-frame coordinates land in the edge cells
    fn cell_index(&self, coord: f64, cells: u32) -> u32 {
        let cell = (coord / self.grid_size as f64).floor();
        if cell.is_nan() || cell < 0.0 {
            0
        } else {
            (cell as u64).min(cells as u64 - 1) as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator(width: u32, height: u32) -> DensityEstimator {
        DensityEstimator::new(width, height, &AnalyticsConfig::default())
    }

    fn points(coords: &[(f64, f64)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn test_density_score_reference_frame() {
        let density = estimator(1280, 720);
        assert_eq!(density.frame_area(), 921_600);
        assert_eq!(density.density_score(5), 2.71);
        assert_eq!(density.density_score(0), 0.0);
    }

    #[test]
    fn test_density_score_saturates() {
        let density = estimator(1280, 720);
        // 2 people/m² over 92.16 m²
        assert_eq!(density.density_score(185), 100.0);
        assert_eq!(density.density_score(10_000), 100.0);
    }

    #[test]
    fn test_density_score_small_frame_uses_one_sqm_floor() {
        let density = estimator(50, 50);
        // 0.25 m² is floored to 1 m²
        assert_eq!(density.density_score(1), 50.0);
    }

    #[test]
    fn test_density_score_zero_area() {
        let density = estimator(0, 720);
        assert_eq!(density.density_score(12), 0.0);
    }

    #[test]
    fn test_density_score_monotonic() {
        let density = estimator(1280, 720);
        let mut last = 0.0;
        for count in 0..400 {
            let score = density.density_score(count);
            assert!(score >= last);
            assert!((0.0..=100.0).contains(&score));
            last = score;
        }
    }

    #[test]
    fn test_zones_threshold_and_levels() {
        let density = estimator(200, 200);
        let mut centers = points(&[(10.0, 10.0); 5]);
        centers.extend(points(&[(160.0, 110.0); 11]));
        centers.extend(points(&[(60.0, 160.0); 4]));

        let zones = density.zones(&centers);
        assert_eq!(zones.len(), 2);

        assert_eq!(zones[0].grid_position, (0, 0));
        assert_eq!(zones[0].person_count, 5);
        assert_eq!(zones[0].density_level, DensityLevel::High);
        assert_eq!(zones[0].bbox, BoundingBox::new(0.0, 0.0, 50.0, 50.0));

        assert_eq!(zones[1].grid_position, (3, 2));
        assert_eq!(zones[1].person_count, 11);
        assert_eq!(zones[1].density_level, DensityLevel::Critical);
    }

    #[test]
    fn test_zones_exactly_double_threshold_is_high() {
        let density = estimator(100, 100);
        let zones = density.zones(&points(&[(20.0, 20.0); 10]));
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].density_level, DensityLevel::High);
    }

    #[test]
    fn test_zones_clamp_border_points() {
        // 130 px wide leaves a partial column that is folded into the last cell
        let density = estimator(130, 100);
        let centers = points(&[
            (129.0, 99.0),
            (125.0, 60.0),
            (101.0, 99.5),
            (140.0, 200.0),
            (100.0, 50.0),
        ]);

        let zones = density.zones(&centers);
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].grid_position, (1, 1));
        assert_eq!(zones[0].person_count, 5);
    }

    #[test]
    fn test_zones_negative_coordinates_clamp_to_first_cell() {
        let density = estimator(100, 100);
        let zones = density.zones(&points(&[(-5.0, -1.0); 5]));
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].grid_position, (0, 0));
    }

    #[test]
    fn test_zones_empty_and_gridless_frames() {
        assert!(estimator(1280, 720).zones(&[]).is_empty());
        assert!(estimator(40, 720).zones(&points(&[(10.0, 10.0); 8])).is_empty());
    }
}
