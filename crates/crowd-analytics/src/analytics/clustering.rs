//! Density-based clustering of detection centers (DBSCAN)

use std::collections::VecDeque;

use common::crowd::{BoundingBox, Cluster, Point};

use crate::config::AnalyticsConfig;

const NOISE: i64 = -1;
const UNVISITED: i64 = -2;

#[derive(Debug, Clone)]
pub struct ClusterDetector {
    eps: f64,
    min_cluster_size: usize,
}

impl ClusterDetector {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            eps: config.clustering_eps,
            min_cluster_size: config.min_cluster_size,
        }
    }

    /// Group centers into density-connected clusters, largest first.
    ///
    /// A point is a core point when at least `min_cluster_size` points
    /// (itself included) lie within `eps`. Points not reachable from a core
    /// point are noise and are dropped.
    pub fn detect(&self, centers: &[Point]) -> Vec<Cluster> {
        if centers.is_empty() || centers.len() < self.min_cluster_size {
            return Vec::new();
        }

        let labels = self.label_points(centers);
        let cluster_count = labels.iter().copied().max().map_or(0, |max| (max + 1).max(0));

        let mut members: Vec<Vec<Point>> = vec![Vec::new(); cluster_count as usize];
        for (point, &label) in centers.iter().zip(&labels) {
            if label >= 0 {
                members[label as usize].push(*point);
            }
        }

        let mut clusters: Vec<Cluster> = members
            .into_iter()
            .enumerate()
            .filter(|(_, points)| !points.is_empty())
            .map(|(id, points)| summarize(id as u32, &points))
            .collect();

        // stable sort keeps discovery order between equal sizes
        clusters.sort_by(|a, b| b.size.cmp(&a.size));
        clusters
    }

    fn label_points(&self, centers: &[Point]) -> Vec<i64> {
        let neighborhoods: Vec<Vec<usize>> = (0..centers.len())
            .map(|i| self.region_query(centers, i))
            .collect();

        let mut labels = vec![UNVISITED; centers.len()];
        let mut next_label: i64 = 0;

        for start in 0..centers.len() {
            if labels[start] != UNVISITED {
                continue;
            }
            if neighborhoods[start].len() < self.min_cluster_size {
                labels[start] = NOISE;
                continue;
            }

            let label = next_label;
            next_label += 1;
            labels[start] = label;

            let mut frontier: VecDeque<usize> = neighborhoods[start].iter().copied().collect();
            while let Some(idx) = frontier.pop_front() {
                if labels[idx] == NOISE {
                    // border point previously written off as noise
                    labels[idx] = label;
                    continue;
                }
                if labels[idx] != UNVISITED {
                    continue;
                }

                labels[idx] = label;
                if neighborhoods[idx].len() >= self.min_cluster_size {
                    frontier.extend(
                        neighborhoods[idx]
                            .iter()
                            .copied()
                            .filter(|&n| labels[n] == UNVISITED || labels[n] == NOISE),
                    );
                }
            }
        }

        labels
    }

    fn region_query(&self, centers: &[Point], idx: usize) -> Vec<usize> {
        let origin = centers[idx];
        centers
            .iter()
            .enumerate()
            .filter(|(_, p)| origin.distance(p) <= self.eps)
            .map(|(i, _)| i)
            .collect()
    }
}

fn summarize(id: u32, points: &[Point]) -> Cluster {
    let n = points.len() as f64;
    let center = Point::new(
        points.iter().map(|p| p.x).sum::<f64>() / n,
        points.iter().map(|p| p.y).sum::<f64>() / n,
    );

    let bbox = points.iter().skip(1).fold(
        BoundingBox::new(points[0].x, points[0].y, points[0].x, points[0].y),
        |acc, p| {
            BoundingBox::new(acc.x1.min(p.x), acc.y1.min(p.y), acc.x2.max(p.x), acc.y2.max(p.y))
        },
    );

    Cluster {
        id,
        size: points.len(),
        center,
        bbox,
        area: bbox.area(),
    }
}
