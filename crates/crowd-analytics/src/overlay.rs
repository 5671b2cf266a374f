//! Annotated frame rendering
//!
//! Draws detection boxes, a gaussian density heatmap, flagged zones and a
//! metrics panel with gauges onto a copy of the analyzed frame.

use anyhow::{ensure, Result};
use common::crowd::{BoundingBox, CrowdMetrics, DensityLevel, Detection, RiskLevel};
use image::{imageops, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

pub const HEATMAP_ALPHA: f32 = 0.3;
const HEATMAP_SIGMA: f32 = 30.0;
const HEATMAP_SCALE: u32 = 4;

const DETECTION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const ZONE_CRITICAL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const ZONE_HIGH_COLOR: Rgb<u8> = Rgb([255, 165, 0]);
const GAUGE_TRACK_COLOR: Rgb<u8> = Rgb([64, 64, 64]);

const PANEL_ORIGIN: (i32, i32) = (10, 50);
const PANEL_SIZE: (u32, u32) = (390, 200);
const PANEL_OPACITY: f32 = 0.6;

/// Render the annotated copy of `frame`
pub fn render(
    frame: &RgbImage,
    detections: &[Detection],
    metrics: &CrowdMetrics,
) -> Result<RgbImage> {
    ensure!(
        frame.width() > 0 && frame.height() > 0,
        "cannot annotate an empty frame"
    );

    let mut annotated = frame.clone();

    for detection in detections {
        draw_box(&mut annotated, &detection.bbox, DETECTION_COLOR, 2);
    }

    if !detections.is_empty() {
        let heatmap = density_heatmap(frame.width(), frame.height(), detections);
        blend_heatmap(&mut annotated, &heatmap, HEATMAP_ALPHA);
    }

    for zone in &metrics.zones {
        let color = match zone.density_level {
            DensityLevel::Critical => ZONE_CRITICAL_COLOR,
            DensityLevel::High => ZONE_HIGH_COLOR,
        };
        draw_box(&mut annotated, &zone.bbox, color, 3);
    }

    draw_metrics_panel(&mut annotated, metrics);

    Ok(annotated)
}

pub fn risk_color(level: RiskLevel) -> Rgb<u8> {
    match level {
        RiskLevel::Critical => Rgb([255, 0, 0]),
        RiskLevel::High => Rgb([255, 165, 0]),
        RiskLevel::Medium => Rgb([255, 255, 0]),
        RiskLevel::Low => Rgb([0, 255, 0]),
    }
}

/// Normalized (0..=1) density map computed at reduced resolution
pub fn density_heatmap(
    width: u32,
    height: u32,
    detections: &[Detection],
) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let w = (width / HEATMAP_SCALE).max(1);
    let h = (height / HEATMAP_SCALE).max(1);
    let mut map: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::new(w, h);

    for detection in detections {
        let (x, y) = (detection.center.x, detection.center.y);
        if x < 0.0 || y < 0.0 || x >= width as f64 || y >= height as f64 {
            continue;
        }
        let px = ((x as u32) / HEATMAP_SCALE).min(w - 1);
        let py = ((y as u32) / HEATMAP_SCALE).min(h - 1);
        map.get_pixel_mut(px, py).0[0] += 1.0;
    }

    let mut blurred = imageops::blur(&map, HEATMAP_SIGMA / HEATMAP_SCALE as f32);

    let max = blurred.pixels().map(|p| p.0[0]).fold(0.0f32, f32::max);
    if max > 0.0 {
        for pixel in blurred.pixels_mut() {
            pixel.0[0] /= max;
        }
    }
    blurred
}

/// Jet colormap: 0 is dark blue, 1 is dark red
pub fn jet(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let channel =
        |offset: f32| ((1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

fn blend_heatmap(frame: &mut RgbImage, heatmap: &ImageBuffer<Luma<f32>, Vec<f32>>, alpha: f32) {
    let (hw, hh) = heatmap.dimensions();
    for (x, y, pixel) in frame.enumerate_pixels_mut() {
        let hx = (x / HEATMAP_SCALE).min(hw - 1);
        let hy = (y / HEATMAP_SCALE).min(hh - 1);
        let color = jet(heatmap.get_pixel(hx, hy).0[0]);
        *pixel = mix(*pixel, color, alpha);
    }
}

fn mix(base: Rgb<u8>, over: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let channel = |b: u8, o: u8| (b as f32 * (1.0 - alpha) + o as f32 * alpha).round() as u8;
    Rgb([
        channel(base.0[0], over.0[0]),
        channel(base.0[1], over.0[1]),
        channel(base.0[2], over.0[2]),
    ])
}

fn draw_box(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: i32) {
    let width = bbox.width().round() as i64;
    let height = bbox.height().round() as i64;
    if width <= 0 || height <= 0 {
        return;
    }

    let rect = Rect::at(bbox.x1.round() as i32, bbox.y1.round() as i32)
        .of_size(width as u32, height as u32);
    for offset in 0..thickness {
        let expanded = Rect::at(rect.left() - offset, rect.top() - offset).of_size(
            rect.width() + (offset * 2) as u32,
            rect.height() + (offset * 2) as u32,
        );
        draw_hollow_rect_mut(img, expanded, color);
    }
}

fn shade_rect(img: &mut RgbImage, x: i32, y: i32, width: u32, height: u32, opacity: f32) {
    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    let x1 = ((x as i64 + width as i64).max(0) as u32).min(img.width());
    let y1 = ((y as i64 + height as i64).max(0) as u32).min(img.height());

    for py in y0..y1 {
        for px in x0..x1 {
            let pixel = img.get_pixel_mut(px, py);
            *pixel = mix(*pixel, Rgb([0, 0, 0]), opacity);
        }
    }
}

fn draw_metrics_panel(img: &mut RgbImage, metrics: &CrowdMetrics) {
    let (px, py) = PANEL_ORIGIN;
    shade_rect(img, px, py, PANEL_SIZE.0, PANEL_SIZE.1, PANEL_OPACITY);

    let color = risk_color(metrics.risk_level);
    let gauge_width = PANEL_SIZE.0 - 120;
    let rows = [
        (metrics.total_count as f64, None),
        (metrics.density_score, Some(metrics.density_score / 100.0)),
        (metrics.risk_score, Some(metrics.risk_score / 100.0)),
        (metrics.avg_velocity, None),
    ];

    for (row, (value, fill)) in rows.iter().enumerate() {
        let y = py + 20 + row as i32 * 40;
        draw_number(img, *value, px + 10, y, 3, color);

        if let Some(fill) = fill {
            let gx = px + 110;
            draw_filled_rect_mut(img, Rect::at(gx, y).of_size(gauge_width, 15), GAUGE_TRACK_COLOR);
            let filled = (gauge_width as f64 * fill.clamp(0.0, 1.0)).round() as u32;
            if filled > 0 {
                draw_filled_rect_mut(img, Rect::at(gx, y).of_size(filled, 15), color);
            }
        }
    }
}

/// 3x5 glyphs for digits and the decimal point, one row per entry
fn glyph(ch: char) -> [u8; 5] {
    match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        _ => [0; 5],
    }
}

fn draw_number(img: &mut RgbImage, value: f64, x: i32, y: i32, scale: u32, color: Rgb<u8>) {
    let text = format!("{:.1}", value);
    let advance = 4 * scale as i32;

    for (i, ch) in text.chars().enumerate() {
        let cx = x + i as i32 * advance;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..3 {
                if (bits >> (2 - col)) & 1 == 1 {
                    let rect = Rect::at(cx + col * scale as i32, y + row as i32 * scale as i32)
                        .of_size(scale, scale);
                    draw_filled_rect_mut(img, rect, color);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::crowd::{AnomalyType, DensityZone};

    fn metrics(zones: Vec<DensityZone>, risk_level: RiskLevel) -> CrowdMetrics {
        CrowdMetrics {
            total_count: 3,
            density_score: 40.0,
            risk_level,
            risk_score: 55.0,
            anomaly_type: AnomalyType::Normal,
            underlying_anomaly: AnomalyType::Normal,
            zones,
            clusters: Vec::new(),
            avg_velocity: 0.0,
            frame_area: 640 * 480,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), Rgb([0, 0, 128]));
        assert_eq!(jet(1.0), Rgb([128, 0, 0]));
        assert_eq!(jet(0.5), Rgb([128, 255, 128]));
    }

    #[test]
    fn test_heatmap_peaks_at_detection() {
        let dets = vec![Detection::at(100.0, 100.0)];
        let map = density_heatmap(640, 480, &dets);
        assert_eq!(map.dimensions(), (160, 120));

        let peak = map.get_pixel(25, 25).0[0];
        assert!((peak - 1.0).abs() < 1e-4);
        assert!(map.get_pixel(150, 110).0[0] < 0.01);
    }

    #[test]
    fn test_heatmap_ignores_out_of_frame_centers() {
        let dets = vec![Detection::at(-5.0, 10.0), Detection::at(700.0, 10.0)];
        let map = density_heatmap(640, 480, &dets);
        assert!(map.pixels().all(|p| p.0[0] == 0.0));
    }

    #[test]
    fn test_render_draws_zones_and_keeps_size() {
        let frame = RgbImage::new(640, 480);
        let zone = DensityZone {
            grid_position: (8, 10),
            bbox: BoundingBox::new(500.0, 400.0, 550.0, 450.0),
            person_count: 11,
            density_level: DensityLevel::Critical,
        };
        let detections = [Detection::at(120.0, 300.0)];
        let out = render(&frame, &detections, &metrics(vec![zone], RiskLevel::High)).unwrap();

        assert_eq!(out.dimensions(), frame.dimensions());
        assert_eq!(*out.get_pixel(500, 420), ZONE_CRITICAL_COLOR);
        // the source frame is left untouched
        assert_eq!(*frame.get_pixel(500, 420), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_render_tiny_frame() {
        let frame = RgbImage::new(3, 3);
        let detections = [Detection::at(1.0, 1.0)];
        assert!(render(&frame, &detections, &metrics(Vec::new(), RiskLevel::Low)).is_ok());
    }

    #[test]
    fn test_render_rejects_empty_frame() {
        let frame = RgbImage::new(0, 0);
        assert!(render(&frame, &[], &metrics(Vec::new(), RiskLevel::Low)).is_err());
    }

    #[test]
    fn test_risk_colors() {
        assert_eq!(risk_color(RiskLevel::Critical), Rgb([255, 0, 0]));
        assert_eq!(risk_color(RiskLevel::Low), Rgb([0, 255, 0]));
    }
}
