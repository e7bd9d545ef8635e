//! Marker preview: draws captured points and the selected outline over a
//! copy of the source image

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_line_segment_mut};

use crate::capture::POINT_COUNT;
use crate::geometry::NativePoint;

/// Colors and size of the point markers
#[derive(Debug, Clone, Copy)]
pub struct MarkerStyle {
    pub radius: i32,
    pub fill: Rgba<u8>,
    pub ring: Rgba<u8>,
    pub outline: Rgba<u8>,
}

impl MarkerStyle {
    /// Red markers with a white ring, sized so they stay visible on large
    /// images
    pub fn for_image(width: u32, height: u32) -> Self {
        let radius = (width.max(height) / 160).max(5) as i32;
        Self {
            radius,
            fill: Rgba([255, 0, 0, 255]),
            ring: Rgba([255, 255, 255, 255]),
            outline: Rgba([0, 255, 0, 255]),
        }
    }
}

/// Render markers for `points` (in capture order) over a copy of `source`
///
/// Consecutive points are joined; the outline is closed once all four
/// points are present. Each marker is numbered with a row of pips above
/// it, one per position in capture order.
pub fn render_markers(source: &RgbaImage, points: &[NativePoint], style: &MarkerStyle) -> RgbaImage {
    let mut canvas = source.clone();

    let segments = if points.len() == POINT_COUNT {
        points.len()
    } else {
        points.len().saturating_sub(1)
    };
    for i in 0..segments {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        draw_line_segment_mut(
            &mut canvas,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            style.outline,
        );
    }

    for (index, p) in points.iter().enumerate() {
        let center = (p.x.round() as i32, p.y.round() as i32);
        draw_filled_circle_mut(&mut canvas, center, style.radius, style.fill);
        draw_hollow_circle_mut(&mut canvas, center, style.radius, style.ring);
        for pip in pip_centers(center, index + 1, style.radius) {
            draw_filled_circle_mut(&mut canvas, pip, pip_radius(style.radius), style.ring);
        }
    }

    canvas
}

fn pip_radius(marker_radius: i32) -> i32 {
    (marker_radius / 3).max(1)
}

/// Centers of `count` pips in a row centered just above a marker
fn pip_centers(center: (i32, i32), count: usize, marker_radius: i32) -> Vec<(i32, i32)> {
    let r = pip_radius(marker_radius);
    let step = r * 4;
    let span = step * (count as i32 - 1);
    let y = center.1 - marker_radius - 2 * r - 2;
    (0..count as i32)
        .map(|i| (center.0 - span / 2 + i * step, y))
        .collect()
}
