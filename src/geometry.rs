//! Points, sizes and quadrilaterals tagged with their coordinate space
//!
//! Three coordinate spaces exist:
//! - `Display`: the scaled representation the user interacts with
//! - `Native`: the pixel grid of the source image
//! - `Output`: the pixel grid of the straightened result
//!
//! The space is part of the type, so a display coordinate can only reach
//! native space through [`DisplayPoint::to_native`], and native/output
//! coordinates only meet through a [`crate::transform::Homography`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use crate::error::{Result, StraightenError};

/// Coordinate space markers
pub mod space {
    /// Coordinates on the (possibly scaled) displayed image
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Display;

    /// Coordinates on the source image's native pixel grid
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Native;

    /// Coordinates on the straightened output's pixel grid
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Output;
}

/// A 2D point in coordinate space `S`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Point<S> {
    pub x: f64,
    pub y: f64,
    #[serde(skip)]
    space: PhantomData<S>,
}

pub type DisplayPoint = Point<space::Display>;
pub type NativePoint = Point<space::Native>;
pub type OutputPoint = Point<space::Output>;

impl<S> Point<S> {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            space: PhantomData,
        }
    }

    pub fn distance(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl DisplayPoint {
    /// Convert a display coordinate to the native pixel grid
    ///
    /// The result is rounded to whole pixels.
    pub fn to_native(&self, display: Size, native: Size) -> Result<NativePoint> {
        if native.is_empty() {
            return Err(StraightenError::NoImage);
        }
        if display.is_empty() {
            return Err(StraightenError::InvalidDisplaySize);
        }

        let scale_x = native.width as f64 / display.width as f64;
        let scale_y = native.height as f64 / display.height as f64;

        Ok(NativePoint::new(
            (self.x * scale_x).round(),
            (self.y * scale_y).round(),
        ))
    }
}

/// Image or display dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Size {
    type Err = String;

    /// Parse `WIDTHxHEIGHT`, e.g. `800x600`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let width = w
            .trim()
            .parse()
            .map_err(|e| format!("invalid width '{}': {}", w, e))?;
        let height = h
            .trim()
            .parse()
            .map_err(|e| format!("invalid height '{}': {}", h, e))?;
        Ok(Size::new(width, height))
    }
}

/// Corner names in canonical order
pub const CORNER_LABELS: [&str; 4] = ["Top Left", "Top Right", "Bottom Right", "Bottom Left"];

/// Four ordered points: top-left, top-right, bottom-right, bottom-left
///
/// This is clockwise on screen, since image y grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Quad<S> {
    pub corners: [Point<S>; 4],
}

pub type NativeQuad = Quad<space::Native>;
pub type OutputQuad = Quad<space::Output>;

impl<S: Copy> Quad<S> {
    pub fn new(corners: [Point<S>; 4]) -> Self {
        Self { corners }
    }

    pub fn from_tuples(points: [(f64, f64); 4]) -> Self {
        Self::new(points.map(|(x, y)| Point::new(x, y)))
    }

    /// Squared length of the longest segment between any two corners
    fn extent_sq(&self) -> f64 {
        let mut max = 0.0f64;
        for i in 0..4 {
            for j in (i + 1)..4 {
                let dx = self.corners[j].x - self.corners[i].x;
                let dy = self.corners[j].y - self.corners[i].y;
                max = max.max(dx * dx + dy * dy);
            }
        }
        max
    }

    /// Whether any three of the four corners are collinear
    ///
    /// Each triangle's doubled area is compared against `tolerance` times
    /// the squared extent of the quad, so the test does not depend on the
    /// magnitude of the coordinates.
    pub fn has_collinear_triple(&self, tolerance: f64) -> bool {
        let extent_sq = self.extent_sq();
        if !extent_sq.is_finite() || extent_sq <= f64::EPSILON {
            return true;
        }

        (0..4).any(|skip| {
            let [a, b, c] = match skip {
                0 => [1, 2, 3],
                1 => [0, 2, 3],
                2 => [0, 1, 3],
                _ => [0, 1, 2],
            }
            .map(|i| self.corners[i]);
            let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
            cross.abs() <= tolerance * extent_sq
        })
    }

    /// Reorder the corners clockwise starting from the top-left
    ///
    /// Corners are sorted by angle around their centroid; the corner with
    /// the smallest `x + y` is taken as the top-left.
    pub fn ordered_clockwise(&self) -> Self {
        let cx = self.corners.iter().map(|p| p.x).sum::<f64>() / 4.0;
        let cy = self.corners.iter().map(|p| p.y).sum::<f64>() / 4.0;

        let mut sorted = self.corners;
        sorted.sort_by(|a, b| {
            let ta = (a.y - cy).atan2(a.x - cx);
            let tb = (b.y - cy).atan2(b.x - cx);
            ta.partial_cmp(&tb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let start = sorted
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.x + a.y)
                    .partial_cmp(&(b.x + b.y))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        sorted.rotate_left(start);

        Self::new(sorted)
    }
}

impl NativeQuad {
    /// Output size that preserves the longest of each pair of opposite edges
    pub fn estimated_size(&self) -> Size {
        let [tl, tr, br, bl] = self.corners;
        let width = tl.distance(&tr).max(bl.distance(&br));
        let height = tl.distance(&bl).max(tr.distance(&br));
        Size::new(
            (width.round() as u32).max(1),
            (height.round() as u32).max(1),
        )
    }
}

impl OutputQuad {
    /// The full output frame as a destination quad
    pub fn rectangle(size: Size) -> Self {
        let w = size.width as f64;
        let h = size.height as f64;
        Self::from_tuples([
            (0.0, 0.0), // Top-left
            (w, 0.0),   // Top-right
            (w, h),     // Bottom-right
            (0.0, h),   // Bottom-left
        ])
    }
}
