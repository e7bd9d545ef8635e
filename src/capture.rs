//! Point capture: turns clicks on a displayed image into native pixel points

use serde::{Deserialize, Serialize};

use crate::error::{Result, StraightenError};
use crate::geometry::{DisplayPoint, NativePoint, NativeQuad, Size, CORNER_LABELS};

/// Number of points that make up a quadrilateral
pub const POINT_COUNT: usize = 4;

/// A labeled captured point, for reports and marker rendering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapturedPoint {
    pub index: usize,
    /// Corner name; absent while the corners are still being reordered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub x: f64,
    pub y: f64,
}

/// Accumulates up to four points in native image coordinates
///
/// Points are stored in native space only, so a change of display size
/// never affects points that were already captured.
#[derive(Debug, Clone, Default)]
pub struct PointCapture {
    points: Vec<NativePoint>,
}

impl PointCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a point clicked at `(display_x, display_y)` on an image shown at
    /// `display` size whose native size is `native`
    pub fn add_point(
        &mut self,
        display_x: f64,
        display_y: f64,
        display: Size,
        native: Size,
    ) -> Result<NativePoint> {
        if self.is_complete() {
            return Err(StraightenError::InvalidState(format!(
                "already captured {} points",
                POINT_COUNT
            )));
        }

        let point = DisplayPoint::new(display_x, display_y).to_native(display, native)?;
        self.points.push(point);

        tracing::debug!(
            "Captured point {} ({}) at {:.0},{:.0}",
            self.points.len(),
            CORNER_LABELS[self.points.len() - 1],
            point.x,
            point.y
        );

        Ok(point)
    }

    /// Replace the point at `index` with a new click
    pub fn replace_point(
        &mut self,
        index: usize,
        display_x: f64,
        display_y: f64,
        display: Size,
        native: Size,
    ) -> Result<NativePoint> {
        if index >= self.points.len() {
            return Err(StraightenError::InvalidState(format!(
                "no point at index {} ({} captured)",
                index,
                self.points.len()
            )));
        }

        let point = DisplayPoint::new(display_x, display_y).to_native(display, native)?;
        self.points[index] = point;
        Ok(point)
    }

    /// Remove the most recently captured point
    pub fn remove_last(&mut self) -> Option<NativePoint> {
        self.points.pop()
    }

    /// Clear all captured points
    pub fn reset(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.points.len() == POINT_COUNT
    }

    pub fn points(&self) -> &[NativePoint] {
        &self.points
    }

    /// The captured quadrilateral, in capture order
    pub fn quad(&self) -> Result<NativeQuad> {
        match <[NativePoint; POINT_COUNT]>::try_from(self.points.as_slice()) {
            Ok(corners) => Ok(NativeQuad::new(corners)),
            Err(_) => Err(StraightenError::InvalidState(format!(
                "need {} points, have {}",
                POINT_COUNT,
                self.points.len()
            ))),
        }
    }

    /// Captured points labeled in capture order
    pub fn labeled_points(&self) -> Vec<CapturedPoint> {
        describe(&self.points, true)
    }

    /// Points as they will be used for straightening
    ///
    /// With `reorder` the corners are sorted clockwise from the top-left
    /// first, so each label names the corner the point actually ends up
    /// as. Until all four points are in, that is unknown and the points
    /// are reported unlabeled in capture order.
    pub fn report_points(&self, reorder: bool) -> Vec<CapturedPoint> {
        if !reorder {
            return self.labeled_points();
        }
        match self.quad() {
            Ok(quad) => describe(&quad.ordered_clockwise().corners, true),
            Err(_) => describe(&self.points, false),
        }
    }
}

fn describe(points: &[NativePoint], labeled: bool) -> Vec<CapturedPoint> {
    points
        .iter()
        .enumerate()
        .map(|(index, p)| CapturedPoint {
            index,
            label: labeled.then(|| CORNER_LABELS[index].to_string()),
            x: p.x,
            y: p.y,
        })
        .collect()
}
