//! Perspective warp renderer
//!
//! Produces the straightened image by inverse-mapping every output pixel
//! through the homography and sampling the source there. Rows are rendered
//! in parallel; each row only depends on the read-only source, so the
//! output is identical however rows are scheduled.

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::error::{Result, StraightenError};
use crate::geometry::{NativeQuad, Size};
use crate::transform::Homography;

const CHANNELS: usize = 4;

/// Sampling strategy for source lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sampling {
    /// Round to the closest source pixel
    Nearest,
    /// Interpolate the four surrounding source pixels
    #[default]
    Bilinear,
}

impl Sampling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sampling::Nearest => "nearest",
            Sampling::Bilinear => "bilinear",
        }
    }
}

/// How big the straightened output should be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputSize {
    /// Same size as the source image
    #[default]
    Source,
    /// Longest of each pair of opposite edges of the selected quad
    Estimated,
    /// Explicit dimensions
    Fixed(Size),
}

impl OutputSize {
    pub fn resolve(&self, quad: &NativeQuad, source: Size) -> Size {
        match *self {
            OutputSize::Source => source,
            OutputSize::Estimated => quad.estimated_size(),
            OutputSize::Fixed(size) => size,
        }
    }
}

/// Per-warp rendering options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpOptions {
    pub sampling: Sampling,
    /// RGBA value for output pixels that map outside the source
    pub background: [u8; 4],
}

impl Default for WarpOptions {
    fn default() -> Self {
        Self {
            sampling: Sampling::default(),
            background: [0, 0, 0, 0],
        }
    }
}

/// Shared flag used to abandon a warp in progress
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Warp `source` into a new `out`-sized image through `homography`
pub fn warp(
    source: &RgbaImage,
    homography: &Homography,
    out: Size,
    options: &WarpOptions,
) -> Result<RgbaImage> {
    warp_cancellable(source, homography, out, options, &CancelToken::new())
}

/// Like [`warp`], but checks `cancel` before every row
///
/// A cancelled warp returns [`StraightenError::Cancelled`] and drops its
/// partial buffer.
pub fn warp_cancellable(
    source: &RgbaImage,
    homography: &Homography,
    out: Size,
    options: &WarpOptions,
    cancel: &CancelToken,
) -> Result<RgbaImage> {
    if source.width() == 0 || source.height() == 0 {
        return Err(StraightenError::NoImage);
    }
    if out.is_empty() {
        return Err(StraightenError::InvalidOutputSize);
    }

    let start = Instant::now();
    let src = SourceView {
        data: source.as_raw(),
        width: source.width() as usize,
        height: source.height() as usize,
    };
    let dst_w = out.width as usize;
    let row_len = dst_w * CHANNELS;

    let mut buf = vec![0u8; out.pixel_count() * CHANNELS];

    buf.par_chunks_mut(row_len)
        .enumerate()
        .try_for_each(|(dst_y, row)| {
            if cancel.is_cancelled() {
                return Err(StraightenError::Cancelled);
            }
            for dst_x in 0..dst_w {
                let pixel = homography
                    .inverse_xy(dst_x as f64, dst_y as f64)
                    .filter(|&(x, y)| src.contains(x, y))
                    .map(|(x, y)| match options.sampling {
                        Sampling::Bilinear => src.bilinear(x, y),
                        Sampling::Nearest => src.nearest(x, y),
                    })
                    .unwrap_or(options.background);

                let offset = dst_x * CHANNELS;
                row[offset..offset + CHANNELS].copy_from_slice(&pixel);
            }
            Ok(())
        })?;

    debug!(
        "Warped {}x{} -> {} ({}) in {:?}",
        src.width,
        src.height,
        out,
        options.sampling.as_str(),
        start.elapsed()
    );

    RgbaImage::from_raw(out.width, out.height, buf).ok_or(StraightenError::InvalidOutputSize)
}

/// Read-only view of the source pixels
struct SourceView<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
}

impl SourceView<'_> {
    /// Whether `(x, y)` falls on the footprint of the pixel grid
    ///
    /// Pixel `i` covers `[i - 0.5, i + 0.5)`.
    #[inline]
    fn contains(&self, x: f64, y: f64) -> bool {
        x >= -0.5 && x < self.width as f64 - 0.5 && y >= -0.5 && y < self.height as f64 - 0.5
    }

    #[inline]
    fn pixel(&self, x: usize, y: usize) -> &[u8] {
        let offset = (y * self.width + x) * CHANNELS;
        &self.data[offset..offset + CHANNELS]
    }

    /// Bilinear interpolation sampling
    #[inline]
    fn bilinear(&self, x: f64, y: f64) -> [u8; 4] {
        // Clamp coordinates
        let x = x.clamp(0.0, (self.width - 1) as f64);
        let y = y.clamp(0.0, (self.height - 1) as f64);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let p00 = self.pixel(x0, y0);
        let p10 = self.pixel(x1, y0);
        let p01 = self.pixel(x0, y1);
        let p11 = self.pixel(x1, y1);

        let mut result = [0u8; 4];
        for c in 0..CHANNELS {
            let value = p00[c] as f64 * (1.0 - fx) * (1.0 - fy)
                + p10[c] as f64 * fx * (1.0 - fy)
                + p01[c] as f64 * (1.0 - fx) * fy
                + p11[c] as f64 * fx * fy;

            result[c] = value.round().clamp(0.0, 255.0) as u8;
        }
        result
    }

    /// Nearest-neighbor sampling
    #[inline]
    fn nearest(&self, x: f64, y: f64) -> [u8; 4] {
        let x = (x.round().max(0.0) as usize).min(self.width - 1);
        let y = (y.round().max(0.0) as usize).min(self.height - 1);

        let mut result = [0u8; 4];
        result.copy_from_slice(self.pixel(x, y));
        result
    }
}
