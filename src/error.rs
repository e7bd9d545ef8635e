//! Error types for point capture, solving and warping

use thiserror::Error;

/// Errors raised by the straightening core.
///
/// Everything up to and including the solve stage is recoverable: the caller
/// can remove or replace a point and try again.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StraightenError {
    /// An operation needed a source image but none is loaded
    #[error("no image loaded")]
    NoImage,

    /// The operation is not valid in the current capture state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The displayed image has a zero dimension, so no scale factor exists
    #[error("display size must be non-zero")]
    InvalidDisplaySize,

    /// Requested output rectangle has a zero dimension
    #[error("output size must be non-zero")]
    InvalidOutputSize,

    /// Three of the four points are collinear; no unique homography exists
    #[error("quadrilateral is degenerate (three points are collinear)")]
    DegenerateQuadrilateral,

    /// The linear system could not be solved stably
    #[error("homography is ill-conditioned: {0}")]
    IllConditioned(String),

    /// A warp is already running and the worker rejects new requests
    #[error("a warp is already in progress")]
    WarpInProgress,

    /// The warp was cancelled before it completed
    #[error("warp cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, StraightenError>;
