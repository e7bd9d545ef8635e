//! Straighten - four-point perspective correction
//!
//! Pick four corners of a skewed rectangle in an image (a photographed
//! document, a screen, a sign) and resample it into a proper rectangle.
//!
//! The pipeline runs one way: clicks on a displayed image are converted to
//! native pixel points ([`capture`]), a homography is solved from the four
//! points to the output rectangle ([`transform`]), and the output is
//! rendered by inverse mapping every output pixel ([`warp`]). A
//! [`session::Session`] ties these together and [`worker::WarpWorker`]
//! runs warps in the background.

pub mod capture;
pub mod config;
pub mod error;
pub mod geometry;
pub mod loader;
pub mod preview;
pub mod session;
pub mod transform;
pub mod warp;
pub mod worker;

pub use error::{Result, StraightenError};
pub use geometry::{NativePoint, NativeQuad, OutputPoint, OutputQuad, Size};
pub use session::{Session, SessionState};
pub use transform::Homography;
pub use warp::{warp, OutputSize, Sampling, WarpOptions};
pub use worker::{InFlightPolicy, WarpWorker};
