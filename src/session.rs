//! Straightening session
//!
//! A [`Session`] owns one source image, the points captured on it and the
//! last straightened output. It replaces process-wide state so several
//! sessions can live side by side.
//!
//! State machine:
//!
//! ```text
//! Empty -> Capturing(1..3) -> Ready -> Warping -> Warped
//!                               ^          |
//!                               +- Failed <+
//! ```
//!
//! `reset` returns to `Empty` from anywhere. A failed solve keeps the
//! points, so the caller can remove or replace one and retry.

use image::RgbaImage;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::capture::{CapturedPoint, PointCapture, POINT_COUNT};
use crate::config::{Config, WarpConfig};
use crate::error::{Result, StraightenError};
use crate::geometry::{NativePoint, OutputQuad, Size};
use crate::transform::{Homography, SolverTolerances};
use crate::warp::CancelToken;
use crate::worker::{WarpRequest, WarpWorker};

/// Observable session state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Empty,
    Capturing { points: usize },
    Ready,
    Warping,
    Warped,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Idle,
    Warping,
    Warped,
    Failed(StraightenError),
}

/// Summary of a session for reporting
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    #[serde(flatten)]
    pub state: SessionState,
    pub image: Option<Size>,
    pub points: Vec<CapturedPoint>,
    pub output: Option<Size>,
    pub sampling: &'static str,
}

/// Caller-owned capture and straightening session
pub struct Session {
    image: Option<Arc<RgbaImage>>,
    capture: PointCapture,
    warp: WarpConfig,
    tolerances: SolverTolerances,
    phase: Phase,
    output: Option<Arc<RgbaImage>>,
}

impl Session {
    pub fn new(config: &Config) -> Self {
        Self {
            image: None,
            capture: PointCapture::new(),
            warp: config.warp.clone(),
            tolerances: config.solver,
            phase: Phase::Idle,
            output: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.image.is_none() {
            return SessionState::Empty;
        }
        match &self.phase {
            Phase::Warping => SessionState::Warping,
            Phase::Warped => SessionState::Warped,
            Phase::Failed(e) => SessionState::Failed {
                reason: e.to_string(),
            },
            Phase::Idle => match self.capture.len() {
                0 => SessionState::Empty,
                POINT_COUNT => SessionState::Ready,
                n => SessionState::Capturing { points: n },
            },
        }
    }

    /// Replace the source image, discarding points and output
    pub fn load_image(&mut self, image: RgbaImage) {
        info!("Loaded source image {}x{}", image.width(), image.height());
        self.image = Some(Arc::new(image));
        self.reset();
    }

    pub fn image(&self) -> Option<&Arc<RgbaImage>> {
        self.image.as_ref()
    }

    /// Native size of the source image, zero when none is loaded
    pub fn native_size(&self) -> Size {
        self.image
            .as_ref()
            .map(|img| Size::new(img.width(), img.height()))
            .unwrap_or(Size::new(0, 0))
    }

    pub fn points(&self) -> &[NativePoint] {
        self.capture.points()
    }

    pub fn output(&self) -> Option<&Arc<RgbaImage>> {
        self.output.as_ref()
    }

    fn ensure_not_warping(&self) -> Result<()> {
        if self.phase == Phase::Warping {
            return Err(StraightenError::InvalidState(
                "a warp is in progress".into(),
            ));
        }
        Ok(())
    }

    /// Points changed: any previous result or failure no longer applies
    fn points_changed(&mut self) {
        self.phase = Phase::Idle;
        self.output = None;
    }

    /// Add a point clicked on the image displayed at `display` size
    pub fn add_point(&mut self, display_x: f64, display_y: f64, display: Size) -> Result<NativePoint> {
        self.ensure_not_warping()?;
        let native = self.native_size();
        let point = self.capture.add_point(display_x, display_y, display, native)?;
        self.points_changed();
        Ok(point)
    }

    /// Replace one captured point
    pub fn replace_point(
        &mut self,
        index: usize,
        display_x: f64,
        display_y: f64,
        display: Size,
    ) -> Result<NativePoint> {
        self.ensure_not_warping()?;
        let native = self.native_size();
        let point = self
            .capture
            .replace_point(index, display_x, display_y, display, native)?;
        self.points_changed();
        Ok(point)
    }

    /// Drop the most recent point
    pub fn remove_last_point(&mut self) -> Result<Option<NativePoint>> {
        self.ensure_not_warping()?;
        let removed = self.capture.remove_last();
        self.points_changed();
        Ok(removed)
    }

    /// Clear points and output; the image stays loaded
    pub fn reset(&mut self) {
        self.capture.reset();
        self.points_changed();
    }

    /// Solve for the homography and build a warp request
    ///
    /// A failed solve moves the session to `Failed`.
    pub fn prepare(&mut self) -> Result<WarpRequest> {
        self.ensure_not_warping()?;
        let source = self.image.clone().ok_or(StraightenError::NoImage)?;
        let mut quad = self.capture.quad()?;
        if self.warp.reorder_points {
            quad = quad.ordered_clockwise();
        }

        let size = self.warp.output_size.resolve(&quad, self.native_size());
        if size.is_empty() {
            return Err(StraightenError::InvalidOutputSize);
        }
        let dst = OutputQuad::rectangle(size);

        match Homography::compute_with(&quad, &dst, &self.tolerances) {
            Ok(homography) => Ok(WarpRequest {
                source,
                homography,
                size,
                options: self.warp.options(),
            }),
            Err(e) => {
                warn!("Cannot straighten selection: {}", e);
                self.phase = Phase::Failed(e.clone());
                Err(e)
            }
        }
    }

    /// Prepare a request and mark the session as warping
    pub fn begin_warp(&mut self) -> Result<WarpRequest> {
        let request = self.prepare()?;
        self.phase = Phase::Warping;
        self.output = None;
        Ok(request)
    }

    /// Record the outcome of a warp started with [`Session::begin_warp`]
    pub fn finish_warp(&mut self, result: Result<Arc<RgbaImage>>) -> Result<Arc<RgbaImage>> {
        match result {
            Ok(output) => {
                info!("Straightened image {}x{}", output.width(), output.height());
                self.phase = Phase::Warped;
                self.output = Some(Arc::clone(&output));
                Ok(output)
            }
            Err(e @ (StraightenError::Cancelled | StraightenError::WarpInProgress)) => {
                self.phase = Phase::Idle;
                Err(e)
            }
            Err(e) => {
                self.phase = Phase::Failed(e.clone());
                Err(e)
            }
        }
    }

    /// Straighten on the current thread
    pub fn straighten(&mut self) -> Result<Arc<RgbaImage>> {
        let request = self.begin_warp()?;
        let result = request.run(&CancelToken::new()).map(Arc::new);
        self.finish_warp(result)
    }

    /// Straighten on a background worker
    ///
    /// Dropping the returned future cancels the warp and leaves the session
    /// `Ready`, points intact.
    pub async fn straighten_with(&mut self, worker: &WarpWorker) -> Result<Arc<RgbaImage>> {
        let request = self.begin_warp()?;
        let mut pending = PendingWarp {
            session: self,
            settled: false,
        };
        let result = match worker.submit(request) {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(e),
        };
        pending.settled = true;
        pending.session.finish_warp(result)
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            state: self.state(),
            image: self.image.as_ref().map(|_| self.native_size()),
            points: self.capture.report_points(self.warp.reorder_points),
            output: self
                .output
                .as_ref()
                .map(|img| Size::new(img.width(), img.height())),
            sampling: self.warp.sampling.as_str(),
        }
    }
}

/// Puts the session back to `Idle` if a background warp is abandoned
struct PendingWarp<'a> {
    session: &'a mut Session,
    settled: bool,
}

impl Drop for PendingWarp<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Background warp abandoned before completion");
            self.session.phase = Phase::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warp::OutputSize;
    use crate::worker::InFlightPolicy;
    use image::Rgba;
    use std::time::Duration;

    fn test_image() -> RgbaImage {
        RgbaImage::from_fn(200, 150, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8, 255])
        })
    }

    fn loaded_session() -> Session {
        let mut session = Session::new(&Config::default());
        session.load_image(test_image());
        session
    }

    const NATIVE: Size = Size {
        width: 200,
        height: 150,
    };

    fn add_quad(session: &mut Session) {
        for (x, y) in [(20.0, 15.0), (180.0, 25.0), (170.0, 140.0), (10.0, 130.0)] {
            session.add_point(x, y, NATIVE).unwrap();
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut session = Session::new(&Config::default());
        assert_eq!(session.state(), SessionState::Empty);
        assert_eq!(
            session.add_point(1.0, 1.0, NATIVE),
            Err(StraightenError::NoImage)
        );

        session.load_image(test_image());
        assert_eq!(session.state(), SessionState::Empty);

        session.add_point(20.0, 15.0, NATIVE).unwrap();
        assert_eq!(session.state(), SessionState::Capturing { points: 1 });

        session.add_point(180.0, 25.0, NATIVE).unwrap();
        session.add_point(170.0, 140.0, NATIVE).unwrap();
        session.add_point(10.0, 130.0, NATIVE).unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        let out = session.straighten().unwrap();
        assert_eq!(session.state(), SessionState::Warped);
        assert_eq!((out.width(), out.height()), (200, 150));

        session.reset();
        assert_eq!(session.state(), SessionState::Empty);
        assert!(session.output().is_none());
    }

    #[test]
    fn test_straighten_requires_four_points() {
        let mut session = loaded_session();
        session.add_point(1.0, 1.0, NATIVE).unwrap();
        assert!(matches!(
            session.straighten(),
            Err(StraightenError::InvalidState(_))
        ));
        assert_eq!(session.state(), SessionState::Capturing { points: 1 });
    }

    #[test]
    fn test_failed_solve_recovers() {
        let mut session = loaded_session();
        for (x, y) in [(0.0, 0.0), (10.0, 0.0), (20.0, 0.0), (5.0, 5.0)] {
            session.add_point(x, y, NATIVE).unwrap();
        }

        assert_eq!(
            session.straighten(),
            Err(StraightenError::DegenerateQuadrilateral)
        );
        assert!(matches!(session.state(), SessionState::Failed { .. }));
        assert_eq!(session.points().len(), 4);

        session.replace_point(2, 10.0, 20.0, NATIVE).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.straighten().is_ok());
    }

    #[test]
    fn test_remove_point_after_failure() {
        let mut session = loaded_session();
        for (x, y) in [(0.0, 0.0), (10.0, 0.0), (20.0, 0.0), (5.0, 5.0)] {
            session.add_point(x, y, NATIVE).unwrap();
        }
        assert!(session.straighten().is_err());

        session.remove_last_point().unwrap();
        assert_eq!(session.state(), SessionState::Capturing { points: 3 });
    }

    #[test]
    fn test_reset_and_redo_is_byte_identical() {
        let mut session = loaded_session();
        add_quad(&mut session);
        let first = session.straighten().unwrap();

        session.reset();
        add_quad(&mut session);
        let second = session.straighten().unwrap();

        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn test_reorder_points() {
        let mut session = loaded_session();
        add_quad(&mut session);
        let ordered = session.straighten().unwrap();

        // Same corners clicked in a different order
        let mut shuffled = loaded_session();
        for (x, y) in [(170.0, 140.0), (20.0, 15.0), (10.0, 130.0), (180.0, 25.0)] {
            shuffled.add_point(x, y, NATIVE).unwrap();
        }
        assert_eq!(shuffled.straighten().unwrap().as_raw(), ordered.as_raw());
    }

    #[test]
    fn test_scaled_display() {
        let mut session = loaded_session();
        let p = session.add_point(50.0, 37.5, Size::new(100, 75)).unwrap();
        assert_eq!((p.x, p.y), (100.0, 75.0));
    }

    #[test]
    fn test_load_image_resets_points() {
        let mut session = loaded_session();
        add_quad(&mut session);
        session.load_image(test_image());
        assert!(session.points().is_empty());
        assert_eq!(session.state(), SessionState::Empty);
    }

    #[test]
    fn test_report() {
        let mut session = loaded_session();
        add_quad(&mut session);
        session.straighten().unwrap();

        let report = serde_json::to_value(session.report()).unwrap();
        assert_eq!(report["state"], "warped");
        assert_eq!(report["points"].as_array().unwrap().len(), 4);
        assert_eq!(report["output"]["width"], 200);
    }

    #[tokio::test]
    async fn test_straighten_with_worker() {
        let mut session = loaded_session();
        add_quad(&mut session);
        let sync_out = session.straighten().unwrap();

        let worker = WarpWorker::new(InFlightPolicy::Reject);
        let async_out = session.straighten_with(&worker).await.unwrap();
        assert_eq!(sync_out.as_raw(), async_out.as_raw());
        assert_eq!(session.state(), SessionState::Warped);
    }

    #[tokio::test]
    async fn test_abandoned_warp_recovers() {
        let mut session = Session::new(&Config::default());
        session.load_image(RgbaImage::from_pixel(2048, 2048, Rgba([9, 9, 9, 255])));
        let native = session.native_size();
        for (x, y) in [(100.0, 80.0), (1900.0, 120.0), (1950.0, 1980.0), (60.0, 1900.0)] {
            session.add_point(x, y, native).unwrap();
        }

        let worker = WarpWorker::new(InFlightPolicy::Reject);
        let attempt =
            tokio::time::timeout(Duration::from_millis(1), session.straighten_with(&worker)).await;
        assert!(attempt.is_err(), "warp finished before the timeout");

        // Points survive and can be edited again
        assert_eq!(session.state(), SessionState::Ready);
        session.replace_point(0, 110.0, 90.0, native).unwrap();
        assert_eq!(session.points().len(), 4);

        for _ in 0..500 {
            if !worker.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!worker.is_busy());
        assert!(worker.latest().is_none());
    }

    #[test]
    fn test_empty_output_size_rejected() {
        let mut config = Config::default();
        config.warp.output_size = OutputSize::Fixed(Size::new(0, 0));
        let mut session = Session::new(&config);
        session.load_image(test_image());
        add_quad(&mut session);

        assert_eq!(
            session.straighten(),
            Err(StraightenError::InvalidOutputSize)
        );
        // Not a property of the points, so the session stays ready
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.output().is_none());
    }

    #[test]
    fn test_report_labels_follow_reordering() {
        let mut session = loaded_session();
        for (x, y) in [(170.0, 140.0), (20.0, 15.0), (10.0, 130.0), (180.0, 25.0)] {
            session.add_point(x, y, NATIVE).unwrap();
        }

        let report = serde_json::to_value(session.report()).unwrap();
        let points = report["points"].as_array().unwrap();
        assert_eq!(points[0]["label"], "Top Left");
        assert_eq!((points[0]["x"].as_f64(), points[0]["y"].as_f64()), (Some(20.0), Some(15.0)));
        assert_eq!(points[2]["label"], "Bottom Right");
        assert_eq!((points[2]["x"].as_f64(), points[2]["y"].as_f64()), (Some(170.0), Some(140.0)));

        // Corner names are only known once all four points are in
        session.remove_last_point().unwrap();
        let report = serde_json::to_value(session.report()).unwrap();
        assert!(report["points"][0].get("label").is_none());
    }
}
