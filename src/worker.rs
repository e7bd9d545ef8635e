//! Background warp worker
//!
//! Warps can take a while on large images, so they run on tokio's blocking
//! pool (with rayon parallelism inside) while the caller stays responsive.
//! At most one warp is in flight per worker; what happens to a second
//! request is decided by [`InFlightPolicy`].

use arc_swap::ArcSwapOption;
use image::RgbaImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{Result, StraightenError};
use crate::geometry::Size;
use crate::transform::Homography;
use crate::warp::{warp_cancellable, CancelToken, WarpOptions};

/// Policy for a warp request that arrives while another is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InFlightPolicy {
    /// Cancel the running warp and start the new one
    #[default]
    CancelAndRestart,
    /// Refuse the new request with `WarpInProgress`
    Reject,
}

/// Everything needed to render one straightened image
#[derive(Debug, Clone)]
pub struct WarpRequest {
    pub source: Arc<RgbaImage>,
    pub homography: Homography,
    pub size: Size,
    pub options: WarpOptions,
}

impl WarpRequest {
    /// Render synchronously on the current thread
    pub fn run(&self, cancel: &CancelToken) -> Result<RgbaImage> {
        warp_cancellable(&self.source, &self.homography, self.size, &self.options, cancel)
    }
}

struct ActiveJob {
    id: u64,
    cancel: CancelToken,
}

/// Runs warps off the calling thread, one at a time
pub struct WarpWorker {
    policy: InFlightPolicy,
    active: Arc<Mutex<Option<ActiveJob>>>,
    /// Most recent successfully completed output
    latest: Arc<ArcSwapOption<RgbaImage>>,
    next_id: AtomicU64,
}

/// Pending warp result
///
/// Dropping the handle before the warp finishes cancels it.
pub struct WarpHandle {
    id: u64,
    cancel: CancelToken,
    task: JoinHandle<Result<Arc<RgbaImage>>>,
}

impl WarpHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Abandon this warp; `wait` will resolve to `Cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the warp to finish
    pub async fn wait(mut self) -> Result<Arc<RgbaImage>> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => {
                error!("Warp task {} did not complete: {}", self.id, e);
                Err(StraightenError::Cancelled)
            }
        }
    }
}

impl Drop for WarpHandle {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            debug!("Warp handle {} dropped, cancelling", self.id);
            self.cancel.cancel();
        }
    }
}

impl WarpWorker {
    pub fn new(policy: InFlightPolicy) -> Self {
        Self {
            policy,
            active: Arc::new(Mutex::new(None)),
            latest: Arc::new(ArcSwapOption::empty()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> InFlightPolicy {
        self.policy
    }

    /// Whether a warp is currently running
    pub fn is_busy(&self) -> bool {
        self.active.lock().is_some()
    }

    /// The last output that completed without being cancelled
    pub fn latest(&self) -> Option<Arc<RgbaImage>> {
        self.latest.load_full()
    }

    /// Start a warp in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: WarpRequest) -> Result<WarpHandle> {
        let mut active = self.active.lock();
        if let Some(job) = active.as_ref() {
            match self.policy {
                InFlightPolicy::Reject => {
                    debug!("Rejecting warp request, job {} still running", job.id);
                    return Err(StraightenError::WarpInProgress);
                }
                InFlightPolicy::CancelAndRestart => {
                    info!("Cancelling warp {} in favour of a new request", job.id);
                    job.cancel.cancel();
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelToken::new();
        *active = Some(ActiveJob {
            id,
            cancel: cancel.clone(),
        });
        drop(active);

        debug!(
            "Starting warp {}: {}x{} -> {}",
            id,
            request.source.width(),
            request.source.height(),
            request.size
        );

        let slot = Arc::clone(&self.active);
        let latest = Arc::clone(&self.latest);
        let token = cancel.clone();

        let task = tokio::task::spawn_blocking(move || {
            let result = request.run(&token).map(Arc::new);

            // Publish under the slot lock so a superseded job can never
            // overwrite the output of the job that replaced it
            let mut slot = slot.lock();
            let current = slot.as_ref().map(|job| job.id) == Some(id);
            if current {
                *slot = None;
            }
            let result = match result {
                Ok(img) if current && !token.is_cancelled() => {
                    latest.store(Some(Arc::clone(&img)));
                    Ok(img)
                }
                // Cancellation that lands after the last row still wins
                Ok(_) => Err(StraightenError::Cancelled),
                Err(e) => Err(e),
            };
            drop(slot);

            match &result {
                Ok(_) => debug!("Warp {} finished", id),
                Err(e) => debug!("Warp {} ended: {}", id, e),
            }
            result
        });

        Ok(WarpHandle { id, cancel, task })
    }
}
