//! Start / stop / reboot orchestration
//!
//! All three operations are serialized by one async mutex and run as spawned
//! tasks, so they complete even when the caller is dropped. Hardware calls run
//! on the blocking pool, one task per source, so a driver that fails or
//! panics on one source never prevents handling of the other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::camera::session::{PRIMARY, WEBCAM};
use crate::camera::{CameraError, CameraSession, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Started,
    AlreadyRunning,
    Stopped,
    AlreadyStopped,
    Rebooted,
    RebootInProgress,
}

impl ControlOutcome {
    pub fn message(self) -> &'static str {
        match self {
            ControlOutcome::Started => "Camera started",
            ControlOutcome::AlreadyRunning => "Camera already running",
            ControlOutcome::Stopped => "Camera stopped",
            ControlOutcome::AlreadyStopped => "Camera already stopped",
            ControlOutcome::Rebooted => "Camera rebooted",
            ControlOutcome::RebootInProgress => "Camera is currently rebooting",
        }
    }
}

/// Result of a control operation, serialized as the HTTP response body.
#[derive(Debug, Clone, Serialize)]
pub struct ControlReport {
    #[serde(skip)]
    pub outcome: ControlOutcome,
    pub message: &'static str,
    /// Sources that failed to start or stop
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ControlReport {
    fn new(outcome: ControlOutcome, errors: Vec<String>) -> Self {
        Self {
            outcome,
            message: outcome.message(),
            errors,
        }
    }
}

/// Clears the rebooting flag when the reboot finishes or is cancelled.
struct RebootGuard<'a>(&'a AtomicBool);

impl<'a> RebootGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RebootGuard(flag))
    }
}

impl Drop for RebootGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct LifecycleController {
    session: Arc<CameraSession>,
    op_lock: Mutex<()>,
    rebooting: AtomicBool,
    settle: Duration,
}

impl LifecycleController {
    pub fn new(session: Arc<CameraSession>, settle: Duration) -> Self {
        Self {
            session,
            op_lock: Mutex::new(()),
            rebooting: AtomicBool::new(false),
            settle,
        }
    }

    pub fn session(&self) -> &Arc<CameraSession> {
        &self.session
    }

    pub fn is_rebooting(&self) -> bool {
        self.rebooting.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status(self.is_rebooting())
    }

    /// Start every configured source that is not running yet.
    pub async fn start(self: &Arc<Self>) -> ControlReport {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.start_sources().await });
        Self::join("start", ControlOutcome::Started, task).await
    }

    /// Stop every running source.
    pub async fn stop(self: &Arc<Self>) -> ControlReport {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _op = this.op_lock.lock().await;
            this.stop_sources().await
        });
        Self::join("stop", ControlOutcome::Stopped, task).await
    }

    /// Stop, wait for the hardware to settle, and start again.
    ///
    /// The sequence runs to completion even if the caller stops waiting.
    pub async fn reboot(self: &Arc<Self>) -> ControlReport {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.reboot_sequence().await });
        Self::join("reboot", ControlOutcome::Rebooted, task).await
    }

    /// Wait for a detached control task. The task keeps the operation lock
    /// until it finishes, so a dropped request never leaves it half done.
    async fn join(op: &'static str, outcome: ControlOutcome, task: JoinHandle<ControlReport>) -> ControlReport {
        match task.await {
            Ok(report) => report,
            Err(e) => {
                error!(op, error = %e, "Camera control task failed");
                ControlReport::new(outcome, vec![format!("{op}: task failed: {e}")])
            }
        }
    }

    async fn start_sources(&self) -> ControlReport {
        let _op = self.op_lock.lock().await;

        if self.session.all_running() {
            info!("Start requested, camera already running");
            return ControlReport::new(ControlOutcome::AlreadyRunning, Vec::new());
        }

        let errors = self.setup_sources().await;
        info!(failures = errors.len(), "Camera started");
        ControlReport::new(ControlOutcome::Started, errors)
    }

    async fn reboot_sequence(&self) -> ControlReport {
        let Some(_rebooting) = RebootGuard::acquire(&self.rebooting) else {
            info!("Reboot requested while a reboot is in progress");
            return ControlReport::new(ControlOutcome::RebootInProgress, Vec::new());
        };

        let _op = self.op_lock.lock().await;
        info!("Rebooting camera");

        let mut errors = self.stop_sources().await.errors;

        info!(settle_ms = self.settle.as_millis() as u64, "Waiting for camera resources to settle");
        tokio::time::sleep(self.settle).await;

        errors.extend(self.setup_sources().await);
        info!(failures = errors.len(), "Camera rebooted");

        ControlReport::new(ControlOutcome::Rebooted, errors)
    }

    async fn stop_sources(&self) -> ControlReport {
        if !self.session.any_running() {
            info!("Stop requested, camera already stopped");
            return ControlReport::new(ControlOutcome::AlreadyStopped, Vec::new());
        }

        let mut errors = Vec::new();
        let primary = self.on_session(PRIMARY, |s| s.stop_primary()).await;
        let webcam = self.on_session(WEBCAM, |s| s.stop_secondary()).await;

        for result in [primary, webcam] {
            if let Err(e) = result {
                errors.push(e);
            }
        }

        info!(failures = errors.len(), "Camera stopped");
        ControlReport::new(ControlOutcome::Stopped, errors)
    }

    async fn setup_sources(&self) -> Vec<String> {
        let primary = self.on_session(PRIMARY, |s| s.setup_primary()).await;
        let webcam = self.on_session(WEBCAM, |s| s.setup_secondary()).await;

        [primary, webcam].into_iter().filter_map(Result::err).collect()
    }

    /// Run one hardware operation on the blocking pool, containing errors
    /// and panics.
    async fn on_session<F>(&self, camera: &'static str, op: F) -> Result<bool, String>
    where
        F: FnOnce(&CameraSession) -> Result<bool, CameraError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);

        match tokio::task::spawn_blocking(move || op(session.as_ref())).await {
            Ok(Ok(changed)) => Ok(changed),
            Ok(Err(e)) => {
                error!(camera, error = %e, "Camera operation failed");
                Err(e.to_string())
            }
            Err(e) => {
                warn!(camera, error = %e, "Camera task aborted");
                Err(format!("{camera}: task aborted: {e}"))
            }
        }
    }
}
