//! One kiosk recognition session: camera → probe descriptor → match → record + notify.
//!
//! The session owns the camera track while an attempt is running and releases
//! it exactly once on every way out: terminal outcome, error, or `close()`.
//! Only one attempt runs at a time; a trigger that arrives while an attempt is
//! in flight is ignored.

use crate::api::{AttendanceRecord, AttendanceRecorder};
use crate::engine::{EngineError, FaceEmbedder};
use crate::notifier::{NotificationEvent, Notifier};
use chrono::Local;
use rollcall_core::{EuclideanMatcher, Gallery, Matcher, Operator};
use rollcall_hw::{CameraError, Frame, FrameSource, VideoTrack};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    /// Camera being opened.
    Starting,
    Streaming,
    Detecting,
    Matching,
    /// Camera could not be opened; the session can't recognise anyone.
    CameraFailed,
    Closed,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera unavailable: {0}")]
    CameraAccess(String),
    #[error("frame capture failed: {0}")]
    Capture(#[from] CameraError),
    #[error("face description failed: {0}")]
    Describe(#[from] EngineError),
    #[error("face description timed out after {0:?}")]
    Timeout(Duration),
    #[error("frame capture timed out after {0:?}")]
    CaptureTimeout(Duration),
    #[error("session closed")]
    Closed,
}

/// Result of one trigger.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Matched {
        operator: Operator,
        distance: f32,
        /// Set when the attendance write failed. The match still stands.
        record_error: Option<String>,
    },
    Rejected {
        /// Distance to the nearest gallery entry, if there was one.
        distance: Option<f32>,
        empty_gallery: bool,
    },
    NoFaceFound,
    /// Another attempt was already running.
    Ignored,
    /// The session was closed while the attempt was in flight.
    Discarded,
}

/// Collaborators a session needs.
#[derive(Clone)]
pub struct SessionDeps {
    pub camera: Arc<dyn FrameSource>,
    pub embedder: Arc<dyn FaceEmbedder>,
    pub recorder: Arc<dyn AttendanceRecorder>,
    pub notifier: Notifier,
}

pub struct RecognitionSession {
    deps: SessionDeps,
    gallery: RwLock<Arc<Gallery>>,
    threshold: f32,
    detect_timeout: Duration,
    state: Mutex<SessionState>,
    camera_failure: Mutex<Option<String>>,
    track: Mutex<Option<Box<dyn VideoTrack>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecognitionSession {
    pub fn new(
        deps: SessionDeps,
        gallery: Arc<Gallery>,
        threshold: f32,
        detect_timeout: Duration,
    ) -> Self {
        Self {
            deps,
            gallery: RwLock::new(gallery),
            threshold,
            detect_timeout,
            state: Mutex::new(SessionState::Idle),
            camera_failure: Mutex::new(None),
            track: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Swap in a rebuilt gallery. Attempts already running keep their snapshot.
    pub fn replace_gallery(&self, gallery: Arc<Gallery>) {
        match self.gallery.write() {
            Ok(mut g) => *g = gallery,
            Err(poisoned) => *poisoned.into_inner() = gallery,
        }
    }

    fn gallery_snapshot(&self) -> Arc<Gallery> {
        match self.gallery.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn gallery_size(&self) -> usize {
        self.gallery_snapshot().len()
    }

    /// Move `from` → `to`. Fails if the session moved elsewhere (i.e. closed).
    fn advance(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = lock(&self.state);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn release_camera(&self) {
        if let Some(track) = lock(&self.track).take() {
            track.stop();
        }
    }

    /// End the attempt: release the camera and go back to `Idle` unless closed.
    fn finish(&self) {
        self.release_camera();
        let mut state = lock(&self.state);
        if *state != SessionState::Closed && *state != SessionState::CameraFailed {
            *state = SessionState::Idle;
        }
    }

    fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Ask the camera source whether the device is there at all. A missing
    /// device moves a fresh session straight to `CameraFailed`.
    pub fn check_camera(&self) {
        let Err(e) = self.deps.camera.probe() else {
            return;
        };
        let reason = e.to_string();
        *lock(&self.camera_failure) = Some(reason.clone());
        if self.advance(SessionState::Idle, SessionState::CameraFailed) {
            tracing::error!(error = %reason, "camera unavailable at session start");
        }
    }

    /// Tear the session down. Releases the camera; late results are discarded.
    pub fn close(&self) {
        *lock(&self.state) = SessionState::Closed;
        self.release_camera();
        tracing::info!("recognition session closed");
    }

    /// Run one recognition attempt.
    pub async fn trigger(&self) -> Result<AttemptOutcome, SessionError> {
        {
            let mut state = lock(&self.state);
            match *state {
                SessionState::Idle => *state = SessionState::Starting,
                SessionState::CameraFailed => {
                    let reason = lock(&self.camera_failure).clone().unwrap_or_default();
                    return Err(SessionError::CameraAccess(reason));
                }
                SessionState::Closed => return Err(SessionError::Closed),
                busy => {
                    tracing::debug!(state = ?busy, "trigger ignored: attempt in flight");
                    return Ok(AttemptOutcome::Ignored);
                }
            }
        }

        let gallery = self.gallery_snapshot();

        let frame = match self.acquire_frame().await? {
            Some(frame) => frame,
            None => return Ok(AttemptOutcome::Discarded),
        };

        if !self.advance(SessionState::Streaming, SessionState::Detecting) {
            self.release_camera();
            return Ok(AttemptOutcome::Discarded);
        }

        let described =
            tokio::time::timeout(self.detect_timeout, self.deps.embedder.describe(frame.image))
                .await;
        if self.is_closed() {
            tracing::debug!("description finished after close; discarding");
            return Ok(AttemptOutcome::Discarded);
        }

        let probe = match described {
            Err(_) => {
                self.finish();
                tracing::warn!(timeout = ?self.detect_timeout, "face description timed out");
                return Err(SessionError::Timeout(self.detect_timeout));
            }
            Ok(Err(e)) => {
                self.finish();
                tracing::warn!(error = %e, "face description failed");
                return Err(e.into());
            }
            Ok(Ok(None)) => {
                self.finish();
                tracing::info!("no face detected");
                return Ok(AttemptOutcome::NoFaceFound);
            }
            Ok(Ok(Some(probe))) => probe,
        };

        if !self.advance(SessionState::Detecting, SessionState::Matching) {
            return Ok(AttemptOutcome::Discarded);
        }

        let result = EuclideanMatcher.compare(&probe, &gallery, self.threshold);
        let Some(operator) = result.operator else {
            self.finish();
            let distance = result.distance.is_finite().then_some(result.distance);
            tracing::info!(?distance, gallery = gallery.len(), "probe rejected");
            return Ok(AttemptOutcome::Rejected {
                distance,
                empty_gallery: gallery.is_empty(),
            });
        };

        self.release_camera();
        tracing::info!(
            operator = %operator.id,
            name = %operator.name,
            distance = result.distance,
            "operator matched"
        );

        let now = Local::now();
        self.deps.notifier.publish(&NotificationEvent::present(&operator, now));

        let record = AttendanceRecord {
            operator_id: operator.id.clone(),
            date: now.format("%Y-%m-%d").to_string(),
            timestamp: now.to_rfc3339(),
        };
        let record_error = match self.deps.recorder.record(&record).await {
            Ok(_) => None,
            Err(e) => {
                tracing::error!(operator = %operator.id, error = %e, "attendance write failed");
                Some(e.to_string())
            }
        };

        self.finish();
        Ok(AttemptOutcome::Matched {
            operator,
            distance: result.distance,
            record_error,
        })
    }

    /// Open the camera and grab one frame, leaving the track in place.
    /// `Ok(None)` means the session was closed meanwhile.
    async fn acquire_frame(&self) -> Result<Option<Frame>, SessionError> {
        let source = self.deps.camera.clone();
        let opened = tokio::task::spawn_blocking(move || source.open())
            .await
            .unwrap_or_else(|e| {
                Err(CameraError::CaptureFailed(format!("open task failed: {e}")))
            });

        let mut track = match opened {
            Ok(track) => track,
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(error = %reason, "camera access failed");
                *lock(&self.camera_failure) = Some(reason.clone());
                if !self.advance(SessionState::Starting, SessionState::CameraFailed) {
                    return Ok(None);
                }
                return Err(SessionError::CameraAccess(reason));
            }
        };

        if !self.advance(SessionState::Starting, SessionState::Streaming) {
            track.stop();
            return Ok(None);
        }

        let mut capture = tokio::task::spawn_blocking(move || {
            let captured = track.capture();
            (track, captured)
        });

        let joined = match tokio::time::timeout(self.detect_timeout, &mut capture).await {
            Ok(joined) => joined,
            Err(_) => {
                // The track is still inside the stalled capture; stop it once that returns.
                tokio::spawn(async move {
                    if let Ok((track, _)) = capture.await {
                        track.stop();
                    }
                });
                if self.is_closed() {
                    return Ok(None);
                }
                self.finish();
                tracing::warn!(timeout = ?self.detect_timeout, "frame capture timed out");
                return Err(SessionError::CaptureTimeout(self.detect_timeout));
            }
        };

        let (track, captured) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                self.finish();
                let reason = format!("capture task failed: {e}");
                return Err(SessionError::Capture(CameraError::CaptureFailed(reason)));
            }
        };

        if self.is_closed() {
            track.stop();
            return Ok(None);
        }
        *lock(&self.track) = Some(track);

        match captured {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                self.finish();
                tracing::warn!(error = %e, "frame capture failed");
                Err(e.into())
            }
        }
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        self.release_camera();
    }
}
