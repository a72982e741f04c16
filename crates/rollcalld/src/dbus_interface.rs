use crate::api::{AttendanceRecorder, OperatorDirectory};
use crate::config::Config;
use crate::engine::ModelProvider;
use crate::gallery;
use crate::notifier::Notifier;
use crate::session::{RecognitionSession, SessionDeps, SessionState};
use rollcall_core::roster::{next_free_led, validate_roster};
use rollcall_core::{Gallery, Operator};
use rollcall_hw::FrameSource;
use std::sync::{Arc, Mutex, MutexGuard};
use zbus::interface;

/// D-Bus interface for the kiosk daemon.
///
/// Bus name: org.rollcall.Kiosk1
/// Object path: /org/rollcall/Kiosk1
pub struct KioskService {
    config: Config,
    models: Arc<dyn ModelProvider>,
    directory: Arc<dyn OperatorDirectory>,
    attendance: Arc<dyn AttendanceRecorder>,
    notifier: Notifier,
    camera: Arc<dyn FrameSource>,
    // Lock order: session, then gallery, then roster.
    session: Mutex<Option<Arc<RecognitionSession>>>,
    gallery: Mutex<Arc<Gallery>>,
    roster: Mutex<Vec<Operator>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

impl KioskService {
    pub fn new(
        config: Config,
        models: Arc<dyn ModelProvider>,
        directory: Arc<dyn OperatorDirectory>,
        attendance: Arc<dyn AttendanceRecorder>,
        notifier: Notifier,
        camera: Arc<dyn FrameSource>,
    ) -> Self {
        Self {
            config,
            models,
            directory,
            attendance,
            notifier,
            camera,
            session: Mutex::new(None),
            gallery: Mutex::new(Arc::new(Gallery::new())),
            roster: Mutex::new(Vec::new()),
        }
    }

    /// Refetch the roster and rebuild the gallery. Returns the gallery size.
    pub async fn rebuild_gallery(&self) -> anyhow::Result<usize> {
        let operators = self.directory.list_operators().await?;
        self.rebuild_from(operators).await
    }

    /// Rebuild only when the directory's roster differs from the last one built.
    async fn refresh_if_changed(&self) -> anyhow::Result<bool> {
        let operators = self.directory.list_operators().await?;
        let unchanged = *lock(&self.roster) == operators;
        if unchanged {
            return Ok(false);
        }
        self.rebuild_from(operators).await?;
        Ok(true)
    }

    async fn rebuild_from(&self, operators: Vec<Operator>) -> anyhow::Result<usize> {
        let embedder = self.models.embedder().await?;

        let violations = validate_roster(&operators, &self.config.roster_rules());
        for v in &violations {
            tracing::warn!(violation = %v, "roster invariant violated");
        }

        let mut report =
            gallery::build_gallery(self.directory.as_ref(), embedder.as_ref(), &operators).await;
        for offender in violations.iter().filter_map(|v| v.led_offender()) {
            report.gallery.clear_led(offender);
        }

        if report.no_usable_faces() {
            let dropped: Vec<&str> = report.dropped.iter().map(|(id, _)| id.as_str()).collect();
            tracing::warn!(operators = operators.len(), ?dropped, "no usable reference faces");
        }

        let size = report.gallery.len();
        let gallery = Arc::new(report.gallery);
        let live = lock(&self.session);
        *lock(&self.gallery) = gallery.clone();
        *lock(&self.roster) = operators;
        if let Some(session) = live.as_ref() {
            session.replace_gallery(gallery);
        }
        Ok(size)
    }

    fn current_session(&self) -> Option<Arc<RecognitionSession>> {
        lock(&self.session)
            .as_ref()
            .filter(|s| s.state() != SessionState::Closed)
            .cloned()
    }

    pub fn close_current(&self) {
        if let Some(session) = lock(&self.session).take() {
            session.close();
        }
    }
}

#[interface(name = "org.rollcall.Kiosk1")]
impl KioskService {
    /// Start a recognition session. No-op if one is already open.
    async fn open_session(&self) -> zbus::fdo::Result<String> {
        if let Some(session) = self.current_session() {
            return Ok(format!("{:?}", session.state()));
        }

        let embedder = self.models.embedder().await.map_err(failed)?;
        match self.refresh_if_changed().await {
            Ok(true) => tracing::info!("roster changed; gallery rebuilt"),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "roster refresh failed; using cached gallery"),
        }

        let deps = SessionDeps {
            camera: self.camera.clone(),
            embedder,
            recorder: self.attendance.clone(),
            notifier: self.notifier.clone(),
        };

        let mut slot = lock(&self.session);
        if let Some(existing) = slot.as_ref().filter(|s| s.state() != SessionState::Closed) {
            return Ok(format!("{:?}", existing.state()));
        }
        let gallery = lock(&self.gallery).clone();
        if gallery.is_empty() {
            tracing::warn!("opening session with no usable reference faces");
        }
        let session = Arc::new(RecognitionSession::new(
            deps,
            gallery,
            self.config.match_threshold,
            self.config.detect_timeout(),
        ));
        session.check_camera();
        let state = session.state();
        *slot = Some(session);
        tracing::info!(?state, "recognition session opened");
        Ok(format!("{state:?}"))
    }

    /// Run one recognition attempt and return its outcome as JSON.
    async fn trigger(&self) -> zbus::fdo::Result<String> {
        let session = self
            .current_session()
            .ok_or_else(|| failed("no open session"))?;
        let outcome = session.trigger().await.map_err(failed)?;
        serde_json::to_string(&outcome).map_err(failed)
    }

    /// Close the current session and release the camera.
    async fn close_session(&self) -> zbus::fdo::Result<bool> {
        let had_session = lock(&self.session).is_some();
        self.close_current();
        Ok(had_session)
    }

    /// Refetch operators and rebuild the gallery.
    async fn reload_gallery(&self) -> zbus::fdo::Result<u32> {
        let size = self.rebuild_gallery().await.map_err(failed)?;
        Ok(size as u32)
    }

    /// Attendance for a date (`YYYY-MM-DD`, empty for today) as JSON.
    async fn list_attendance(&self, date: &str) -> zbus::fdo::Result<String> {
        let date = if date.is_empty() {
            chrono::Local::now().format("%Y-%m-%d").to_string()
        } else {
            date.to_string()
        };
        let records = self
            .attendance
            .list_attendance(&date)
            .await
            .map_err(failed)?;
        serde_json::to_string(&records).map_err(failed)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let models = self.models.status().await;
        let session = lock(&self.session).as_ref().map(|s| s.state());
        let gallery_size = match self.current_session() {
            Some(live) => live.gallery_size(),
            None => lock(&self.gallery).len(),
        };
        let (operators, next_led) = {
            let roster = lock(&self.roster);
            (roster.len(), next_free_led(&roster, &self.config.roster_rules()))
        };
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "line": self.config.line,
            "station": self.config.station,
            "models": models,
            "gallery_size": gallery_size,
            "operators": operators,
            "session": session,
            "channel_connected": self.notifier.is_connected(),
            "next_free_led": next_led,
        })
        .to_string())
    }
}
