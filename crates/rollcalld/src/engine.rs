use async_trait::async_trait;
use image::GrayImage;
use rollcall_core::detector::DetectorError;
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::{Embedding, FaceDetector, FaceRecognizer};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Turns a grayscale image into the descriptor of its most confident face.
#[async_trait]
pub trait FaceEmbedder: Send + Sync {
    /// `Ok(None)` when no face is found.
    async fn describe(&self, image: GrayImage) -> Result<Option<Embedding>, EngineError>;
}

/// Hands out a ready embedder, loading models on first use.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn embedder(&self) -> Result<Arc<dyn FaceEmbedder>, EngineError>;

    /// Short human-readable model state for status reports.
    async fn status(&self) -> String;
}

/// Blocking detect+describe step run on the engine thread.
pub trait Pipeline: Send + 'static {
    fn describe(&mut self, image: &GrayImage) -> Result<Option<Embedding>, EngineError>;
}

/// SCRFD detection followed by ArcFace description.
pub struct OnnxPipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxPipeline {
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self { detector, recognizer })
    }
}

impl Pipeline for OnnxPipeline {
    fn describe(&mut self, image: &GrayImage) -> Result<Option<Embedding>, EngineError> {
        let faces = self.detector.detect(image)?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };
        if faces.len() > 1 {
            tracing::debug!(count = faces.len(), "several faces; using the most confident");
        }
        tracing::debug!(confidence = face.confidence, "face detected");
        Ok(Some(self.recognizer.describe(image, face)?))
    }
}

enum EngineRequest {
    Describe {
        image: GrayImage,
        reply: oneshot::Sender<Result<Option<Embedding>, EngineError>>,
    },
    Shutdown,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Ask the engine thread to exit once queued requests are served.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(EngineRequest::Shutdown).await;
    }
}

#[async_trait]
impl FaceEmbedder for EngineHandle {
    async fn describe(&self, image: GrayImage) -> Result<Option<Embedding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Describe { image, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Run `pipeline` on a dedicated OS thread and return a handle to it.
pub fn spawn_engine<P: Pipeline>(mut pipeline: P) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Describe { image, reply } => {
                        let result = pipeline.describe(&image);
                        // Receiver gone means the caller timed out or tore down.
                        let _ = reply.send(result);
                    }
                    EngineRequest::Shutdown => break,
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(|e| EngineError::ModelLoad(format!("failed to spawn engine thread: {e}")))?;

    Ok(EngineHandle { tx })
}

enum ModelState {
    Unloaded,
    Ready(EngineHandle),
    Failed(String),
}

/// Owns model loading and the engine thread lifecycle.
///
/// `load()` is idempotent. A failed load is remembered and returned to every
/// later caller until `teardown()`.
pub struct ModelService {
    scrfd_path: String,
    arcface_path: String,
    state: Mutex<ModelState>,
}

impl ModelService {
    pub fn new(scrfd_path: String, arcface_path: String) -> Self {
        Self {
            scrfd_path,
            arcface_path,
            state: Mutex::new(ModelState::Unloaded),
        }
    }

    pub async fn load(&self) -> Result<EngineHandle, EngineError> {
        let mut state = self.state.lock().await;
        match &*state {
            ModelState::Ready(handle) => return Ok(handle.clone()),
            ModelState::Failed(reason) => return Err(EngineError::ModelLoad(reason.clone())),
            ModelState::Unloaded => {}
        }

        let (scrfd, arcface) = (self.scrfd_path.clone(), self.arcface_path.clone());
        let loaded = tokio::task::spawn_blocking(move || {
            let pipeline = OnnxPipeline::load(&scrfd, &arcface)?;
            spawn_engine(pipeline)
        })
        .await
        .map_err(|e| EngineError::ModelLoad(format!("load task failed: {e}")))
        .and_then(|r| r);

        match loaded {
            Ok(handle) => {
                tracing::info!(
                    scrfd = %self.scrfd_path,
                    arcface = %self.arcface_path,
                    "models loaded"
                );
                *state = ModelState::Ready(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(error = %reason, "model load failed");
                *state = ModelState::Failed(reason.clone());
                Err(EngineError::ModelLoad(reason))
            }
        }
    }

    /// Stop the engine thread and forget any cached failure.
    pub async fn teardown(&self) {
        let previous = std::mem::replace(&mut *self.state.lock().await, ModelState::Unloaded);
        if let ModelState::Ready(handle) = previous {
            handle.shutdown().await;
            tracing::info!("models unloaded");
        }
    }

}

#[async_trait]
impl ModelProvider for ModelService {
    async fn embedder(&self) -> Result<Arc<dyn FaceEmbedder>, EngineError> {
        Ok(Arc::new(self.load().await?))
    }

    async fn status(&self) -> String {
        match &*self.state.lock().await {
            ModelState::Unloaded => "unloaded".into(),
            ModelState::Ready(_) => "ready".into(),
            ModelState::Failed(reason) => format!("failed: {reason}"),
        }
    }
}
