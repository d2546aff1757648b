use image::RgbImage;
use rollcall_core::{BoundingBox, Embedding, EmbeddingProvider, FaceDetector, FaceRecognizer, ProviderError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] rollcall_core::recognizer::RecognizerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<EngineError> for ProviderError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Detector(e) => ProviderError::Detector(e),
            EngineError::Recognizer(e) => ProviderError::Recognizer(e),
            other => ProviderError::Unavailable(other.to_string()),
        }
    }
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Detect {
        image: Arc<RgbImage>,
        reply: oneshot::Sender<Result<Vec<BoundingBox>, EngineError>>,
    },
    Embed {
        image: Arc<RgbImage>,
        face: BoundingBox,
        reply: oneshot::Sender<Result<Embedding, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for EngineHandle {
    async fn detect(&self, image: Arc<RgbImage>) -> Result<Vec<BoundingBox>, ProviderError> {
        Ok(self.request(|reply| EngineRequest::Detect { image, reply }).await?)
    }

    async fn embed(&self, image: Arc<RgbImage>, face: BoundingBox) -> Result<Embedding, ProviderError> {
        Ok(self.request(|reply| EngineRequest::Embed { image, face, reply }).await?)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models, then serves detect/embed requests one at a time.
/// Fails fast at startup if a model is missing.
pub fn spawn_engine(scrfd_path: &str, sface_path: &str) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(scrfd_path)?;
    tracing::info!(path = scrfd_path, "SCRFD detector loaded");

    let mut recognizer = FaceRecognizer::load(sface_path)?;
    tracing::info!(path = sface_path, "SFace recognizer loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, reply } => {
                        let result = detector.detect(&image).map_err(EngineError::from);
                        if let Ok(faces) = &result {
                            tracing::debug!(faces = faces.len(), "engine: detect");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Embed { image, face, reply } => {
                        let result = recognizer.extract(&image, &face).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
