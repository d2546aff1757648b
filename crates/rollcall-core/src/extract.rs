//! Embedding extraction: one decoded image in, one face embedding out.

use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::{BoundingBox, Embedding, EMBEDDING_DIM};
use image::{imageops, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

/// Face detection and embedding capability.
///
/// Implementations must be safe for concurrent use; the daemon's
/// implementation forwards to a single inference thread.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// All faces in the image, in the provider's own order.
    async fn detect(&self, image: Arc<RgbImage>) -> Result<Vec<BoundingBox>, ProviderError>;

    /// Embedding of one face previously returned by [`detect`](Self::detect).
    async fn embed(&self, image: Arc<RgbImage>, face: BoundingBox) -> Result<Embedding, ProviderError>;
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No face detected")]
    NoFaceDetected,
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("provider returned a {actual}-dim embedding, expected {EMBEDDING_DIM}")]
    Dimension { actual: usize },
}

/// Which face to use when an image contains several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceSelection {
    /// The first face the provider reports, no ranking.
    #[default]
    #[serde(alias = "first")]
    FirstDetectedFace,
    /// The face with the largest bounding-box area.
    #[serde(alias = "largest")]
    LargestFace,
}

impl FaceSelection {
    pub fn select<'a>(&self, faces: &'a [BoundingBox]) -> Option<&'a BoundingBox> {
        match self {
            FaceSelection::FirstDetectedFace => faces.first(),
            FaceSelection::LargestFace => faces.iter().max_by(|a, b| a.area().total_cmp(&b.area())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FaceSelection::FirstDetectedFace => "first",
            FaceSelection::LargestFace => "largest",
        }
    }
}

impl FromStr for FaceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" | "first_detected_face" => Ok(FaceSelection::FirstDetectedFace),
            "largest" | "largest_face" => Ok(FaceSelection::LargestFace),
            other => Err(format!("unknown face selection policy: {other}")),
        }
    }
}

/// A face embedding plus the region it came from.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub embedding: Embedding,
    pub face: BoundingBox,
    /// Pixels inside `face`, kept for audit or photo upload.
    pub crop: RgbImage,
    pub faces_detected: usize,
}

/// Runs a provider under a face-selection policy.
#[derive(Clone)]
pub struct Extractor {
    provider: Arc<dyn EmbeddingProvider>,
    policy: FaceSelection,
}

impl Extractor {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: FaceSelection) -> Self {
        Self { provider, policy }
    }

    pub fn policy(&self) -> FaceSelection {
        self.policy
    }

    /// Detect, select one face, embed it.
    pub async fn extract(&self, image: Arc<RgbImage>) -> Result<Extraction, ExtractError> {
        let faces = self.provider.detect(image.clone()).await?;
        let face = self.policy.select(&faces).cloned().ok_or(ExtractError::NoFaceDetected)?;

        if faces.len() > 1 {
            tracing::debug!(
                faces = faces.len(),
                policy = self.policy.as_str(),
                "multiple faces detected; using policy selection"
            );
        }

        // A box clipped away entirely carries no pixels to embed.
        let Some((x, y, w, h)) = face.pixel_region(image.width(), image.height()) else {
            return Err(ExtractError::NoFaceDetected);
        };
        let crop = imageops::crop_imm(image.as_ref(), x, y, w, h).to_image();

        let embedding = self.provider.embed(image, face.clone()).await?;
        if embedding.dim() != EMBEDDING_DIM {
            return Err(ExtractError::Dimension { actual: embedding.dim() });
        }

        Ok(Extraction {
            embedding,
            face,
            crop,
            faces_detected: faces.len(),
        })
    }
}

/// Decode an uploaded image (any format the `image` crate knows) to RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ExtractError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}
