use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of every face embedding stored or searched by rollcall.
pub const EMBEDDING_DIM: usize = 128;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Integer pixel region `(x, y, width, height)` clipped to an image of
    /// the given size. `None` when the box lies entirely outside it.
    pub fn pixel_region(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().clamp(0.0, image_width as f32) as u32;
        let y0 = self.y.floor().clamp(0.0, image_height as f32) as u32;
        let x1 = (self.x + self.width).ceil().clamp(0.0, image_width as f32) as u32;
        let y1 = (self.y + self.height).ceil().clamp(0.0, image_height as f32) as u32;

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Face embedding vector (128-dimensional for SFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "sface_2021dec").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Zero-norm input
    /// yields 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// Identifier shared by the vector-index point and the identity record of
/// one enrolled person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(pub u64);

impl IdentityKey {
    /// Largest key every store can hold; SQLite INTEGER is signed 64-bit.
    pub const MAX: IdentityKey = IdentityKey(i64::MAX as u64);

    /// Parse a user-supplied key. Only plain ASCII digits are accepted: no
    /// sign, no whitespace, no empty string.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        raw.parse().ok().map(Self)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable identity metadata for one enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity_key: IdentityKey,
    pub display_name: String,
    /// Secondary identifier (PRN number in the attendance deployment).
    pub secondary_id: String,
    /// Where the enrollment face crop was published, if anywhere.
    pub photo_reference: Option<String>,
}

/// Free-form metadata stored next to a vector.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// One ranked result from a vector-index search.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub key: IdentityKey,
    /// Cosine similarity to the probe [-1, 1].
    pub score: f32,
    pub payload: Payload,
}

/// Accepted recognition of a probe face.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub identity_key: IdentityKey,
    /// Cosine similarity of the accepted neighbor.
    pub similarity: f32,
    pub record: IdentityRecord,
}

/// Why a recognition produced no identity.
#[derive(Debug, Clone, PartialEq)]
pub enum NoMatchReason {
    /// The probe image had no detectable face; the index was not queried.
    NoFaceDetected,
    /// The index returned no neighbor at all.
    EmptyIndex,
    /// The nearest neighbor scored below the acceptance threshold.
    BelowThreshold { nearest: IdentityKey, similarity: f32 },
}

/// Outcome of one recognition request.
#[derive(Debug, Clone)]
pub enum Recognition {
    Matched(MatchResult),
    NoMatch(NoMatchReason),
}

impl Recognition {
    pub fn matched(&self) -> Option<&MatchResult> {
        match self {
            Recognition::Matched(m) => Some(m),
            Recognition::NoMatch(_) => None,
        }
    }
}
