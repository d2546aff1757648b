//! rollcall-core — face-identity matching for attendance.
//!
//! Face detection (SCRFD) and 128-d embeddings (SFace) run via ONNX Runtime.
//! The matching workflow enrolls and recognizes people against an injected
//! vector index and identity store.

pub mod alignment;
pub mod detector;
pub mod extract;
pub mod liveness;
pub mod memory;
pub mod recognizer;
pub mod store;
pub mod types;
pub mod validate;
pub mod workflow;

pub use detector::FaceDetector;
pub use extract::{EmbeddingProvider, ExtractError, Extraction, Extractor, FaceSelection, ProviderError};
pub use recognizer::FaceRecognizer;
pub use store::{IdentityStore, IdentityStoreError, IndexError, ObjectStore, ObjectStoreError, VectorIndex};
pub use types::{
    BoundingBox, Embedding, IdentityKey, IdentityRecord, MatchResult, Neighbor, NoMatchReason, Payload,
    Recognition, EMBEDDING_DIM,
};
pub use validate::{EnrollmentRequest, ValidationError, Validator};
pub use workflow::{Attendance, EnrollError, Enrollment, RecognizeError, DEFAULT_MATCH_THRESHOLD};

/// Default directory for ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/rollcall/models")
}
