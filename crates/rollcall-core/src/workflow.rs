//! Enrollment and recognition over injected stores.
//!
//! Enrollment writes to two independent stores. The vector entry is written
//! first; if anything after it fails the entry is deleted again, and when
//! that deletion fails too the caller receives [`EnrollError::Inconsistent`]
//! naming the key to reconcile. Nothing is retried.
//!
//! A key that passes the duplicate check but collides at insert time was
//! enrolled by a concurrent writer whose vector entry our upsert replaced.
//! That entry is deleted with ours and the caller receives
//! [`EnrollError::ConcurrentEnrollment`]: the existing record has no vector
//! until the key is re-enrolled.

use crate::extract::{encode_jpeg, ExtractError, Extractor};
use crate::store::{IdentityStore, IdentityStoreError, IndexError, ObjectStore, ObjectStoreError, VectorIndex};
use crate::types::{
    BoundingBox, IdentityKey, IdentityRecord, MatchResult, NoMatchReason, Payload, Recognition,
};
use crate::validate::{EnrollmentRequest, ValidEnrollment, ValidationError, Validator};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

/// Minimum cosine similarity for a nearest neighbor to count as a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.95;

/// Only the single best neighbor is ever considered.
const NEAREST_NEIGHBORS: usize = 1;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("identity {0} is already enrolled")]
    DuplicateIdentity(IdentityKey),
    #[error("identity {0} was enrolled concurrently; its vector entry was overwritten and removed")]
    ConcurrentEnrollment(IdentityKey),
    #[error("vector index: {0}")]
    Index(#[from] IndexError),
    #[error("identity store: {0}")]
    IdentityStore(IdentityStoreError),
    #[error("photo upload: {0}")]
    Photo(#[from] ObjectStoreError),
    #[error("photo encoding: {0}")]
    PhotoEncode(image::ImageError),
    #[error("identity {key} left inconsistent: {write}; vector rollback failed: {rollback}")]
    Inconsistent {
        key: IdentityKey,
        write: Box<EnrollError>,
        rollback: IndexError,
    },
}

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("vector index: {0}")]
    Index(#[from] IndexError),
    #[error("identity store: {0}")]
    IdentityStore(#[from] IdentityStoreError),
    #[error("identity {0} is in the vector index but has no identity record")]
    IdentityRecordMissing(IdentityKey),
}

/// A completed enrollment.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub record: IdentityRecord,
    pub face: BoundingBox,
    pub faces_detected: usize,
}

/// The face-identity matching workflow.
#[derive(Clone)]
pub struct Attendance {
    extractor: Extractor,
    index: Arc<dyn VectorIndex>,
    identities: Arc<dyn IdentityStore>,
    photos: Option<Arc<dyn ObjectStore>>,
    validator: Validator,
    threshold: f32,
}

impl Attendance {
    pub fn new(extractor: Extractor, index: Arc<dyn VectorIndex>, identities: Arc<dyn IdentityStore>) -> Self {
        Self {
            extractor,
            index,
            identities,
            photos: None,
            validator: Validator::default(),
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }

    pub fn with_photo_store(mut self, photos: Arc<dyn ObjectStore>) -> Self {
        self.photos = Some(photos);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn photo_store_kind(&self) -> Option<&'static str> {
        self.photos.as_ref().map(|p| p.kind())
    }

    /// Whether a similarity score clears the acceptance threshold.
    pub fn accepts(&self, similarity: f32) -> bool {
        similarity >= self.threshold
    }

    /// Enroll one person from one image.
    pub async fn enroll(&self, request: &EnrollmentRequest, image: Arc<RgbImage>) -> Result<Enrollment, EnrollError> {
        let valid = self.validator.validate(request)?;
        let key = valid.identity_key;

        let extraction = self.extractor.extract(image).await?;

        if self.identities.get(key).await.map_err(EnrollError::IdentityStore)?.is_some() {
            tracing::info!(%key, "enrollment rejected: identity already exists");
            return Err(EnrollError::DuplicateIdentity(key));
        }

        let photo = match self.photos {
            Some(_) => Some(encode_jpeg(&extraction.crop).map_err(EnrollError::PhotoEncode)?),
            None => None,
        };

        let mut payload = Payload::new();
        payload.insert("name".into(), valid.display_name.clone().into());
        self.index.upsert(key, &extraction.embedding, payload).await?;
        tracing::info!(%key, faces = extraction.faces_detected, "embedding upserted");

        match self.write_identity(&valid, photo).await {
            Ok(record) => {
                tracing::info!(%key, photo = ?record.photo_reference, "identity enrolled");
                Ok(Enrollment {
                    record,
                    face: extraction.face,
                    faces_detected: extraction.faces_detected,
                })
            }
            Err(write) => Err(self.roll_back_vector(key, write).await),
        }
    }

    /// Photo upload and identity insert, the steps after the vector upsert.
    async fn write_identity(&self, valid: &ValidEnrollment, photo: Option<Vec<u8>>) -> Result<IdentityRecord, EnrollError> {
        let key = valid.identity_key;
        let photo_reference = match (&self.photos, photo) {
            (Some(store), Some(jpeg)) => Some(store.upload(&format!("face_{key}"), jpeg).await?),
            _ => None,
        };

        let record = IdentityRecord {
            identity_key: key,
            display_name: valid.display_name.clone(),
            secondary_id: valid.secondary_id.clone(),
            photo_reference,
        };

        self.identities.insert(&record).await.map_err(|e| match e {
            IdentityStoreError::DuplicateKey(k) => EnrollError::ConcurrentEnrollment(k),
            other => EnrollError::IdentityStore(other),
        })?;
        Ok(record)
    }

    async fn roll_back_vector(&self, key: IdentityKey, write: EnrollError) -> EnrollError {
        tracing::warn!(%key, error = %write, "enrollment failed after vector upsert; deleting vector entry");
        match self.index.delete(key).await {
            Ok(()) => {
                if let EnrollError::ConcurrentEnrollment(_) = write {
                    tracing::error!(%key, "identity record left without vector entry; re-enrollment required");
                }
                write
            }
            Err(rollback) => {
                tracing::error!(
                    %key,
                    error = %write,
                    rollback_error = %rollback,
                    "vector entry left without identity record; reconciliation required"
                );
                EnrollError::Inconsistent {
                    key,
                    write: Box::new(write),
                    rollback,
                }
            }
        }
    }

    /// Identify the person in a probe image.
    pub async fn recognize(&self, image: Arc<RgbImage>) -> Result<Recognition, RecognizeError> {
        let extraction = match self.extractor.extract(image).await {
            Ok(extraction) => extraction,
            Err(ExtractError::NoFaceDetected) => {
                tracing::debug!("recognize: no face in probe");
                return Ok(Recognition::NoMatch(NoMatchReason::NoFaceDetected));
            }
            Err(e) => return Err(e.into()),
        };

        let neighbors = self.index.search(&extraction.embedding, NEAREST_NEIGHBORS).await?;
        let Some(best) = neighbors.into_iter().next() else {
            tracing::debug!("recognize: index returned no neighbor");
            return Ok(Recognition::NoMatch(NoMatchReason::EmptyIndex));
        };

        if !self.accepts(best.score) {
            tracing::info!(
                nearest = %best.key,
                similarity = best.score,
                threshold = self.threshold,
                "recognize: below threshold"
            );
            return Ok(Recognition::NoMatch(NoMatchReason::BelowThreshold {
                nearest: best.key,
                similarity: best.score,
            }));
        }

        let Some(record) = self.identities.get(best.key).await? else {
            tracing::error!(
                key = %best.key,
                similarity = best.score,
                "vector index entry has no identity record; stores are out of sync"
            );
            return Err(RecognizeError::IdentityRecordMissing(best.key));
        };

        tracing::info!(key = %best.key, similarity = best.score, "recognize: matched");
        Ok(Recognition::Matched(MatchResult {
            identity_key: best.key,
            similarity: best.score,
            record,
        }))
    }
}
