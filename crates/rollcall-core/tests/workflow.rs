//! Enrollment / recognition against in-memory stores and a fixture provider.

use image::{Rgb, RgbImage};
use rollcall_core::memory::{MemoryIdentityStore, MemoryObjectStore, MemoryVectorIndex};
use rollcall_core::{
    Attendance, BoundingBox, EmbeddingProvider, Embedding, EnrollError, EnrollmentRequest, ExtractError,
    Extractor, FaceSelection, IdentityKey, IdentityRecord, IdentityStore, IdentityStoreError, IndexError,
    Neighbor, NoMatchReason, ObjectStore, ObjectStoreError, Payload, ProviderError, Recognition,
    RecognizeError, ValidationError, VectorIndex, EMBEDDING_DIM,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixture images encode their content in pixel (0, 0):
/// red = person tag, green = number of faces. Face `i` sits at x = 16·i and
/// embeds as the unit vector on axis `tag + i`.
#[derive(Default)]
struct FixtureProvider {
    detect_calls: AtomicUsize,
}

fn person(tag: u8, faces: u8) -> Arc<RgbImage> {
    let mut image = RgbImage::from_pixel(64, 32, Rgb([200, 180, 160]));
    image.put_pixel(0, 0, Rgb([tag, faces, 0]));
    Arc::new(image)
}

fn unit(axis: usize) -> Embedding {
    let mut values = vec![0.0; EMBEDDING_DIM];
    values[axis % EMBEDDING_DIM] = 1.0;
    Embedding::new(values)
}

#[async_trait::async_trait]
impl EmbeddingProvider for FixtureProvider {
    async fn detect(&self, image: Arc<RgbImage>) -> Result<Vec<BoundingBox>, ProviderError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        let [_, faces, _] = image.get_pixel(0, 0).0;
        Ok((0..faces)
            .map(|i| BoundingBox {
                x: 16.0 * i as f32,
                y: 4.0,
                width: 12.0 + i as f32,
                height: 12.0,
                confidence: 0.99,
                landmarks: None,
            })
            .collect())
    }

    async fn embed(&self, image: Arc<RgbImage>, face: BoundingBox) -> Result<Embedding, ProviderError> {
        let [tag, _, _] = image.get_pixel(0, 0).0;
        let index = (face.x / 16.0) as usize;
        Ok(unit(tag as usize + index))
    }
}

struct Harness {
    provider: Arc<FixtureProvider>,
    index: Arc<MemoryVectorIndex>,
    identities: Arc<MemoryIdentityStore>,
    photos: Arc<MemoryObjectStore>,
    attendance: Attendance,
}

fn harness() -> Harness {
    harness_with(FaceSelection::FirstDetectedFace)
}

fn harness_with(policy: FaceSelection) -> Harness {
    let provider = Arc::new(FixtureProvider::default());
    let index = Arc::new(MemoryVectorIndex::new());
    let identities = Arc::new(MemoryIdentityStore::new());
    let photos = Arc::new(MemoryObjectStore::new());
    let attendance = Attendance::new(Extractor::new(provider.clone(), policy), index.clone(), identities.clone())
        .with_photo_store(photos.clone());
    Harness {
        provider,
        index,
        identities,
        photos,
        attendance,
    }
}

fn request(user_id: &str, name: &str, prn: &str) -> EnrollmentRequest {
    EnrollmentRequest {
        user_id: user_id.into(),
        display_name: name.into(),
        secondary_id: prn.into(),
    }
}

#[tokio::test]
async fn enroll_then_recognize_same_image() {
    let h = harness();
    let image_a = person(10, 1);

    let enrolled = h.attendance.enroll(&request("42", "Om", "123"), image_a.clone()).await.unwrap();
    assert_eq!(enrolled.record.identity_key, IdentityKey(42));
    assert!(enrolled.record.photo_reference.is_some());
    assert_eq!(h.photos.len(), 1);

    let recognition = h.attendance.recognize(image_a).await.unwrap();
    let matched = recognition.matched().expect("same image must match");
    assert_eq!(matched.identity_key, IdentityKey(42));
    assert!((matched.similarity - 1.0).abs() < 1e-6);
    assert!(h.attendance.accepts(matched.similarity));
    assert_eq!(matched.record.display_name, "Om");
    assert_eq!(matched.record.secondary_id, "123");
}

#[tokio::test]
async fn unrelated_face_is_no_match() {
    let h = harness();
    h.attendance.enroll(&request("42", "Om", "123"), person(10, 1)).await.unwrap();

    let recognition = h.attendance.recognize(person(70, 1)).await.unwrap();
    match recognition {
        Recognition::NoMatch(NoMatchReason::BelowThreshold { nearest, similarity }) => {
            assert_eq!(nearest, IdentityKey(42));
            assert!(similarity < h.attendance.threshold());
        }
        other => panic!("expected below-threshold no-match, got {other:?}"),
    }
}

#[tokio::test]
async fn no_face_probe_skips_index() {
    let h = harness();
    h.attendance.enroll(&request("42", "Om", "123"), person(10, 1)).await.unwrap();

    let recognition = h.attendance.recognize(person(10, 0)).await.unwrap();
    assert!(matches!(recognition, Recognition::NoMatch(NoMatchReason::NoFaceDetected)));
    assert_eq!(h.index.search_count(), 0);
}

#[tokio::test]
async fn empty_index_is_no_match() {
    let h = harness();
    let recognition = h.attendance.recognize(person(10, 1)).await.unwrap();
    assert!(matches!(recognition, Recognition::NoMatch(NoMatchReason::EmptyIndex)));
    assert_eq!(h.index.search_count(), 1);
}

#[tokio::test]
async fn enroll_without_face_writes_nothing() {
    let h = harness();
    let err = h.attendance.enroll(&request("42", "Om", "123"), person(10, 0)).await.unwrap_err();
    assert!(matches!(err, EnrollError::Extract(ExtractError::NoFaceDetected)));
    assert!(h.index.is_empty());
    assert!(h.identities.is_empty());
    assert!(h.photos.is_empty());
}

#[tokio::test]
async fn invalid_input_never_reaches_provider_or_stores() {
    let h = harness();
    let cases = [
        request("abc", "Om", "123"),
        request("42", "", "123"),
        request("42", "Om", "12"),
        request("9223372036854775808", "Om", "123"),
    ];
    for req in &cases {
        let err = h.attendance.enroll(req, person(10, 1)).await.unwrap_err();
        assert!(matches!(err, EnrollError::Validation(_)), "{req:?} → {err:?}");
    }
    assert_eq!(h.provider.detect_calls.load(Ordering::SeqCst), 0);
    assert!(h.index.is_empty());
    assert!(h.identities.is_empty());
}

#[tokio::test]
async fn validation_error_names_the_field() {
    let h = harness();
    let err = h.attendance.enroll(&request("4 2", "Om", "123"), person(10, 1)).await.unwrap_err();
    assert!(matches!(err, EnrollError::Validation(ValidationError::NonNumericKey(ref k)) if k == "4 2"));
}

#[tokio::test]
async fn duplicate_enrollment_keeps_first_pairing() {
    let h = harness();
    h.attendance.enroll(&request("42", "Om", "123"), person(10, 1)).await.unwrap();

    let err = h.attendance.enroll(&request("42", "Impostor", "456"), person(80, 1)).await.unwrap_err();
    assert!(matches!(err, EnrollError::DuplicateIdentity(IdentityKey(42))));

    assert_eq!(h.index.len(), 1);
    assert_eq!(h.index.get(IdentityKey(42)), Some(unit(10)));
    let stored = h.identities.get(IdentityKey(42)).await.unwrap().unwrap();
    assert_eq!(stored.display_name, "Om");
}

#[tokio::test]
async fn stale_vector_surfaces_missing_record() {
    let h = harness();
    h.index.upsert(IdentityKey(7), &unit(10), Payload::new()).await.unwrap();

    let err = h.attendance.recognize(person(10, 1)).await.unwrap_err();
    assert!(matches!(err, RecognizeError::IdentityRecordMissing(IdentityKey(7))));
}

#[tokio::test]
async fn threshold_is_inclusive() {
    let h = harness();
    let attendance = h.attendance.clone().with_threshold(1.0);
    attendance.enroll(&request("5", "Ana", "001"), person(3, 1)).await.unwrap();
    let recognition = attendance.recognize(person(3, 1)).await.unwrap();
    assert_eq!(recognition.matched().map(|m| m.identity_key), Some(IdentityKey(5)));
}

#[tokio::test]
async fn first_detected_face_policy() {
    let h = harness_with(FaceSelection::FirstDetectedFace);
    let enrolled = h.attendance.enroll(&request("1", "Group", "100"), person(20, 3)).await.unwrap();
    assert_eq!(enrolled.faces_detected, 3);
    assert_eq!(enrolled.face.x, 0.0);
    assert_eq!(h.index.get(IdentityKey(1)), Some(unit(20)));
}

#[tokio::test]
async fn largest_face_policy() {
    let h = harness_with(FaceSelection::LargestFace);
    h.attendance.enroll(&request("1", "Group", "100"), person(20, 3)).await.unwrap();
    // Face 2 has the widest box
    assert_eq!(h.index.get(IdentityKey(1)), Some(unit(22)));
}

// --- Partial-failure compensation ---

struct RejectingIdentityStore;

#[async_trait::async_trait]
impl IdentityStore for RejectingIdentityStore {
    async fn insert(&self, _record: &IdentityRecord) -> Result<(), IdentityStoreError> {
        Err(IdentityStoreError::Backend("connection reset".into()))
    }

    async fn get(&self, _key: IdentityKey) -> Result<Option<IdentityRecord>, IdentityStoreError> {
        Ok(None)
    }
}

/// Reports the key free, then loses the insert to another writer.
struct RacingIdentityStore;

#[async_trait::async_trait]
impl IdentityStore for RacingIdentityStore {
    async fn insert(&self, record: &IdentityRecord) -> Result<(), IdentityStoreError> {
        Err(IdentityStoreError::DuplicateKey(record.identity_key))
    }

    async fn get(&self, _key: IdentityKey) -> Result<Option<IdentityRecord>, IdentityStoreError> {
        Ok(None)
    }
}

struct UndeletableIndex(MemoryVectorIndex);

#[async_trait::async_trait]
impl VectorIndex for UndeletableIndex {
    async fn upsert(&self, key: IdentityKey, embedding: &Embedding, payload: Payload) -> Result<(), IndexError> {
        self.0.upsert(key, embedding, payload).await
    }

    async fn search(&self, probe: &Embedding, top_k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.0.search(probe, top_k).await
    }

    async fn delete(&self, _key: IdentityKey) -> Result<(), IndexError> {
        Err(IndexError::Request("index unreachable".into()))
    }
}

struct BrokenObjectStore;

#[async_trait::async_trait]
impl ObjectStore for BrokenObjectStore {
    async fn upload(&self, _name_hint: &str, _jpeg: Vec<u8>) -> Result<String, ObjectStoreError> {
        Err(ObjectStoreError::Upload("HTTP 503".into()))
    }

    fn kind(&self) -> &'static str {
        "broken"
    }
}

#[tokio::test]
async fn failed_identity_insert_rolls_back_vector() {
    let provider = Arc::new(FixtureProvider::default());
    let index = Arc::new(MemoryVectorIndex::new());
    let attendance = Attendance::new(
        Extractor::new(provider, FaceSelection::default()),
        index.clone(),
        Arc::new(RejectingIdentityStore),
    );

    let err = attendance.enroll(&request("42", "Om", "123"), person(10, 1)).await.unwrap_err();
    assert!(matches!(err, EnrollError::IdentityStore(IdentityStoreError::Backend(_))));
    assert!(index.is_empty(), "vector entry must be removed again");
}

#[tokio::test]
async fn insert_time_duplicate_is_reported_as_concurrent() {
    let provider = Arc::new(FixtureProvider::default());
    let index = Arc::new(MemoryVectorIndex::new());
    // The other writer's vector for key 42
    index.upsert(IdentityKey(42), &unit(10), Payload::new()).await.unwrap();
    let attendance = Attendance::new(
        Extractor::new(provider, FaceSelection::default()),
        index.clone(),
        Arc::new(RacingIdentityStore),
    );

    let err = attendance.enroll(&request("42", "Impostor", "456"), person(80, 1)).await.unwrap_err();
    assert!(matches!(err, EnrollError::ConcurrentEnrollment(IdentityKey(42))), "{err:?}");
    assert!(!matches!(err, EnrollError::DuplicateIdentity(_)));
    // Our embedding must not stay paired with the other writer's record
    assert_eq!(index.get(IdentityKey(42)), None);
}

#[tokio::test]
async fn insert_time_duplicate_with_failed_rollback_is_inconsistent() {
    let provider = Arc::new(FixtureProvider::default());
    let index = Arc::new(UndeletableIndex(MemoryVectorIndex::new()));
    let attendance = Attendance::new(
        Extractor::new(provider, FaceSelection::default()),
        index.clone(),
        Arc::new(RacingIdentityStore),
    );

    let err = attendance.enroll(&request("42", "Om", "123"), person(10, 1)).await.unwrap_err();
    match err {
        EnrollError::Inconsistent { key, write, .. } => {
            assert_eq!(key, IdentityKey(42));
            assert!(matches!(*write, EnrollError::ConcurrentEnrollment(IdentityKey(42))));
        }
        other => panic!("expected inconsistency, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_photo_upload_rolls_back_vector() {
    let provider = Arc::new(FixtureProvider::default());
    let index = Arc::new(MemoryVectorIndex::new());
    let identities = Arc::new(MemoryIdentityStore::new());
    let attendance = Attendance::new(
        Extractor::new(provider, FaceSelection::default()),
        index.clone(),
        identities.clone(),
    )
    .with_photo_store(Arc::new(BrokenObjectStore));

    let err = attendance.enroll(&request("42", "Om", "123"), person(10, 1)).await.unwrap_err();
    assert!(matches!(err, EnrollError::Photo(_)));
    assert!(index.is_empty());
    assert!(identities.is_empty());
}

#[tokio::test]
async fn failed_rollback_reports_inconsistency() {
    let provider = Arc::new(FixtureProvider::default());
    let index = Arc::new(UndeletableIndex(MemoryVectorIndex::new()));
    let attendance = Attendance::new(
        Extractor::new(provider, FaceSelection::default()),
        index.clone(),
        Arc::new(RejectingIdentityStore),
    );

    let err = attendance.enroll(&request("42", "Om", "123"), person(10, 1)).await.unwrap_err();
    match err {
        EnrollError::Inconsistent { key, write, rollback } => {
            assert_eq!(key, IdentityKey(42));
            assert!(matches!(*write, EnrollError::IdentityStore(_)));
            assert!(matches!(rollback, IndexError::Request(_)));
        }
        other => panic!("expected inconsistency, got {other:?}"),
    }
    assert_eq!(index.0.len(), 1);
}
