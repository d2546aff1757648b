use anyhow::{Context, Result};
use rollcall_core::memory::{MemoryIdentityStore, MemoryVectorIndex};
use rollcall_core::{Attendance, Extractor, IdentityStore, ObjectStore, Validator, VectorIndex};
use rollcall_store::{CloudinaryConfig, CloudinaryStore, LocalDirStore, QdrantConfig, QdrantIndex, SqliteIdentityStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

use config::{Backend, Config, PhotoStoreKind};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(listen = %config.listen, backend = ?config.backend, "rollcalld starting");

    let engine = engine::spawn_engine(&config.scrfd_model_path(), &config.sface_model_path())
        .context("failed to start inference engine")?;

    let (index, identities) = open_stores(&config).await?;
    let validator = Validator::new(&config.secondary_id_pattern)
        .with_context(|| format!("invalid secondary id pattern {:?}", config.secondary_id_pattern))?;

    let mut attendance = Attendance::new(Extractor::new(Arc::new(engine), config.face_policy), index, identities)
        .with_validator(validator)
        .with_threshold(config.match_threshold);
    if let Some(photos) = photo_store(&config)? {
        attendance = attendance.with_photo_store(photos);
    }

    let state = http::AppState {
        attendance,
        capture: Arc::new(http::CaptureSettings {
            device: config.camera_device.clone(),
            warmup_frames: config.warmup_frames,
            dir: config.capture_dir.clone(),
        }),
        collection: config.collection.clone(),
        backend: match config.backend {
            Backend::Persistent => "persistent",
            Backend::Memory => "memory",
        },
    };

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(
        listen = %config.listen,
        threshold = config.match_threshold,
        policy = config.face_policy.as_str(),
        "rollcalld ready"
    );

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("rollcalld shutting down");
        })
        .await?;

    Ok(())
}

async fn open_stores(config: &Config) -> Result<(Arc<dyn VectorIndex>, Arc<dyn IdentityStore>)> {
    match config.backend {
        Backend::Memory => {
            tracing::warn!("in-memory stores: enrollments are lost on exit");
            let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new());
            let identities: Arc<dyn IdentityStore> = Arc::new(MemoryIdentityStore::new());
            Ok((index, identities))
        }
        Backend::Persistent => {
            let index = QdrantIndex::new(QdrantConfig {
                url: config.qdrant_url.clone(),
                api_key: config.qdrant_api_key.clone(),
                collection: config.collection.clone(),
            })?;
            index
                .ensure_collection()
                .await
                .with_context(|| format!("qdrant at {} unavailable", config.qdrant_url))?;

            if let Some(parent) = config.db_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let identities = SqliteIdentityStore::open(&config.db_path)
                .await
                .with_context(|| format!("failed to open {}", config.db_path.display()))?;
            tracing::info!(db = %config.db_path.display(), collection = %config.collection, "stores opened");

            let index: Arc<dyn VectorIndex> = Arc::new(index);
            let identities: Arc<dyn IdentityStore> = Arc::new(identities);
            Ok((index, identities))
        }
    }
}

fn photo_store(config: &Config) -> Result<Option<Arc<dyn ObjectStore>>> {
    let store: Arc<dyn ObjectStore> = match config.photo_store {
        PhotoStoreKind::None => return Ok(None),
        PhotoStoreKind::Local => Arc::new(LocalDirStore::new(&config.photo_dir)),
        PhotoStoreKind::Cloudinary => {
            let c = &config.cloudinary;
            anyhow::ensure!(
                !c.cloud_name.is_empty() && !c.api_key.is_empty() && !c.api_secret.is_empty(),
                "cloudinary photo store needs CLOUDINARY_CLOUD_NAME, CLOUDINARY_API_KEY and CLOUDINARY_API_SECRET"
            );
            Arc::new(CloudinaryStore::new(CloudinaryConfig {
                cloud_name: c.cloud_name.clone(),
                api_key: c.api_key.clone(),
                api_secret: c.api_secret.clone(),
                folder: c.folder.clone(),
            })?)
        }
    };
    tracing::info!(kind = store.kind(), "photo store configured");
    Ok(Some(store))
}
