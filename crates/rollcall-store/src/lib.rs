//! rollcall-store — concrete adapters for the rollcall-core store traits.
//!
//! - [`QdrantIndex`]: vector index over the Qdrant REST API
//! - [`SqliteIdentityStore`]: identity records in SQLite
//! - [`CloudinaryStore`] / [`LocalDirStore`]: enrollment photo storage

pub mod cloudinary;
pub mod local;
pub mod qdrant;
pub mod sqlite;

pub use cloudinary::{CloudinaryConfig, CloudinaryStore};
pub use local::LocalDirStore;
pub use qdrant::{QdrantConfig, QdrantIndex};
pub use sqlite::SqliteIdentityStore;
