//! SQLite identity store.

use chrono::Utc;
use rollcall_core::{IdentityKey, IdentityRecord, IdentityStore, IdentityStoreError};
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::path::Path;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    identity_key    INTEGER PRIMARY KEY,
    display_name    TEXT NOT NULL,
    secondary_id    TEXT NOT NULL,
    photo_reference TEXT,
    created_at      TEXT NOT NULL
);
";

pub struct SqliteIdentityStore {
    conn: Connection,
}

fn backend(e: impl std::fmt::Display) -> IdentityStoreError {
    IdentityStoreError::Backend(e.to_string())
}

fn sql_key(key: IdentityKey) -> Result<i64, IdentityStoreError> {
    i64::try_from(key.0).map_err(|_| IdentityStoreError::Backend(format!("identity key {key} exceeds INTEGER range")))
}

impl SqliteIdentityStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IdentityStoreError> {
        let conn = Connection::open(path.as_ref()).await.map_err(backend)?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, IdentityStoreError> {
        let conn = Connection::open_in_memory().await.map_err(backend)?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, IdentityStoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(backend)?;
        Ok(Self { conn })
    }

    pub async fn count(&self) -> Result<usize, IdentityStoreError> {
        self.conn
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
                Ok(n as usize)
            })
            .await
            .map_err(backend)
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

#[async_trait::async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn insert(&self, record: &IdentityRecord) -> Result<(), IdentityStoreError> {
        let key = sql_key(record.identity_key)?;
        let record = record.clone();
        let created_at = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO identities (identity_key, display_name, secondary_id, photo_reference, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![key, record.display_name, record.secondary_id, record.photo_reference, created_at],
                );
                match result {
                    Ok(_) => Ok(true),
                    Err(e) if is_constraint_violation(&e) => Ok(false),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(backend)?;

        if !inserted {
            return Err(IdentityStoreError::DuplicateKey(IdentityKey(key as u64)));
        }
        tracing::debug!(key, "identity row inserted");
        Ok(())
    }

    async fn get(&self, key: IdentityKey) -> Result<Option<IdentityRecord>, IdentityStoreError> {
        let Ok(sql_key) = sql_key(key) else {
            return Ok(None);
        };
        self.conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        "SELECT display_name, secondary_id, photo_reference FROM identities WHERE identity_key = ?1",
                        params![sql_key],
                        |row| {
                            Ok(IdentityRecord {
                                identity_key: key,
                                display_name: row.get(0)?,
                                secondary_id: row.get(1)?,
                                photo_reference: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: u64, name: &str) -> IdentityRecord {
        IdentityRecord {
            identity_key: IdentityKey(key),
            display_name: name.into(),
            secondary_id: "123".into(),
            photo_reference: Some(format!("/var/lib/rollcall/photos/face_{key}.jpg")),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteIdentityStore::open_in_memory().await.unwrap();
        store.insert(&record(42, "Om")).await.unwrap();

        assert_eq!(store.get(IdentityKey(42)).await.unwrap(), Some(record(42, "Om")));
        assert_eq!(store.get(IdentityKey(43)).await.unwrap(), None);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_keeps_first_record() {
        let store = SqliteIdentityStore::open_in_memory().await.unwrap();
        store.insert(&record(42, "Om")).await.unwrap();

        let err = store.insert(&record(42, "Other")).await.unwrap_err();
        assert!(matches!(err, IdentityStoreError::DuplicateKey(IdentityKey(42))));
        assert_eq!(store.get(IdentityKey(42)).await.unwrap().unwrap().display_name, "Om");
    }

    #[tokio::test]
    async fn test_null_photo_reference() {
        let store = SqliteIdentityStore::open_in_memory().await.unwrap();
        let mut r = record(5, "Ana");
        r.photo_reference = None;
        store.insert(&r).await.unwrap();
        assert_eq!(store.get(IdentityKey(5)).await.unwrap().unwrap().photo_reference, None);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.db");
        {
            let store = SqliteIdentityStore::open(&path).await.unwrap();
            store.insert(&record(9, "Lee")).await.unwrap();
        }
        let store = SqliteIdentityStore::open(&path).await.unwrap();
        assert_eq!(store.get(IdentityKey(9)).await.unwrap().unwrap().display_name, "Lee");
    }

    #[tokio::test]
    async fn test_out_of_range_key() {
        let store = SqliteIdentityStore::open_in_memory().await.unwrap();
        let err = store.insert(&record(u64::MAX, "Big")).await.unwrap_err();
        assert!(matches!(err, IdentityStoreError::Backend(_)));
        assert_eq!(store.get(IdentityKey(u64::MAX)).await.unwrap(), None);
    }
}
