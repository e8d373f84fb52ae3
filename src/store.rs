//! Persistence for image link records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Error;
use crate::fingerprint::{Algorithm, Fingerprints};

/// One persisted record per distinct image content. Fingerprints and
/// metadata are immutable after creation; only `url` and `updated_at`
/// change, on re-link of the same content.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
pub struct ImageRecord {
    pub id: Uuid,
    pub filename: String,
    pub url: String,
    pub content_checksum: String,
    pub ahash: String,
    pub phash: String,
    pub dhash: String,
    pub whash: String,
    pub content_type: String,
    pub file_size: i64,
    pub width: i32,
    pub height: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn code(&self, algorithm: Algorithm) -> &str {
        match algorithm {
            Algorithm::Average => &self.ahash,
            Algorithm::Perceptual => &self.phash,
            Algorithm::Difference => &self.dhash,
            Algorithm::Wavelet => &self.whash,
        }
    }

    pub fn fingerprints(&self) -> Fingerprints {
        Fingerprints {
            ahash: self.ahash.clone(),
            phash: self.phash.clone(),
            dhash: self.dhash.clone(),
            whash: self.whash.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same checksum already exists; nothing was written.
    DuplicateChecksum,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_checksum(&self, checksum: &str) -> Result<Option<ImageRecord>, Error>;

    /// Insert a new record. Returns `DuplicateChecksum` (writing nothing)
    /// when the content checksum is already present, so concurrent links of
    /// the same new content cannot produce two records.
    async fn insert(&self, record: &ImageRecord) -> Result<InsertOutcome, Error>;

    /// Point the record with this checksum at a new URL, stamping
    /// `updated_at`. Returns the record id, or `None` if no record matches.
    async fn update_url(
        &self,
        checksum: &str,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Uuid>, Error>;

    /// Records in insertion order (`created_at`, then `id`), capped at
    /// `limit`.
    async fn list(&self, limit: usize) -> Result<Vec<ImageRecord>, Error>;

    /// Delete by id; `false` if the id was unknown.
    async fn delete(&self, id: Uuid) -> Result<bool, Error>;
}

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!("database connected and migrations applied");
    Ok(pool)
}

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_by_checksum(&self, checksum: &str) -> Result<Option<ImageRecord>, Error> {
        let record = sqlx::query_as::<_, ImageRecord>(
            "SELECT * FROM image_links WHERE content_checksum = $1",
        )
        .bind(checksum)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn insert(&self, record: &ImageRecord) -> Result<InsertOutcome, Error> {
        let result = sqlx::query(
            "INSERT INTO image_links \
             (id, filename, url, content_checksum, ahash, phash, dhash, whash, \
              content_type, file_size, width, height, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (content_checksum) DO NOTHING",
        )
        .bind(record.id)
        .bind(&record.filename)
        .bind(&record.url)
        .bind(&record.content_checksum)
        .bind(&record.ahash)
        .bind(&record.phash)
        .bind(&record.dhash)
        .bind(&record.whash)
        .bind(&record.content_type)
        .bind(record.file_size)
        .bind(record.width)
        .bind(record.height)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::DuplicateChecksum)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn update_url(
        &self,
        checksum: &str,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Uuid>, Error> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "UPDATE image_links SET url = $2, updated_at = $3 \
             WHERE content_checksum = $1 RETURNING id",
        )
        .bind(checksum)
        .bind(url)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn list(&self, limit: usize) -> Result<Vec<ImageRecord>, Error> {
        let records = sqlx::query_as::<_, ImageRecord>(
            "SELECT * FROM image_links ORDER BY created_at, id LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM image_links WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// In-process store with the same contract as [`PgRecordStore`]. Backs the
/// service tests; insertion order doubles as iteration order.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<ImageRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_by_checksum(&self, checksum: &str) -> Result<Option<ImageRecord>, Error> {
        Ok(self
            .records
            .lock()
            .iter()
            .find(|r| r.content_checksum == checksum)
            .cloned())
    }

    async fn insert(&self, record: &ImageRecord) -> Result<InsertOutcome, Error> {
        let mut records = self.records.lock();
        if records
            .iter()
            .any(|r| r.content_checksum == record.content_checksum)
        {
            return Ok(InsertOutcome::DuplicateChecksum);
        }
        records.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn update_url(
        &self,
        checksum: &str,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Uuid>, Error> {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.content_checksum == checksum) {
            Some(record) => {
                record.url = url.to_string();
                record.updated_at = at;
                Ok(Some(record.id))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<ImageRecord>, Error> {
        Ok(self.records.lock().iter().take(limit).cloned().collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, Error> {
        let mut records = self.records.lock();
        match records.iter().position(|r| r.id == id) {
            Some(index) => {
                records.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(checksum: &str, url: &str) -> ImageRecord {
        let now = Utc::now();
        ImageRecord {
            id: Uuid::new_v4(),
            filename: "photo.png".into(),
            url: url.into(),
            content_checksum: checksum.into(),
            ahash: "0000000000000000".into(),
            phash: "0000000000000000".into(),
            dhash: "0000000000000000".into(),
            whash: "0000000000000000".into(),
            content_type: "image/png".into(),
            file_size: 123,
            width: 10,
            height: 10,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_then_find() {
        let store = MemoryRecordStore::new();
        let rec = record("abc", "https://example.com");
        assert_eq!(store.insert(&rec).await.unwrap(), InsertOutcome::Inserted);

        let found = store.find_by_checksum("abc").await.unwrap().unwrap();
        assert_eq!(found.id, rec.id);
        assert!(store.find_by_checksum("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_checksum_writes_nothing() {
        let store = MemoryRecordStore::new();
        store.insert(&record("abc", "https://one")).await.unwrap();
        let outcome = store.insert(&record("abc", "https://two")).await.unwrap();
        assert_eq!(outcome, InsertOutcome::DuplicateChecksum);
        assert_eq!(store.len(), 1);
        let kept = store.find_by_checksum("abc").await.unwrap().unwrap();
        assert_eq!(kept.url, "https://one");
    }

    #[tokio::test]
    async fn test_update_url_stamps_updated_at() {
        let store = MemoryRecordStore::new();
        let rec = record("abc", "https://old");
        store.insert(&rec).await.unwrap();

        let at = Utc::now();
        let id = store.update_url("abc", "https://new", at).await.unwrap();
        assert_eq!(id, Some(rec.id));

        let updated = store.find_by_checksum("abc").await.unwrap().unwrap();
        assert_eq!(updated.url, "https://new");
        assert_eq!(updated.updated_at, at);
        assert_eq!(updated.created_at, rec.created_at);

        let missing = store.update_url("nope", "https://x", at).await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order_and_limit() {
        let store = MemoryRecordStore::new();
        for i in 0..5 {
            store.insert(&record(&format!("c{i}"), "https://u")).await.unwrap();
        }
        let all = store.list(10).await.unwrap();
        let checksums: Vec<_> = all.iter().map(|r| r.content_checksum.as_str()).collect();
        assert_eq!(checksums, ["c0", "c1", "c2", "c3", "c4"]);

        assert_eq!(store.list(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_in_outcome() {
        let store = MemoryRecordStore::new();
        let rec = record("abc", "https://u");
        store.insert(&rec).await.unwrap();

        assert!(store.delete(rec.id).await.unwrap());
        assert!(!store.delete(rec.id).await.unwrap());
        assert!(store.is_empty());
    }
}
