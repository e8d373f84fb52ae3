//! Link and scan operations over the store, validator and fingerprint
//! engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Error;
use crate::fingerprint::{hamming_distance, Algorithm, Fingerprinter, Fingerprints, ALGORITHMS};
use crate::ingest::IngestValidator;
use crate::store::{ImageRecord, InsertOutcome, RecordStore};

pub const DEFAULT_THRESHOLD: u32 = 10;

#[derive(Debug, Clone)]
pub enum LinkOutcome {
    Created { record: ImageRecord },
    Updated { id: Uuid, url: String },
}

#[derive(Debug, Clone)]
pub struct ScanMatch {
    pub id: Uuid,
    pub filename: String,
    pub url: String,
    pub distance: u32,
    pub similarity: u32,
    pub algorithm: Algorithm,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    /// How many stored records were compared (bounded by the scan limit).
    pub total_candidates: usize,
    pub threshold: u32,
    /// Best candidate at or under the threshold, if any.
    pub best: Option<ScanMatch>,
}

pub struct ImageService {
    store: Arc<dyn RecordStore>,
    engine: Arc<dyn Fingerprinter>,
    validator: IngestValidator,
    scan_limit: usize,
}

impl ImageService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        engine: Arc<dyn Fingerprinter>,
        validator: IngestValidator,
        scan_limit: usize,
    ) -> Self {
        Self {
            store,
            engine,
            validator,
            scan_limit,
        }
    }

    /// Associate image content with a URL, dedup'd by exact content
    /// checksum. Repeat sight of the same bytes updates the stored URL and
    /// leaves fingerprints and metadata untouched.
    pub async fn link(&self, raw: &[u8], filename: &str, url: &str) -> Result<LinkOutcome, Error> {
        let upload = self.validator.validate(raw)?;
        let prints = self.engine.compute(&upload.image)?;
        let now = Utc::now();

        if self.store.find_by_checksum(&upload.checksum).await?.is_some() {
            if let Some(id) = self.store.update_url(&upload.checksum, url, now).await? {
                tracing::info!(%id, "updated url for existing image");
                return Ok(LinkOutcome::Updated { id, url: url.to_string() });
            }
            // deleted between lookup and update; fall through and create
        }

        let record = ImageRecord {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            url: url.to_string(),
            content_checksum: upload.checksum.clone(),
            ahash: prints.ahash,
            phash: prints.phash,
            dhash: prints.dhash,
            whash: prints.whash,
            content_type: upload.content_type.to_string(),
            file_size: upload.file_size as i64,
            width: upload.width as i32,
            height: upload.height as i32,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert(&record).await? {
            InsertOutcome::Inserted => {
                tracing::info!(id = %record.id, filename, "linked new image");
                Ok(LinkOutcome::Created { record })
            }
            InsertOutcome::DuplicateChecksum => {
                // lost a concurrent race for the same new content; behave
                // like any repeat sight of the checksum
                match self.store.update_url(&upload.checksum, url, now).await? {
                    Some(id) => Ok(LinkOutcome::Updated { id, url: url.to_string() }),
                    None => Err(Error::Internal(
                        "image record vanished during link".into(),
                    )),
                }
            }
        }
    }

    /// Find the closest stored image under `threshold` (inclusive) and
    /// report its URL.
    pub async fn scan(&self, raw: &[u8], threshold: u32) -> Result<ScanReport, Error> {
        let upload = self.validator.validate(raw)?;
        let query = self.engine.compute(&upload.image)?;

        let records = self.store.list(self.scan_limit).await?;
        let total_candidates = records.len();

        let best = best_match(&query, &records)
            .filter(|(_, distance, _)| *distance <= threshold)
            .map(|(record, distance, algorithm)| ScanMatch {
                id: record.id,
                filename: record.filename.clone(),
                url: record.url.clone(),
                distance,
                similarity: similarity_percentage(distance),
                algorithm,
                created_at: record.created_at,
            });

        match &best {
            Some(m) => tracing::info!(id = %m.id, distance = m.distance, algorithm = %m.algorithm, "scan matched"),
            None => tracing::debug!(total_candidates, threshold, "scan found no match"),
        }

        Ok(ScanReport {
            total_candidates,
            threshold,
            best,
        })
    }

    pub async fn list(&self) -> Result<Vec<ImageRecord>, Error> {
        self.store.list(self.scan_limit).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), Error> {
        if self.store.delete(id).await? {
            tracing::info!(%id, "deleted image link");
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }
}

/// Globally best candidate: per record, the minimum distance across all
/// algorithms (algorithm ties resolve in [`ALGORITHMS`] order); across
/// records, the smallest such minimum, first-encountered winning ties.
pub fn best_match<'a>(
    query: &Fingerprints,
    records: &'a [ImageRecord],
) -> Option<(&'a ImageRecord, u32, Algorithm)> {
    let mut best: Option<(&ImageRecord, u32, Algorithm)> = None;
    for record in records {
        let mut nearest: Option<(u32, Algorithm)> = None;
        for algorithm in ALGORITHMS {
            let distance = hamming_distance(query.code(algorithm), record.code(algorithm));
            if nearest.is_none_or(|(d, _)| distance < d) {
                nearest = Some((distance, algorithm));
            }
        }
        if let Some((distance, algorithm)) = nearest {
            if best.is_none_or(|(_, d, _)| distance < d) {
                best = Some((record, distance, algorithm));
            }
        }
    }
    best
}

/// Human-facing similarity figure; linear in distance, saturating at 0.
pub fn similarity_percentage(distance: u32) -> u32 {
    100u32.saturating_sub(distance.saturating_mul(10))
}
