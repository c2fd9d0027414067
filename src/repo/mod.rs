//! Metadata store: per-image records behind a narrow repository trait.
//!
//! The embedded implementation keeps bitcode-encoded records in one redb
//! table. Every mutation is a single read-modify-write transaction, which
//! is what makes `try_begin_processing` an atomic conditional update
//! rather than a check-then-write split across two calls.

use crate::error::TransformError;
use crate::jobs::{OutputDescriptor, ProcessingStatus};
use crate::spec::TransformationSpec;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;

const IMAGE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("images");

/// One completed transformation: the spec that produced it, where the
/// derivative landed, and when.
#[derive(Debug, Clone, bitcode::Encode, bitcode::Decode)]
pub struct HistoryEntry {
    pub spec: TransformationSpec,
    pub output: OutputDescriptor,
    pub completed_at_ms: i64,
}

impl HistoryEntry {
    pub fn new(spec: TransformationSpec, output: OutputDescriptor) -> Self {
        Self {
            spec,
            output,
            completed_at_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.completed_at_ms)
            .single()
            .unwrap_or_default()
    }
}

/// Durable record for one image.
#[derive(Debug, Clone, bitcode::Encode, bitcode::Decode)]
pub struct ImageRecord {
    pub id: String,
    pub owner_id: String,
    pub source_path: String,
    pub original_filename: String,
    pub status: ProcessingStatus,
    pub error: Option<String>,
    /// While true, no second job for this image may be accepted.
    pub is_processing: bool,
    pub history: Vec<HistoryEntry>,
    pub last_transformed_at_ms: Option<i64>,
}

impl ImageRecord {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        source_path: impl Into<String>,
        original_filename: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            source_path: source_path.into(),
            original_filename: original_filename.into(),
            status: ProcessingStatus::Pending,
            error: None,
            is_processing: false,
            history: Vec::new(),
            last_transformed_at_ms: None,
        }
    }

    pub fn last_transformed_at(&self) -> Option<DateTime<Utc>> {
        self.last_transformed_at_ms
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

/// The narrow contract the pipeline core needs from the metadata store.
pub trait ImageRepository: Send + Sync {
    fn find_by_id(&self, image_id: &str) -> Result<Option<ImageRecord>, TransformError>;
    fn insert(&self, record: &ImageRecord) -> Result<(), TransformError>;
    fn update_status(
        &self,
        image_id: &str,
        status: ProcessingStatus,
        error: Option<String>,
    ) -> Result<(), TransformError>;
    fn append_history(&self, image_id: &str, entry: HistoryEntry) -> Result<(), TransformError>;
    fn set_processing(&self, image_id: &str, value: bool) -> Result<(), TransformError>;
    /// Set `is_processing = true` iff it is currently false, in one atomic
    /// step. Returns whether the flag was acquired.
    fn try_begin_processing(&self, image_id: &str) -> Result<bool, TransformError>;
}

pub struct RedbImageRepository {
    db: Database,
}

impl RedbImageRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("failed to open metadata store at {path:?}"))?;
        let txn = db.begin_write()?;
        txn.open_table(IMAGE_TABLE)?;
        txn.commit()?;
        Ok(Self { db })
    }

    fn load(
        table: &impl ReadableTable<&'static str, &'static [u8]>,
        image_id: &str,
    ) -> Result<Option<ImageRecord>> {
        match table.get(image_id)? {
            Some(bytes) => {
                let record = bitcode::decode(bytes.value())
                    .map_err(|e| anyhow!("corrupt image record {image_id}: {e}"))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Read-modify-write one record inside a single write transaction.
    fn mutate<T>(
        &self,
        image_id: &str,
        apply: impl FnOnce(&mut ImageRecord) -> Result<T, TransformError>,
    ) -> Result<T, TransformError> {
        let txn = self.db.begin_write().map_err(anyhow::Error::from)?;
        let value;
        {
            let mut table = txn.open_table(IMAGE_TABLE).map_err(anyhow::Error::from)?;
            let mut record = Self::load(&table, image_id)?
                .ok_or_else(|| TransformError::NotFound(format!("no image record {image_id}")))?;
            value = apply(&mut record)?;
            let encoded = bitcode::encode(&record);
            table
                .insert(image_id, encoded.as_slice())
                .map_err(anyhow::Error::from)?;
        }
        txn.commit().map_err(anyhow::Error::from)?;
        Ok(value)
    }
}

impl ImageRepository for RedbImageRepository {
    fn find_by_id(&self, image_id: &str) -> Result<Option<ImageRecord>, TransformError> {
        let txn = self.db.begin_read().map_err(anyhow::Error::from)?;
        let table = txn.open_table(IMAGE_TABLE).map_err(anyhow::Error::from)?;
        Ok(Self::load(&table, image_id)?)
    }

    fn insert(&self, record: &ImageRecord) -> Result<(), TransformError> {
        let txn = self.db.begin_write().map_err(anyhow::Error::from)?;
        {
            let mut table = txn.open_table(IMAGE_TABLE).map_err(anyhow::Error::from)?;
            let encoded = bitcode::encode(record);
            table
                .insert(record.id.as_str(), encoded.as_slice())
                .map_err(anyhow::Error::from)?;
        }
        txn.commit().map_err(anyhow::Error::from)?;
        Ok(())
    }

    fn update_status(
        &self,
        image_id: &str,
        status: ProcessingStatus,
        error: Option<String>,
    ) -> Result<(), TransformError> {
        self.mutate(image_id, |record| {
            if !record.status.can_transition(status) {
                return Err(anyhow!(
                    "illegal status transition {} -> {} for image {image_id}",
                    record.status,
                    status
                )
                .into());
            }
            record.status = status;
            record.error = error;
            Ok(())
        })
    }

    fn append_history(&self, image_id: &str, entry: HistoryEntry) -> Result<(), TransformError> {
        self.mutate(image_id, |record| {
            record.last_transformed_at_ms = Some(entry.completed_at_ms);
            record.history.push(entry);
            Ok(())
        })
    }

    fn set_processing(&self, image_id: &str, value: bool) -> Result<(), TransformError> {
        self.mutate(image_id, |record| {
            record.is_processing = value;
            Ok(())
        })
    }

    fn try_begin_processing(&self, image_id: &str) -> Result<bool, TransformError> {
        self.mutate(image_id, |record| {
            if record.is_processing {
                return Ok(false);
            }
            record.is_processing = true;
            Ok(true)
        })
    }
}
