//! The transformation service facade.
//!
//! Both entry points converge here: the synchronous path executes inline
//! and the enqueue path publishes a durable job that a worker later runs
//! through the same `execute_held` body, so cache keys, history entries
//! and status transitions are identical no matter which path produced
//! them.

use crate::cache::ResultCache;
use crate::canonical::cache_key;
use crate::common::VALID_IMAGE_EXTENSIONS;
use crate::error::TransformError;
use crate::jobs::{Job, OutputDescriptor, ProcessingStatus};
use crate::pipeline::PipelineExecutor;
use crate::queue::{JobMessage, JobQueue};
use crate::repo::{HistoryEntry, ImageRecord, ImageRepository};
use crate::spec::TransformationSpec;
use crate::storage::{BlobStorage, derived_name};
use crate::utils::PathExt;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Shape returned by the status-polling interface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub image_id: String,
    pub is_processing: bool,
    pub status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transformed_at: Option<DateTime<Utc>>,
}

/// Synchronous transform result: the derivative's bytes plus the
/// content-type its format implies.
#[derive(Debug, Clone)]
pub struct SyncTransform {
    pub descriptor: OutputDescriptor,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

pub struct TransformService {
    repo: Arc<dyn ImageRepository>,
    storage: Arc<dyn BlobStorage>,
    queue: Arc<JobQueue>,
    cache: Arc<ResultCache>,
    executor: Arc<PipelineExecutor>,
}

impl TransformService {
    pub fn new(
        repo: Arc<dyn ImageRepository>,
        storage: Arc<dyn BlobStorage>,
        queue: Arc<JobQueue>,
        cache: Arc<ResultCache>,
        executor: Arc<PipelineExecutor>,
    ) -> Self {
        Self {
            repo,
            storage,
            queue,
            cache,
            executor,
        }
    }

    /// Register a new image record. The source extension is the one
    /// validation the core owns here; everything upstream of it (upload
    /// handling, ownership checks) belongs to the transport layer.
    pub fn register_image(&self, record: ImageRecord) -> Result<(), TransformError> {
        let ext = Path::new(&record.source_path).ext_lower();
        if !VALID_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(TransformError::Validation(format!(
                "unsupported source extension {ext:?}"
            )));
        }
        self.repo.insert(&record)
    }

    /// Run a transformation inline and return the derivative bytes.
    pub async fn transform_sync(
        &self,
        image_id: &str,
        spec: TransformationSpec,
    ) -> Result<SyncTransform, TransformError> {
        spec.validate()?;
        let record = self.require_record(image_id)?;

        let key = cache_key(image_id, &spec)?;
        if let Some(hit) = self.cache.get(&key) {
            match self.storage.read(&hit.path) {
                Ok(bytes) => {
                    debug!("cache hit for image {image_id}");
                    return Ok(SyncTransform {
                        content_type: hit.format.content_type(),
                        descriptor: hit,
                        bytes,
                    });
                }
                Err(err) => {
                    // Stale entry pointing at a vanished blob: recompute.
                    debug!("dropping stale cache entry for image {image_id}: {err}");
                    self.cache.delete(&key);
                }
            }
        }

        if !self.repo.try_begin_processing(image_id)? {
            return Err(TransformError::AlreadyProcessing(image_id.to_string()));
        }
        let (descriptor, bytes) = self.execute_held(&record, &spec).await?;
        Ok(SyncTransform {
            content_type: descriptor.format.content_type(),
            descriptor,
            bytes,
        })
    }

    /// Admit a background job and return its id immediately. The processing
    /// gate is taken before publishing; a publish failure releases it so
    /// the image is not left wedged.
    pub fn enqueue_transform(
        &self,
        image_id: &str,
        spec: TransformationSpec,
    ) -> Result<Uuid, TransformError> {
        spec.validate()?;
        let record = self.require_record(image_id)?;

        if !self.repo.try_begin_processing(image_id)? {
            return Err(TransformError::AlreadyProcessing(image_id.to_string()));
        }
        if let Err(err) = self.repo.update_status(image_id, ProcessingStatus::Pending, None) {
            self.release_gate(image_id);
            return Err(err);
        }

        let job = Job::new(
            image_id,
            record.owner_id.clone(),
            record.source_path.clone(),
            record.original_filename.clone(),
            spec,
        );
        let message = JobMessage::from_job(&job);
        if let Err(err) = self.queue.publish(&message) {
            self.release_gate(image_id);
            return Err(err);
        }
        info!("enqueued job {} for image {image_id}", job.job_id);
        Ok(job.job_id)
    }

    /// Worker entry point for one delivered message.
    pub async fn run_job(&self, message: &JobMessage) -> Result<OutputDescriptor, TransformError> {
        let record = self.require_record(&message.image_id)?;
        // On redelivery the admission-time flag may already be cleared by
        // the failed attempt; the delivered message owns the image either
        // way.
        self.repo.set_processing(&message.image_id, true)?;
        let (descriptor, _bytes) = self
            .execute_held(&record, &message.transformations)
            .await?;
        Ok(descriptor)
    }

    pub fn status(&self, image_id: &str) -> Result<StatusReport, TransformError> {
        let record = self.require_record(image_id)?;
        Ok(StatusReport {
            image_id: record.id.clone(),
            is_processing: record.is_processing,
            status: record.status,
            last_transformed_at: record.last_transformed_at(),
            error: record.error,
        })
    }

    /// Drop every cached derivative for an image, used on deletion or
    /// re-upload. Returns the number of entries removed.
    pub fn invalidate_image(&self, image_id: &str) -> usize {
        let removed = self.cache.delete_by_image(image_id);
        debug!("invalidated {removed} cache entries for image {image_id}");
        removed
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Execute the pipeline with the processing gate already held, record
    /// the outcome on the image, and release the gate whichever way it
    /// ends. Success also fills the result cache.
    async fn execute_held(
        &self,
        record: &ImageRecord,
        spec: &TransformationSpec,
    ) -> Result<(OutputDescriptor, Vec<u8>), TransformError> {
        match self.execute_inner(record, spec).await {
            Ok(done) => Ok(done),
            Err(err) => {
                self.record_failure(&record.id, &err);
                Err(err)
            }
        }
    }

    async fn execute_inner(
        &self,
        record: &ImageRecord,
        spec: &TransformationSpec,
    ) -> Result<(OutputDescriptor, Vec<u8>), TransformError> {
        self.repo
            .update_status(&record.id, ProcessingStatus::Processing, None)?;

        let source = self.storage.read(&record.source_path)?;
        let executor = self.executor.clone();
        let job_spec = spec.clone();
        // Decode and encode are CPU-bound; keep them off the async runtime.
        let output = tokio::task::spawn_blocking(move || executor.execute(&source, &job_spec))
            .await
            .map_err(|e| TransformError::Internal(anyhow!("pipeline task panicked: {e}")))??;

        let path = derived_name(&record.id, output.format.extension());
        self.storage.write(&path, &output.bytes)?;
        let descriptor = OutputDescriptor {
            path,
            width: output.width,
            height: output.height,
            size_bytes: output.size_bytes,
            format: output.format,
        };

        self.repo
            .append_history(&record.id, HistoryEntry::new(spec.clone(), descriptor.clone()))?;
        self.repo
            .update_status(&record.id, ProcessingStatus::Completed, None)?;
        self.repo.set_processing(&record.id, false)?;

        // Cache fills are best effort; a failure here must never fail the
        // transformation that already succeeded.
        match cache_key(&record.id, spec) {
            Ok(key) => self.cache.set(&key, &record.id, descriptor.clone(), None),
            Err(err) => warn!("skipping cache fill for image {}: {err}", record.id),
        }

        Ok((descriptor, output.bytes))
    }

    fn record_failure(&self, image_id: &str, err: &TransformError) {
        if let Err(e) =
            self.repo
                .update_status(image_id, ProcessingStatus::Failed, Some(err.job_error_text()))
        {
            warn!("failed to record failure on image {image_id}: {e}");
        }
        self.release_gate(image_id);
    }

    fn release_gate(&self, image_id: &str) {
        if let Err(e) = self.repo.set_processing(image_id, false) {
            warn!("failed to release processing flag on image {image_id}: {e}");
        }
    }

    fn require_record(&self, image_id: &str) -> Result<ImageRecord, TransformError> {
        self.repo
            .find_by_id(image_id)?
            .ok_or_else(|| TransformError::NotFound(format!("no image record {image_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::CropSpec;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// In-memory repository standing in for the metadata store.
    #[derive(Default)]
    struct MockRepo {
        records: Mutex<HashMap<String, ImageRecord>>,
    }

    impl ImageRepository for MockRepo {
        fn find_by_id(&self, image_id: &str) -> Result<Option<ImageRecord>, TransformError> {
            Ok(self.records.lock().unwrap().get(image_id).cloned())
        }

        fn insert(&self, record: &ImageRecord) -> Result<(), TransformError> {
            self.records
                .lock()
                .unwrap()
                .insert(record.id.clone(), record.clone());
            Ok(())
        }

        fn update_status(
            &self,
            image_id: &str,
            status: ProcessingStatus,
            error: Option<String>,
        ) -> Result<(), TransformError> {
            let mut records = self.records.lock().unwrap();
            let record = records.get_mut(image_id).unwrap();
            record.status = status;
            record.error = error;
            Ok(())
        }

        fn append_history(
            &self,
            image_id: &str,
            entry: HistoryEntry,
        ) -> Result<(), TransformError> {
            let mut records = self.records.lock().unwrap();
            records.get_mut(image_id).unwrap().history.push(entry);
            Ok(())
        }

        fn set_processing(&self, image_id: &str, value: bool) -> Result<(), TransformError> {
            let mut records = self.records.lock().unwrap();
            records.get_mut(image_id).unwrap().is_processing = value;
            Ok(())
        }

        fn try_begin_processing(&self, image_id: &str) -> Result<bool, TransformError> {
            let mut records = self.records.lock().unwrap();
            let record = records.get_mut(image_id).unwrap();
            if record.is_processing {
                return Ok(false);
            }
            record.is_processing = true;
            Ok(true)
        }
    }

    struct MockStorage;

    impl BlobStorage for MockStorage {
        fn read(&self, _path: &str) -> Result<Vec<u8>, TransformError> {
            Err(TransformError::NotFound("mock storage is empty".into()))
        }

        fn write(&self, _path: &str, _bytes: &[u8]) -> Result<(), TransformError> {
            Ok(())
        }

        fn delete(&self, _path: &str) -> Result<(), TransformError> {
            Ok(())
        }
    }

    fn service(dir: &TempDir, repo: Arc<MockRepo>) -> TransformService {
        let queue = JobQueue::open(dir.path().join("queue.redb"), 3).unwrap();
        TransformService::new(
            repo,
            Arc::new(MockStorage),
            Arc::new(queue),
            Arc::new(ResultCache::new(16, Duration::from_secs(60))),
            Arc::new(PipelineExecutor::new(None)),
        )
    }

    fn registered(repo: &MockRepo, id: &str) {
        repo.insert(&ImageRecord::new(id, "owner", format!("uploads/{id}.png"), "a.png"))
            .unwrap();
    }

    #[test]
    fn enqueue_rejects_a_second_job_while_one_is_in_flight() {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(MockRepo::default());
        registered(&repo, "img");
        let service = service(&dir, repo);

        service
            .enqueue_transform("img", TransformationSpec::default())
            .unwrap();
        let second = service.enqueue_transform("img", TransformationSpec::default());
        assert!(matches!(second, Err(TransformError::AlreadyProcessing(_))));
        // Only the first job made it to the queue.
        assert_eq!(service.queue.pending().unwrap(), 1);
    }

    #[test]
    fn invalid_spec_is_rejected_before_the_gate_or_the_queue() {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(MockRepo::default());
        registered(&repo, "img");
        let service = service(&dir, repo.clone());

        let spec = TransformationSpec {
            quality: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            service.enqueue_transform("img", spec),
            Err(TransformError::Validation(_))
        ));
        assert_eq!(service.queue.pending().unwrap(), 0);
        assert!(!repo.find_by_id("img").unwrap().unwrap().is_processing);
    }

    #[test]
    fn unknown_image_is_not_found() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(MockRepo::default()));
        assert!(matches!(
            service.status("ghost"),
            Err(TransformError::NotFound(_))
        ));
    }

    #[test]
    fn unsupported_source_extension_is_rejected_at_registration() {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(MockRepo::default());
        let service = service(&dir, repo);
        let record = ImageRecord::new("doc", "owner", "uploads/doc.pdf", "doc.pdf");
        assert!(matches!(
            service.register_image(record),
            Err(TransformError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn missing_source_fails_the_sync_path_and_releases_the_gate() {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(MockRepo::default());
        registered(&repo, "img");
        let service = service(&dir, repo.clone());

        let spec = TransformationSpec {
            crop: Some(CropSpec {
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            }),
            ..Default::default()
        };
        let err = service.transform_sync("img", spec).await.unwrap_err();
        assert!(matches!(err, TransformError::NotFound(_)));

        let record = repo.find_by_id("img").unwrap().unwrap();
        assert!(!record.is_processing);
        assert_eq!(record.status, ProcessingStatus::Failed);
        assert!(record.error.is_some());
    }
}
