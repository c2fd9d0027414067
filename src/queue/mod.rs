//! Durable job queue with bounded retry and a dead-letter table.
//!
//! Messages live in a redb table keyed by a persisted monotonic sequence
//! number, so the queue is FIFO and survives a restart. A consumer claims
//! the oldest unclaimed message and holds at most one claim at a time
//! (prefetch = 1); the message stays in the table until it is acked, so a
//! crash between processing and acknowledge redelivers it on the next open.
//! `nack` re-enqueues with an incremented attempt counter until the
//! delivery budget is spent, after which the message moves to the
//! dead-letter table instead of looping forever.

use crate::common::DEFAULT_QUEUE_BACKOFF_MS;
use crate::error::TransformError;
use crate::jobs::Job;
use crate::spec::TransformationSpec;
use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use log::{info, warn};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use uuid::Uuid;

const QUEUE_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("queue");
const DEAD_LETTER_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("dead_letter");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("queue_meta");
const NEXT_SEQ: &str = "next_seq";

/// Queue payload. JSON on the wire, camelCase names; `attempts` counts
/// deliveries so far and rides along through requeues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub job_id: Uuid,
    pub image_id: String,
    pub owner_id: String,
    pub source_path: String,
    pub original_filename: String,
    pub transformations: TransformationSpec,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

impl JobMessage {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            image_id: job.image_id.clone(),
            owner_id: job.owner_id.clone(),
            source_path: job.source_path.clone(),
            original_filename: job.original_filename.clone(),
            transformations: job.spec.clone(),
            created_at: job.created_at,
            attempts: 0,
        }
    }
}

/// One claimed message. The claim is released by `ack` or `nack`.
#[derive(Debug)]
pub struct Delivery {
    pub seq: u64,
    pub message: JobMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Re-enqueued for another delivery; `attempts` is the count so far.
    Requeued { attempts: u32 },
    /// Delivery budget spent; parked in the dead-letter table.
    DeadLettered,
}

pub struct JobQueue {
    db: Database,
    notify: Notify,
    /// Sequence numbers currently claimed by a consumer. Guarded scans keep
    /// two workers from claiming the same message.
    in_flight: Mutex<HashSet<u64>>,
    max_attempts: u32,
}

impl JobQueue {
    /// Single open attempt.
    pub fn open(path: impl AsRef<Path>, max_attempts: u32) -> Result<Self, TransformError> {
        let path = path.as_ref();
        let db = Database::create(path)
            .map_err(|e| TransformError::QueueUnavailable(format!("cannot open {path:?}: {e}")))?;
        let txn = db
            .begin_write()
            .map_err(|e| TransformError::QueueUnavailable(e.to_string()))?;
        txn.open_table(QUEUE_TABLE)
            .map_err(|e| TransformError::QueueUnavailable(e.to_string()))?;
        txn.open_table(DEAD_LETTER_TABLE)
            .map_err(|e| TransformError::QueueUnavailable(e.to_string()))?;
        txn.open_table(META_TABLE)
            .map_err(|e| TransformError::QueueUnavailable(e.to_string()))?;
        txn.commit()
            .map_err(|e| TransformError::QueueUnavailable(e.to_string()))?;
        Ok(Self {
            db,
            notify: Notify::new(),
            in_flight: Mutex::new(HashSet::new()),
            max_attempts: max_attempts.max(1),
        })
    }

    /// Open, retrying with a fixed backoff until the store comes up.
    /// Already-accepted jobs sit in the file and are redelivered once this
    /// succeeds.
    pub async fn open_with_backoff(
        path: impl AsRef<Path>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        let path = path.as_ref();
        loop {
            match Self::open(path, max_attempts) {
                Ok(queue) => {
                    info!("job queue open at {path:?}");
                    return queue;
                }
                Err(err) => {
                    warn!("job queue unavailable, retrying in {backoff:?}: {err}");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Publish durably: the message is committed before this returns.
    pub fn publish(&self, message: &JobMessage) -> Result<(), TransformError> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| anyhow!("failed to serialize job message: {e}"))?;
        self.write(|txn| {
            let seq;
            {
                let mut meta = txn.open_table(META_TABLE)?;
                seq = meta.get(NEXT_SEQ)?.map(|v| v.value()).unwrap_or(0);
                meta.insert(NEXT_SEQ, seq + 1)?;
            }
            let mut queue = txn.open_table(QUEUE_TABLE)?;
            queue.insert(seq, payload.as_slice())?;
            Ok(())
        })
        .map_err(|e| TransformError::QueueUnavailable(format!("publish did not commit: {e}")))?;
        self.notify.notify_one();
        Ok(())
    }

    /// Block until a message can be claimed or shutdown is signalled.
    pub async fn receive(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Delivery> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            // Arm the notification before scanning so a publish racing the
            // scan cannot be missed.
            let notified = self.notify.notified();
            match self.try_claim() {
                Ok(Some(delivery)) => return Some(delivery),
                Ok(None) => {}
                Err(err) => {
                    warn!("queue scan failed: {err}");
                    tokio::time::sleep(Duration::from_millis(DEFAULT_QUEUE_BACKOFF_MS)).await;
                    continue;
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Claim the oldest message not already held by a consumer. The message
    /// stays in the table until acked.
    pub fn try_claim(&self) -> Result<Option<Delivery>, TransformError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| anyhow!("queue in-flight set poisoned"))?;
        let txn = self.db.begin_read().map_err(anyhow::Error::from)?;
        let table = txn.open_table(QUEUE_TABLE).map_err(anyhow::Error::from)?;
        for item in table.iter().map_err(anyhow::Error::from)? {
            let (key, value) = item.map_err(anyhow::Error::from)?;
            let seq = key.value();
            if in_flight.contains(&seq) {
                continue;
            }
            let message: JobMessage = serde_json::from_slice(value.value())
                .with_context(|| format!("corrupt job message at seq {seq}"))?;
            in_flight.insert(seq);
            return Ok(Some(Delivery { seq, message }));
        }
        Ok(None)
    }

    /// Positive acknowledgement: the message is done and leaves the queue.
    pub fn ack(&self, delivery: &Delivery) -> Result<(), TransformError> {
        self.write(|txn| {
            let mut queue = txn.open_table(QUEUE_TABLE)?;
            queue.remove(delivery.seq)?;
            Ok(())
        })
        .map_err(TransformError::from)?;
        self.release(delivery.seq);
        Ok(())
    }

    /// Negative acknowledgement: bump the attempt counter and either
    /// requeue or, once the budget is spent, park in the dead-letter table.
    pub fn nack(&self, delivery: Delivery) -> Result<NackOutcome, TransformError> {
        let mut message = delivery.message;
        message.attempts += 1;
        let exhausted = message.attempts >= self.max_attempts;
        let payload = serde_json::to_vec(&message)
            .map_err(|e| anyhow!("failed to serialize job message: {e}"))?;

        self.write(|txn| {
            if exhausted {
                let mut queue = txn.open_table(QUEUE_TABLE)?;
                queue.remove(delivery.seq)?;
                let mut dead = txn.open_table(DEAD_LETTER_TABLE)?;
                dead.insert(delivery.seq, payload.as_slice())?;
            } else {
                let mut queue = txn.open_table(QUEUE_TABLE)?;
                queue.insert(delivery.seq, payload.as_slice())?;
            }
            Ok(())
        })
        .map_err(TransformError::from)?;
        self.release(delivery.seq);

        if exhausted {
            warn!(
                "job {} for image {} dead-lettered after {} attempts",
                message.job_id, message.image_id, message.attempts
            );
            Ok(NackOutcome::DeadLettered)
        } else {
            self.notify.notify_one();
            Ok(NackOutcome::Requeued {
                attempts: message.attempts,
            })
        }
    }

    pub fn pending(&self) -> Result<u64, TransformError> {
        self.table_len(QUEUE_TABLE)
    }

    pub fn dead_lettered(&self) -> Result<u64, TransformError> {
        self.table_len(DEAD_LETTER_TABLE)
    }

    fn table_len(&self, def: TableDefinition<u64, &'static [u8]>) -> Result<u64, TransformError> {
        let txn = self.db.begin_read().map_err(anyhow::Error::from)?;
        let table = txn.open_table(def).map_err(anyhow::Error::from)?;
        Ok(table.len().map_err(anyhow::Error::from)?)
    }

    fn release(&self, seq: u64) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&seq);
        }
    }

    fn write(
        &self,
        apply: impl FnOnce(&redb::WriteTransaction) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let txn = self.db.begin_write()?;
        apply(&txn)?;
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn message(image_id: &str) -> JobMessage {
        JobMessage::from_job(&Job::new(
            image_id,
            "owner",
            format!("uploads/{image_id}.png"),
            format!("{image_id}.png"),
            TransformationSpec::default(),
        ))
    }

    fn open_queue(dir: &tempfile::TempDir, max_attempts: u32) -> JobQueue {
        JobQueue::open(dir.path().join("queue.redb"), max_attempts).unwrap()
    }

    #[test]
    fn publish_then_claim_is_fifo() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir, 3);
        queue.publish(&message("first")).unwrap();
        queue.publish(&message("second")).unwrap();

        let a = queue.try_claim().unwrap().unwrap();
        assert_eq!(a.message.image_id, "first");
        let b = queue.try_claim().unwrap().unwrap();
        assert_eq!(b.message.image_id, "second");
        assert!(queue.try_claim().unwrap().is_none());
    }

    #[test]
    fn claimed_message_stays_until_acked() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir, 3);
        queue.publish(&message("a")).unwrap();

        let delivery = queue.try_claim().unwrap().unwrap();
        assert_eq!(queue.pending().unwrap(), 1);
        queue.ack(&delivery).unwrap();
        assert_eq!(queue.pending().unwrap(), 0);
    }

    #[test]
    fn nack_requeues_with_a_bumped_attempt_counter() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir, 3);
        queue.publish(&message("a")).unwrap();

        let delivery = queue.try_claim().unwrap().unwrap();
        let outcome = queue.nack(delivery).unwrap();
        assert_eq!(outcome, NackOutcome::Requeued { attempts: 1 });

        let redelivery = queue.try_claim().unwrap().unwrap();
        assert_eq!(redelivery.message.attempts, 1);
    }

    #[test]
    fn exhausted_budget_moves_the_message_to_dead_letter() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir, 2);
        queue.publish(&message("poison")).unwrap();

        let first = queue.try_claim().unwrap().unwrap();
        assert_eq!(
            queue.nack(first).unwrap(),
            NackOutcome::Requeued { attempts: 1 }
        );
        let second = queue.try_claim().unwrap().unwrap();
        assert_eq!(queue.nack(second).unwrap(), NackOutcome::DeadLettered);

        assert_eq!(queue.pending().unwrap(), 0);
        assert_eq!(queue.dead_lettered().unwrap(), 1);
        assert!(queue.try_claim().unwrap().is_none());
    }

    #[test]
    fn messages_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.redb");
        {
            let queue = JobQueue::open(&path, 3).unwrap();
            queue.publish(&message("durable")).unwrap();
            // Claimed but never acked: the claim dies with the process.
            let _delivery = queue.try_claim().unwrap().unwrap();
        }
        let queue = JobQueue::open(&path, 3).unwrap();
        assert_eq!(queue.pending().unwrap(), 1);
        let redelivery = queue.try_claim().unwrap().unwrap();
        assert_eq!(redelivery.message.image_id, "durable");
    }

    #[test]
    fn sequence_numbers_keep_growing_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.redb");
        let first_seq;
        {
            let queue = JobQueue::open(&path, 3).unwrap();
            queue.publish(&message("a")).unwrap();
            let delivery = queue.try_claim().unwrap().unwrap();
            first_seq = delivery.seq;
            queue.ack(&delivery).unwrap();
        }
        let queue = JobQueue::open(&path, 3).unwrap();
        queue.publish(&message("b")).unwrap();
        let delivery = queue.try_claim().unwrap().unwrap();
        assert!(delivery.seq > first_seq);
    }

    #[tokio::test]
    async fn receive_returns_none_on_shutdown() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir, 3);
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(queue.receive(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn receive_wakes_on_publish() {
        let dir = tempdir().unwrap();
        let queue = std::sync::Arc::new(open_queue(&dir, 3));
        let (_tx, mut rx) = watch::channel(false);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(&mut rx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.publish(&message("wake")).unwrap();

        let delivery = waiter.await.unwrap().unwrap();
        assert_eq!(delivery.message.image_id, "wake");
    }
}
