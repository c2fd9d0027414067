//! Queue consumers.
//!
//! Each worker holds one claimed message at a time and drives it through
//! the service: success acknowledges, failure records the error on the
//! image and negatively acknowledges so the queue retries or dead-letters.

use crate::queue::{Delivery, JobQueue, NackOutcome};
use crate::service::TransformService;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    service: Arc<TransformService>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<JobQueue>,
        service: Arc<TransformService>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            queue,
            service,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("worker {} started", self.id);
        while let Some(delivery) = self.queue.receive(&mut self.shutdown).await {
            self.handle(delivery).await;
        }
        info!("worker {} stopped", self.id);
    }

    async fn handle(&self, delivery: Delivery) {
        let job_id = delivery.message.job_id;
        let image_id = delivery.message.image_id.clone();
        debug!(
            "worker {} took job {job_id} for image {image_id} (attempt {})",
            self.id,
            delivery.message.attempts + 1
        );

        match self.service.run_job(&delivery.message).await {
            Ok(descriptor) => {
                info!(
                    "job {job_id} for image {image_id} completed -> {}",
                    descriptor.path
                );
                if let Err(err) = self.queue.ack(&delivery) {
                    // The work itself is recorded; redelivery will redo it
                    // idempotently.
                    error!("failed to ack job {job_id}: {err}");
                }
            }
            Err(job_err) => {
                warn!("job {job_id} for image {image_id} failed: {job_err}");
                match self.queue.nack(delivery) {
                    Ok(NackOutcome::Requeued { attempts }) => {
                        debug!("job {job_id} requeued, {attempts} attempts so far");
                    }
                    Ok(NackOutcome::DeadLettered) => {
                        error!("job {job_id} for image {image_id} exhausted its delivery budget");
                    }
                    Err(err) => error!("failed to nack job {job_id}: {err}"),
                }
            }
        }
    }
}

/// Spawns `count` workers over one shared queue and joins them on
/// shutdown. Workers finish their in-flight delivery before exiting.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(count: usize, queue: Arc<JobQueue>, service: Arc<TransformService>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = (0..count.max(1))
            .map(|id| {
                let worker = Worker::new(id, queue.clone(), service.clone(), shutdown_rx.clone());
                tokio::spawn(worker.run())
            })
            .collect();
        Self {
            shutdown_tx,
            handles,
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        join_all(self.handles).await;
    }
}
