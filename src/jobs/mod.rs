//! Background job queue and worker.
//!
//! Enqueue writes a durable row and nudges the worker through an in-process
//! channel. Delivery is at-least-once: jobs left running by a crashed
//! process are requeued at startup, and the pipeline's per-step checkpoints
//! make a re-run idempotent.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::{Db, JobRepository};
use crate::pipeline::ProcessingPipeline;

/// Handle used by request handlers to enqueue processing jobs.
#[derive(Clone)]
pub struct JobQueue {
    db: Db,
    wake: mpsc::UnboundedSender<()>,
}

impl JobQueue {
    /// Create a queue and the wake receiver its worker listens on.
    pub fn new(db: Db) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (wake, rx) = mpsc::unbounded_channel();
        (Self { db, wake }, rx)
    }

    /// Enqueue a processing job for a meeting. Returns the job id.
    pub async fn enqueue(
        &self,
        meeting_id: &str,
        transcript_url: Option<&str>,
        regenerate: bool,
    ) -> Result<String> {
        let job_id = uuid::Uuid::new_v4().to_string();

        let (id, meeting_id) = (job_id.clone(), meeting_id.to_string());
        let transcript_url = transcript_url.map(str::to_string);
        self.db
            .with(|conn| {
                JobRepository::enqueue(conn, &id, &meeting_id, transcript_url.as_deref(), regenerate)
            })
            .await?;

        info!("Enqueued processing job {} for meeting {}", job_id, meeting_id);

        // The worker also drains on its own; a closed channel only means
        // shutdown is in progress.
        let _ = self.wake.send(());

        Ok(job_id)
    }
}

/// Owns pipeline execution for queued jobs.
pub struct JobWorker {
    db: Db,
    pipeline: Arc<ProcessingPipeline>,
    wake: mpsc::UnboundedReceiver<()>,
}

impl JobWorker {
    pub fn new(
        db: Db,
        pipeline: Arc<ProcessingPipeline>,
        wake: mpsc::UnboundedReceiver<()>,
    ) -> Self {
        Self { db, pipeline, wake }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        // Jobs stranded in running by a previous process resume from their
        // last checkpoint.
        match self.db.with(JobRepository::requeue_running).await {
            Ok(0) => {}
            Ok(n) => info!("Requeued {} interrupted job(s)", n),
            Err(e) => error!("Failed to requeue interrupted jobs: {:#}", e),
        }

        loop {
            self.drain().await;

            if self.wake.recv().await.is_none() {
                info!("Job queue closed, worker stopping");
                return;
            }
        }
    }

    /// Run queued jobs until the queue is empty.
    async fn drain(&self) {
        loop {
            let claimed = match self.db.with(JobRepository::claim_next).await {
                Ok(job) => job,
                Err(e) => {
                    error!("Failed to claim next job: {:#}", e);
                    return;
                }
            };

            let Some(job) = claimed else {
                return;
            };

            match self.pipeline.run(&job).await {
                Ok(()) => {
                    if let Err(e) = self
                        .db
                        .with(|conn| JobRepository::mark_done(conn, &job.id))
                        .await
                    {
                        error!("Failed to mark job {} done: {:#}", job.id, e);
                    }
                }
                Err(run_err) => {
                    warn!("Job {} failed: {:#}", job.id, run_err);
                    let message = format!("{run_err:#}");
                    if let Err(e) = self
                        .db
                        .with(|conn| JobRepository::mark_failed(conn, &job.id, &message))
                        .await
                    {
                        error!("Failed to mark job {} failed: {:#}", job.id, e);
                    }
                }
            }
        }
    }
}
