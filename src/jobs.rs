//! Background work: the export queue and the encounter closer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::export::{run_export, ExportContext};
use crate::models::Timeframe;

/// A queued export request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    pub user_id: i64,
    pub campaign_id: i64,
    pub timeframe: Timeframe,
    pub requested_at: DateTime<Utc>,
}

/// Sending half of the export queue. Cloning shares the same workers.
#[derive(Debug, Clone)]
pub struct ExportQueue {
    pub(crate) sender: mpsc::Sender<ExportJob>,
}

impl ExportQueue {
    /// Start `workers` tasks draining a queue of `capacity` pending jobs.
    pub fn start(ctx: ExportContext, workers: usize, capacity: usize) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel::<ExportJob>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    loop {
                        // guard is dropped before the job runs
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };
                        process(&ctx, worker, job).await;
                    }
                    info!(worker, "export worker stopped");
                })
            })
            .collect();

        (Self { sender }, handles)
    }

    /// Hand a job to the workers without waiting. A full queue is
    /// `QueueFull`; a queue whose workers are gone is `QueueClosed`.
    pub fn enqueue(&self, job: ExportJob) -> AppResult<()> {
        self.sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => AppError::QueueFull,
            TrySendError::Closed(_) => AppError::QueueClosed,
        })
    }
}

#[instrument(skip(ctx, job), fields(user_id = job.user_id, campaign_id = job.campaign_id))]
async fn process(ctx: &ExportContext, worker: usize, job: ExportJob) {
    match run_export(ctx, &job).await {
        Ok(export) => info!(worker, export_id = export.id, "export job done"),
        Err(e) => error!(worker, error = %e, "export job failed"),
    }
}

/// Periodically mark expired encounters inactive.
pub fn spawn_encounter_closer(db: Database, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match db.close_expired_encounters(Utc::now()).await {
                Ok(0) => {}
                Ok(closed) => info!(closed, "closed expired encounters"),
                Err(e) => warn!(error = %e, "encounter close pass failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ExportJob {
        ExportJob {
            user_id: 1,
            campaign_id: 1,
            timeframe: Timeframe::All,
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn enqueue_fails_once_workers_are_gone() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        let queue = ExportQueue { sender };
        assert!(matches!(queue.enqueue(job()), Err(AppError::QueueClosed)));
    }

    #[test]
    fn enqueue_does_not_wait_for_room() {
        let (sender, mut receiver) = mpsc::channel(1);
        let queue = ExportQueue { sender };

        queue.enqueue(job()).unwrap();
        assert!(matches!(queue.enqueue(job()), Err(AppError::QueueFull)));

        assert!(receiver.try_recv().is_ok());
        assert!(queue.enqueue(job()).is_ok());
    }
}
