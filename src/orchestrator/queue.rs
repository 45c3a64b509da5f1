//! Trigger queue -- accepts run requests and executes them off the caller's
//! task.
//!
//! Request handlers only validate and enqueue; the worker loop resolves the
//! project against a fresh scan and hands it to the orchestrator on its own
//! task. Every outcome is reported through the live broadcaster and the log,
//! including a single-project job turned away before it starts: the project
//! vanished, became locked, or is already running.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{RunError, RunOrchestrator};
use crate::projects::ProjectCatalog;

/// What a queued job asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    Single {
        #[serde(rename = "projectId")]
        project_id: String,
    },
    /// Every runnable project, one after another.
    Batch,
}

/// A queued run request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJob {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: JobKind,
    pub grep: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl RunJob {
    pub fn single(project_id: impl Into<String>, grep: Option<String>) -> Self {
        Self::new(
            JobKind::Single {
                project_id: project_id.into(),
            },
            grep,
        )
    }

    pub fn batch(grep: Option<String>) -> Self {
        Self::new(JobKind::Batch, grep)
    }

    fn new(kind: JobKind, grep: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            grep,
            requested_at: Utc::now(),
        }
    }
}

/// Sending half of the trigger queue.
#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::UnboundedSender<RunJob>,
}

impl RunQueue {
    /// Create a queue and the receiver for [`run_queue_loop`].
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Create a queue and spawn its worker on the current runtime.
    pub fn spawn(orchestrator: Arc<RunOrchestrator>, catalog: ProjectCatalog) -> Self {
        let (queue, rx) = Self::channel();
        tokio::spawn(run_queue_loop(rx, orchestrator, catalog));
        queue
    }

    /// Hand a job to the worker. Fails only once the worker has stopped.
    pub fn enqueue(&self, job: RunJob) -> anyhow::Result<Uuid> {
        let id = job.id;
        self.tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("run queue worker has stopped"))?;
        Ok(id)
    }
}

/// Worker loop: one task per job so a long run never blocks later
/// triggers. Same-project overlap is rejected by the orchestrator; batches
/// wait on the orchestrator's batch lane.
pub async fn run_queue_loop(
    mut rx: mpsc::UnboundedReceiver<RunJob>,
    orchestrator: Arc<RunOrchestrator>,
    catalog: ProjectCatalog,
) {
    info!("Run queue worker started");

    while let Some(job) = rx.recv().await {
        info!(job_id = %job.id, kind = ?job.kind, grep = ?job.grep, "Job dequeued");

        let orchestrator = Arc::clone(&orchestrator);
        let catalog = catalog.clone();
        tokio::spawn(async move {
            if let Err(e) = execute(&job, &orchestrator, &catalog).await {
                match (&job.kind, &e) {
                    (
                        JobKind::Single { project_id },
                        RunError::AlreadyRunning { .. }
                        | RunError::NotRunnable { .. }
                        | RunError::ProjectNotFound { .. },
                    ) => {
                        warn!(job_id = %job.id, error = %e, "Job rejected");
                        orchestrator.reject(project_id, &e);
                    }
                    _ => error!(job_id = %job.id, error = %e, "Job failed"),
                }
            }
        });
    }

    info!("Run queue worker stopped");
}

async fn execute(
    job: &RunJob,
    orchestrator: &RunOrchestrator,
    catalog: &ProjectCatalog,
) -> Result<(), RunError> {
    let grep = job.grep.as_deref();

    match &job.kind {
        JobKind::Single { project_id } => {
            let project = catalog
                .find(project_id)
                .map_err(|e| {
                    error!(project_id = %project_id, error = %e, "Project discovery failed");
                    RunError::ProjectNotFound {
                        project_id: project_id.clone(),
                    }
                })?
                .ok_or_else(|| RunError::ProjectNotFound {
                    project_id: project_id.clone(),
                })?;
            orchestrator.start_run(&project, grep).await.map(|_| ())
        }
        JobKind::Batch => {
            let projects: Vec<_> = match catalog.discover() {
                Ok(found) => found.into_values().filter(|p| p.can_run_from_ui).collect(),
                Err(e) => {
                    error!(error = %e, "Project discovery failed, batch aborted");
                    return Ok(());
                }
            };
            orchestrator.start_batch_run(&projects, grep).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_wire_shape() {
        let job = RunJob::single("shop", Some("@smoke".into()));
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "single");
        assert_eq!(json["projectId"], "shop");
        assert_eq!(json["grep"], "@smoke");
        assert!(json.get("requestedAt").is_some());

        let batch = serde_json::to_value(RunJob::batch(None)).unwrap();
        assert_eq!(batch["kind"], "batch");
        assert!(batch["grep"].is_null());
    }

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(RunJob::batch(None).id, RunJob::batch(None).id);
    }

    #[tokio::test]
    async fn test_enqueue_fails_once_worker_is_gone() {
        let (queue, rx) = RunQueue::channel();
        let job = RunJob::batch(None);
        let id = job.id;
        assert_eq!(queue.enqueue(job).unwrap(), id);

        drop(rx);
        assert!(queue.enqueue(RunJob::batch(None)).is_err());
    }
}
