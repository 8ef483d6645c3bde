use crate::context::AppContext;
use crate::submitter::poll_local;
use broker_core::{Target, TaskStatus};
use std::sync::atomic::Ordering;
use std::time::Duration;
use task_store::{StatusUpdate, UpdateOutcome};
use tokio::sync::watch;

/// Single background worker per Local Proxy process (spec.md §4.4). A
/// value with start/stop, not a process global: `spawn` returns a
/// handle whose `Drop`-free `stop()` flips the shutdown signal the
/// loop selects on.
pub struct Reconciler {
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Reconciler {
    pub fn spawn(ctx: AppContext) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        ctx.polling_active.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(ctx.config.poll_interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        reconcile_tick(&ctx).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            ctx.polling_active.store(false, Ordering::SeqCst);
        });
        Reconciler { shutdown_tx, handle }
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

async fn reconcile_tick(ctx: &AppContext) {
    let rows = match ctx.store.list_non_terminal() {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(error = %e, "reconciler failed to list non-terminal tasks");
            return;
        }
    };
    tracing::debug!(count = rows.len(), "reconciler tick");

    for task in rows {
        let Some(slurm_job_id) = task.slurm_job_id.clone() else {
            continue;
        };
        let outcome = match task.target {
            Target::Local | Target::LocalRun => poll_local(ctx, &task, &slurm_job_id).await,
            Target::Remote => poll_remote(ctx, &task, &slurm_job_id).await,
        };
        match outcome {
            Ok(UpdateOutcome::Changed) => {
                tracing::info!(task_id = %task.task_id, "reconciler committed a state transition")
            }
            Ok(UpdateOutcome::Unchanged) => {}
            Err(e) => {
                tracing::warn!(task_id = %task.task_id, error = %e, "reconciler poll failed, will retry next tick")
            }
        }
    }
}

async fn poll_remote(
    ctx: &AppContext,
    task: &broker_core::Task,
    slurm_job_id: &str,
) -> Result<UpdateOutcome, broker_core::BrokerError> {
    let Some(remote) = &ctx.remote else {
        return Ok(UpdateOutcome::Unchanged);
    };
    let resp = match remote.status(slurm_job_id).await {
        Ok(r) => r,
        Err(e) => {
            // Remote-unreachable on a poll is logged-and-skipped, not a
            // failure of the task (spec.md §7.5).
            tracing::warn!(task_id = %task.task_id, error = %e, "remote status poll unreachable");
            return Ok(UpdateOutcome::Unchanged);
        }
    };
    let Some(new_status) = TaskStatus::parse(&resp.status) else {
        return Ok(UpdateOutcome::Unchanged);
    };
    if new_status == task.status {
        return Ok(UpdateOutcome::Unchanged);
    }
    ctx.store
        .update_status(
            &task.task_id,
            new_status,
            StatusUpdate {
                slurm_job_id: None,
                exit_code: resp.exit_code,
            },
        )
        .map_err(broker_core::BrokerError::from)
}
