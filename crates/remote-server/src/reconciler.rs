use crate::context::AppContext;
use crate::submitter::poll;
use std::sync::atomic::Ordering;
use std::time::Duration;
use task_store::UpdateOutcome;
use tokio::sync::watch;

/// Same shape as the Local Proxy's Reconciler (spec.md §4.4): a single
/// background worker, one tick per `poll_interval_secs`, polling every
/// non-terminal row this host owns.
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
                        tick(&ctx).await;
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

async fn tick(ctx: &AppContext) {
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
        match poll(ctx, &task, &slurm_job_id).await {
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
