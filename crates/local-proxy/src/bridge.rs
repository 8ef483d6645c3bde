use crate::context::AppContext;
use broker_core::{BrokerError, RemoteSubmitRequest, Task, TaskStatus};
use remote_bridge::{copy_to_temp, rsync_push, SshTarget};
use task_store::StatusUpdate;

/// Stage `task`'s upload root to the remote host and delegate
/// submission to the Remote Server (spec.md §4.3). Staging is
/// serialized per username via `ctx.staging_locks`.
pub async fn submit_remote(ctx: &AppContext, task: &Task) -> Result<String, BrokerError> {
    let Some(remote_cfg) = &ctx.config.remote else {
        return Err(BrokerError::Internal(
            "remote target requested but no remote server is configured".into(),
        ));
    };
    let Some(remote) = &ctx.remote else {
        return Err(BrokerError::Internal("remote client not initialized".into()));
    };

    let _guard = ctx.staging_locks.lock(&task.username).await;
    let staging_dir = ctx.config.tmp_dir(&task.username);
    let upload_root = std::path::Path::new(&task.upload_root);

    if let Err(e) = copy_to_temp(upload_root, &task.ignore, &staging_dir).await {
        fail_task(ctx, task);
        return Err(BrokerError::Submission(e.to_string()));
    }

    let target = SshTarget {
        key_path: &remote_cfg.ssh_key_path,
        port: remote_cfg.ssh_port,
        user: &remote_cfg.ssh_user,
        host: &remote_cfg.ssh_host,
    };
    let remote_dir = format!("{}/{}", remote_cfg.remote_base_dir, task.username);
    if let Err(e) = rsync_push(&staging_dir, &remote_dir, &target).await {
        fail_task(ctx, task);
        return Err(BrokerError::Submission(e.to_string()));
    }

    let req = RemoteSubmitRequest {
        task_id: task.task_id.clone(),
        username: task.username.clone(),
        workdir: task.workdir.clone(),
        commands: task.commands.clone(),
        gpus: task.gpus,
        cpus: task.cpus,
        memory: task.memory.clone(),
        time_limit: task.time_limit.clone(),
        partition: task.partition.clone(),
    };
    let resp = match remote.submit(&req).await {
        Ok(resp) => resp,
        Err(e) => {
            fail_task(ctx, task);
            return Err(BrokerError::from(e));
        }
    };
    let Some(job_id) = resp.slurm_job_id else {
        fail_task(ctx, task);
        return Err(BrokerError::Submission("remote server did not return a job id".into()));
    };

    ctx.store
        .update_status(
            &task.task_id,
            TaskStatus::Running,
            StatusUpdate {
                slurm_job_id: Some(&job_id),
                exit_code: None,
            },
        )
        .map_err(BrokerError::from)?;
    Ok(job_id)
}

fn fail_task(ctx: &AppContext, task: &Task) {
    let _ = ctx.store.update_status(
        &task.task_id,
        TaskStatus::Failed,
        StatusUpdate {
            slurm_job_id: None,
            exit_code: None,
        },
    );
}

pub async fn cancel_remote(ctx: &AppContext, slurm_job_id: &str) -> bool {
    let Some(remote) = &ctx.remote else {
        return false;
    };
    remote.cancel(slurm_job_id).await.is_ok()
}
