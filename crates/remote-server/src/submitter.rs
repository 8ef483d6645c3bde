use crate::context::AppContext;
use broker_core::{BrokerError, Task, TaskStatus};
use slurm_adapter::{query_state, render_batch_script, submit_batch, ScriptParams};
use std::path::PathBuf;
use task_store::{StatusUpdate, UpdateOutcome};

/// Build and submit the batch script for a task landed on this host.
/// Identical contract to the Local Submitter (spec.md §4.3: "the
/// Remote Server itself is structurally identical to the Local
/// Submitter"); both link `slurm-adapter` for the actual script
/// rendering and CLI parsing.
pub async fn submit(ctx: &AppContext, task: &Task) -> Result<String, BrokerError> {
    let workdir = task.resolved_workdir();
    let slurm_dir = workdir.join(".slurm");
    tokio::fs::create_dir_all(&slurm_dir)
        .await
        .map_err(|e| BrokerError::Internal(e.to_string()))?;

    let out_path = slurm_dir.join(format!("{}.out", task.task_id));
    let err_path = slurm_dir.join(format!("{}.err", task.task_id));
    let script_path = slurm_dir.join(format!("{}.sh", task.task_id));

    let out_path_str = out_path.to_string_lossy();
    let err_path_str = err_path.to_string_lossy();
    let params = ScriptParams::from_task(task, &out_path_str, &err_path_str);
    let script = render_batch_script(&params);
    tokio::fs::write(&script_path, script)
        .await
        .map_err(|e| BrokerError::Internal(e.to_string()))?;

    match submit_batch(&script_path.to_string_lossy()).await {
        Ok(job_id) => {
            ctx.store.update_status(
                &task.task_id,
                TaskStatus::Running,
                StatusUpdate {
                    slurm_job_id: Some(&job_id),
                    exit_code: None,
                },
            )?;
            Ok(job_id)
        }
        Err(e) => {
            ctx.store.update_status(
                &task.task_id,
                TaskStatus::Failed,
                StatusUpdate {
                    slurm_job_id: None,
                    exit_code: None,
                },
            )?;
            Err(BrokerError::Submission(e.to_string()))
        }
    }
}

pub async fn poll(ctx: &AppContext, task: &Task, slurm_job_id: &str) -> Result<UpdateOutcome, BrokerError> {
    let result = query_state(slurm_job_id)
        .await
        .map_err(|e| BrokerError::Submission(e.to_string()))?;
    let Some(result) = result else {
        return Ok(UpdateOutcome::Unchanged);
    };
    let Some(new_status) = slurm_adapter::map_slurm_state(&result.raw_state) else {
        return Ok(UpdateOutcome::Unchanged);
    };
    if new_status == task.status {
        return Ok(UpdateOutcome::Unchanged);
    }
    Ok(ctx.store.update_status(
        &task.task_id,
        new_status,
        StatusUpdate {
            slurm_job_id: None,
            exit_code: result.exit_code,
        },
    )?)
}

const MAX_LOG_LINES: usize = 1000;

pub async fn read_logs(workdir: &PathBuf, task_id: &str) -> (String, String) {
    let slurm_dir = workdir.join(".slurm");
    (
        read_truncated(&slurm_dir.join(format!("{task_id}.out"))).await,
        read_truncated(&slurm_dir.join(format!("{task_id}.err"))).await,
    )
}

async fn read_truncated(path: &PathBuf) -> String {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return String::new();
    };
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= MAX_LOG_LINES {
        return text.into_owned();
    }
    let tail = &lines[lines.len() - MAX_LOG_LINES..];
    let mut out = String::from("... (truncated) ...\n");
    out.push_str(&tail.join("\n"));
    out
}
