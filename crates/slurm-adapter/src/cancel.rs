use crate::process::run;

const SCANCEL_TIMEOUT_SECS: u64 = 10;

/// Best-effort cancellation: the caller always commits `canceled`
/// regardless of this result (spec.md §5 Cancellation semantics). We
/// still return the outcome so it can be logged.
pub async fn cancel_job(job_id: &str) -> bool {
    match run("scancel", &[job_id], SCANCEL_TIMEOUT_SECS).await {
        Ok(out) => out.status == Some(0),
        Err(e) => {
            tracing::warn!(job_id, error = %e, "scancel failed");
            false
        }
    }
}
