use crate::error::SlurmError;
use crate::process::run;
use crate::state::parse_exit_code;

const SACCT_TIMEOUT_SECS: u64 = 10;
const SQUEUE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub raw_state: String,
    pub exit_code: Option<i32>,
}

/// Query the current state of `job_id`. Tries `sacct` first; if it
/// returns no usable rows (job still too fresh to have accounting
/// data), falls back to `squeue` (spec.md §4.2).
pub async fn query_state(job_id: &str) -> Result<Option<QueryResult>, SlurmError> {
    if let Some(r) = query_sacct(job_id).await? {
        return Ok(Some(r));
    }
    query_squeue(job_id).await
}

async fn query_sacct(job_id: &str) -> Result<Option<QueryResult>, SlurmError> {
    let out = run(
        "sacct",
        &[
            "-j",
            job_id,
            "--format=JobID,State,ExitCode,NodeList,Start,End",
            "--noheader",
            "--parsable2",
        ],
        SACCT_TIMEOUT_SECS,
    )
    .await?;
    if out.status != Some(0) {
        return Err(SlurmError::NonZeroExit {
            bin: "sacct",
            status: out.status,
            stderr: out.stderr,
        });
    }
    Ok(parse_sacct(&out.stdout, job_id))
}

/// Parse `sacct --parsable2` output, skipping `.batch`/`.extern`
/// sub-steps and keeping only the row for the bare job id.
fn parse_sacct(stdout: &str, job_id: &str) -> Option<QueryResult> {
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split('|').collect();
        let Some(jobid_field) = fields.first() else {
            continue;
        };
        if *jobid_field != job_id {
            continue; // also filters out "<id>.batch" / "<id>.extern"
        }
        let state = fields.get(1).copied().unwrap_or("").to_string();
        if state.is_empty() {
            continue;
        }
        let exit_code = fields.get(2).and_then(|f| parse_exit_code(f));
        return Some(QueryResult {
            raw_state: state,
            exit_code,
        });
    }
    None
}

async fn query_squeue(job_id: &str) -> Result<Option<QueryResult>, SlurmError> {
    let out = run(
        "squeue",
        &["-j", job_id, "-h", "-o", "%i|%T|%N|%S"],
        SQUEUE_TIMEOUT_SECS,
    )
    .await?;
    if out.status != Some(0) {
        return Err(SlurmError::NonZeroExit {
            bin: "squeue",
            status: out.status,
            stderr: out.stderr,
        });
    }
    Ok(parse_squeue(&out.stdout, job_id))
}

fn parse_squeue(stdout: &str, job_id: &str) -> Option<QueryResult> {
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split('|').collect();
        if fields.first().copied() != Some(job_id) {
            continue;
        }
        let state = fields.get(1).copied().unwrap_or("").to_string();
        if state.is_empty() {
            continue;
        }
        return Some(QueryResult {
            raw_state: state,
            exit_code: None,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sacct_ignores_batch_and_extern_substeps() {
        let stdout = "42.batch|COMPLETED|0:0|node1||\n\
                       42.extern|COMPLETED|0:0|node1||\n\
                       42|COMPLETED|0:0|node1|2024-01-01T00:00:00|2024-01-01T00:00:10\n";
        let r = parse_sacct(stdout, "42").unwrap();
        assert_eq!(r.raw_state, "COMPLETED");
        assert_eq!(r.exit_code, Some(0));
    }

    #[test]
    fn sacct_returns_none_for_unknown_job() {
        let stdout = "43|PENDING|0:0|||\n";
        assert!(parse_sacct(stdout, "42").is_none());
    }

    #[test]
    fn squeue_fallback_parses_pipe_fields() {
        let stdout = "42|RUNNING|node1|2024-01-01T00:00:00\n";
        let r = parse_squeue(stdout, "42").unwrap();
        assert_eq!(r.raw_state, "RUNNING");
        assert_eq!(r.exit_code, None);
    }
}
