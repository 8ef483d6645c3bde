use crate::error::SlurmError;
use crate::process::run;

const SBATCH_TIMEOUT_SECS: u64 = 30;

/// Submit `script_path` via `sbatch`. Success is exit 0 *and* a stdout
/// line matching `Submitted batch job <digits>` (spec.md §4.2); any
/// other outcome is a submission failure surfaced to the caller, who
/// decides how to fail the task row.
pub async fn submit_batch(script_path: &str) -> Result<String, SlurmError> {
    let out = run("sbatch", &[script_path], SBATCH_TIMEOUT_SECS).await?;
    if out.status != Some(0) {
        return Err(SlurmError::NonZeroExit {
            bin: "sbatch",
            status: out.status,
            stderr: out.stderr,
        });
    }
    parse_job_id(&out.stdout).ok_or_else(|| SlurmError::UnparsableOutput {
        bin: "sbatch",
        detail: out.stdout,
    })
}

fn parse_job_id(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Submitted batch job ") {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                return Some(digits);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_job_id_from_stdout() {
        assert_eq!(
            parse_job_id("Submitted batch job 42\n"),
            Some("42".to_string())
        );
    }

    #[test]
    fn rejects_unrelated_stdout() {
        assert_eq!(parse_job_id("sbatch: error: something\n"), None);
    }

    #[test]
    fn tolerates_trailing_text_on_the_line() {
        assert_eq!(
            parse_job_id("Submitted batch job 7 on cluster foo\n"),
            Some("7".to_string())
        );
    }
}
