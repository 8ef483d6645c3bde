use broker_core::TaskStatus;

/// Slurm → unified status mapping (spec.md §4.2). `None` means the raw
/// state is not one of the listed ones and should be treated as a
/// no-op by the Reconciler, not coerced into any concrete status.
pub fn map_slurm_state(raw: &str) -> Option<TaskStatus> {
    let base = base_state(raw);
    match base {
        "PENDING" => Some(TaskStatus::Pending),
        "RUNNING" => Some(TaskStatus::Running),
        "COMPLETED" => Some(TaskStatus::Completed),
        "CANCELLED" => Some(TaskStatus::Canceled),
        "FAILED" | "TIMEOUT" | "NODE_FAIL" | "PREEMPTED" | "OUT_OF_MEMORY" => {
            Some(TaskStatus::Failed)
        }
        _ => None,
    }
}

/// Strip a trailing ` (Reason)` annotation sacct/squeue sometimes
/// append to a state token, e.g. `CANCELLED by 1234`. Only the first
/// whitespace-delimited token is the state itself.
fn base_state(raw: &str) -> &str {
    raw.trim().split_whitespace().next().unwrap_or("")
}

/// `ExitCode` fields come back as `<code>:<signal>`; we only care
/// about the code.
pub fn parse_exit_code(field: &str) -> Option<i32> {
    field.split(':').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_listed_state() {
        assert_eq!(map_slurm_state("PENDING"), Some(TaskStatus::Pending));
        assert_eq!(map_slurm_state("RUNNING"), Some(TaskStatus::Running));
        assert_eq!(map_slurm_state("COMPLETED"), Some(TaskStatus::Completed));
        assert_eq!(map_slurm_state("CANCELLED"), Some(TaskStatus::Canceled));
        for s in ["FAILED", "TIMEOUT", "NODE_FAIL", "PREEMPTED", "OUT_OF_MEMORY"] {
            assert_eq!(map_slurm_state(s), Some(TaskStatus::Failed));
        }
    }

    #[test]
    fn unlisted_state_is_unknown() {
        assert_eq!(map_slurm_state("SUSPENDED"), None);
    }

    #[test]
    fn strips_reason_suffix() {
        assert_eq!(
            map_slurm_state("CANCELLED by 1001"),
            Some(TaskStatus::Canceled)
        );
    }

    #[test]
    fn cancelled_wins_over_nonzero_exit() {
        // spec.md §9: CANCELLED maps to canceled regardless of exit code.
        assert_eq!(map_slurm_state("CANCELLED"), Some(TaskStatus::Canceled));
        assert_eq!(parse_exit_code("1:0"), Some(1));
    }

    #[test]
    fn exit_code_takes_numerator() {
        assert_eq!(parse_exit_code("0:0"), Some(0));
        assert_eq!(parse_exit_code("137:9"), Some(137));
    }
}
