use crate::error::BrokerError;
use crate::model::{SubmitRequest, Target};
use std::path::{Component, Path, PathBuf};

/// Validate a submit/local-run request for "common sense" well-formedness.
/// This is a best-effort guardrail, not a sandbox: Slurm and the shell
/// the batch script runs under are the actual execution boundary.
pub fn validate_submit(req: &SubmitRequest) -> Result<Target, BrokerError> {
    if req.username.trim().is_empty() {
        return Err(BrokerError::Validation("username is required".into()));
    }
    let target = Target::parse(&req.target).ok_or_else(|| {
        BrokerError::Validation(format!(
            "target must be one of local, remote, local-run (got '{}')",
            req.target
        ))
    })?;
    if req.upload.trim().is_empty() {
        return Err(BrokerError::Validation("upload is required".into()));
    }
    if req.workdir.trim().is_empty() {
        return Err(BrokerError::Validation("workdir is required".into()));
    }
    if req.commands.is_empty() {
        return Err(BrokerError::Validation(
            "commands must contain at least one entry".into(),
        ));
    }
    if req.memory.trim().is_empty() {
        return Err(BrokerError::Validation("memory is required".into()));
    }
    if req.time_limit.trim().is_empty() {
        return Err(BrokerError::Validation("time_limit is required".into()));
    }
    if !req.time_limit.contains(':') {
        return Err(BrokerError::Validation(
            "time_limit must be in H:MM:SS form".into(),
        ));
    }
    Ok(target)
}

/// Resolve a user-supplied relative path argument against `workdir`,
/// rejecting absolute paths and any `..` that would escape it.
pub fn resolve_under(workdir: &Path, user_path: &str) -> Result<PathBuf, BrokerError> {
    let p = Path::new(user_path);
    if p.is_absolute() {
        return Err(BrokerError::Validation(format!(
            "absolute paths are not allowed: {user_path}"
        )));
    }
    let joined = workdir.join(p);
    let normalized = normalize_path(&joined);
    let wd_norm = normalize_path(workdir);
    if !is_within(&wd_norm, &normalized) {
        return Err(BrokerError::Validation(format!(
            "path '{}' escapes working directory '{}'",
            normalized.display(),
            wd_norm.display()
        )));
    }
    Ok(normalized)
}

/// Normalize a path lexically (no filesystem access).
pub fn normalize_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::Prefix(_) | Component::RootDir => out.push(comp.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            Component::Normal(s) => out.push(s),
        }
    }
    out
}

pub fn is_within(parent: &Path, child: &Path) -> bool {
    let parent: Vec<_> = parent.components().collect();
    let child: Vec<_> = child.components().collect();
    child.len() >= parent.len() && child[..parent.len()] == parent[..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_req() -> SubmitRequest {
        SubmitRequest {
            username: "alice".into(),
            target: "local".into(),
            commands: vec!["echo hi".into()],
            upload: "/home/alice/proj".into(),
            ignore: vec![],
            workdir: ".".into(),
            logs: vec![],
            results: vec![],
            gpus: 0,
            cpus: 1,
            memory: "1G".into(),
            time_limit: "0:01:00".into(),
            partition: None,
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(validate_submit(&base_req()).is_ok());
    }

    #[test]
    fn rejects_empty_commands() {
        let mut req = base_req();
        req.commands.clear();
        assert!(validate_submit(&req).is_err());
    }

    #[test]
    fn rejects_bad_target() {
        let mut req = base_req();
        req.target = "moon".into();
        assert!(validate_submit(&req).is_err());
    }

    #[test]
    fn resolve_under_rejects_escape() {
        let wd = Path::new("/home/alice/proj");
        assert!(resolve_under(wd, "../../etc/passwd").is_err());
        assert!(resolve_under(wd, "out/results.txt").is_ok());
    }
}
