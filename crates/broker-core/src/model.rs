use crate::time::EpochMs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Opaque, short, unique task identifier (ULID rendered as a string).
pub type TaskId = String;

pub fn new_task_id() -> TaskId {
    ulid::Ulid::new().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Local,
    Remote,
    LocalRun,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Local => "local",
            Target::Remote => "remote",
            Target::LocalRun => "local-run",
        }
    }

    pub fn parse(s: &str) -> Option<Target> {
        match s {
            "local" => Some(Target::Local),
            "remote" => Some(Target::Remote),
            "local-run" => Some(Target::LocalRun),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "canceled" => Some(TaskStatus::Canceled),
            _ => None,
        }
    }
}

/// The central entity: one row per user submission (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub username: String,
    pub target: Target,
    pub status: TaskStatus,
    pub slurm_job_id: Option<String>,
    pub upload_root: String,
    pub ignore: Vec<String>,
    pub workdir: String,
    pub commands: Vec<String>,
    pub logs_paths: Vec<String>,
    pub results_paths: Vec<String>,
    pub gpus: u32,
    pub cpus: u32,
    pub memory: String,
    pub time_limit: String,
    pub partition: Option<String>,
    pub created_at: EpochMs,
    pub updated_at: EpochMs,
    pub started_at: Option<EpochMs>,
    pub completed_at: Option<EpochMs>,
    pub exit_code: Option<i32>,
}

impl Task {
    /// `<workdir>` resolved against `upload_root` when it is relative.
    pub fn resolved_workdir(&self) -> std::path::PathBuf {
        let wd = std::path::Path::new(&self.workdir);
        if wd.is_absolute() {
            wd.to_path_buf()
        } else {
            std::path::Path::new(&self.upload_root).join(wd)
        }
    }
}

/// A request to create (and usually submit) a task. Shared by
/// `/api/submit` and `/api/local-run` (the latter ignores the fields
/// that only matter once a job is actually submitted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub username: String,
    pub target: String,
    #[serde(default)]
    pub commands: Vec<String>,
    pub upload: String,
    #[serde(default)]
    pub ignore: Vec<String>,
    pub workdir: String,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub results: Vec<String>,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    pub memory: String,
    pub time_limit: String,
    pub partition: Option<String>,
}

fn default_cpus() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: TaskId,
    pub slurm_job_id: Option<String>,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachSlurmIdRequest {
    pub slurm_job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub task: Task,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListView {
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsView {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelView {
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthView {
    pub status: &'static str,
    pub polling_active: bool,
}

/// The payload forwarded to the Remote Server's submit endpoint, and
/// the payload the Local Submitter assembles internally for the local
/// path. Resource fields are passed through verbatim (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSubmitRequest {
    pub task_id: TaskId,
    pub username: String,
    pub workdir: String,
    pub commands: Vec<String>,
    pub gpus: u32,
    pub cpus: u32,
    pub memory: String,
    pub time_limit: String,
    pub partition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSubmitResponse {
    pub slurm_job_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStatusResponse {
    pub status: String,
    pub exit_code: Option<i32>,
}

/// `users` aggregate counters (spec.md §3): advisory, not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCounters {
    pub username: String,
    pub total_tasks: u64,
}

/// Append-only audit entry (spec.md §3). Never read back by any
/// component; purely observational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLogEntry {
    pub id: String,
    pub task_id: Option<TaskId>,
    pub direction: MessageDirection,
    pub msg_type: String,
    pub payload: serde_json::Value,
    pub created_at: EpochMs,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Incoming => "incoming",
            MessageDirection::Outgoing => "outgoing",
        }
    }
}

/// A file at `<upload>/a/b/c` is excluded iff any of `a`, `a/b`,
/// `a/b/c` resolves to a member of `ignore` (spec.md §8).
pub fn is_ignored(ignore: &BTreeSet<std::path::PathBuf>, relative: &std::path::Path) -> bool {
    let mut acc = std::path::PathBuf::new();
    for component in relative.components() {
        acc.push(component);
        if ignore.contains(&acc) {
            return true;
        }
    }
    false
}
