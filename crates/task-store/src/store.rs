use crate::error::StoreError;
use broker_core::{now_ms, new_task_id, MessageDirection, Target, Task, TaskStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

const MIGRATION: &str = include_str!("../migrations/0001_init.sql");

/// Durable task storage, indexed by `task_id` (spec.md §4.1). A single
/// `rusqlite::Connection` behind a mutex gives us ACID single-row
/// writes without pulling in a connection pool the daemons don't need
/// at this scale.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

/// Result of `update_status`: lets callers (the Reconciler in
/// particular) distinguish a real transition from the no-op case
/// without treating the no-op as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Changed,
    Unchanged,
}

pub struct StatusUpdate<'a> {
    pub slurm_job_id: Option<&'a str>,
    pub exit_code: Option<i32>,
}

impl TaskStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(MIGRATION)?;
        Ok(TaskStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(MIGRATION)?;
        Ok(TaskStore {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a `pending` row with a freshly generated id and increment
    /// the user's task counter, in one transaction.
    pub fn create(&self, task: Task) -> Result<Task, StoreError> {
        self.insert_pending(task, true)
    }

    /// Like `create`, but keeps the caller-supplied `task_id` instead of
    /// minting a fresh one. Used by the Remote Server, whose rows are
    /// correlated with the Local Proxy's task id across the HTTP
    /// boundary (spec.md §4.3).
    pub fn create_with_id(&self, task: Task) -> Result<Task, StoreError> {
        self.insert_pending(task, false)
    }

    fn insert_pending(&self, mut task: Task, mint_id: bool) -> Result<Task, StoreError> {
        if mint_id {
            task.task_id = new_task_id();
        }
        task.status = TaskStatus::Pending;
        let now = now_ms();
        task.created_at = now;
        task.updated_at = now;
        task.started_at = None;
        task.completed_at = None;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO tasks (
                task_id, username, target, status, slurm_job_id, upload_root,
                ignore_json, workdir, commands_json, logs_json, results_json,
                gpus, cpus, memory, time_limit, partition,
                created_at, updated_at, started_at, completed_at, exit_code
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
            params![
                task.task_id,
                task.username,
                task.target.as_str(),
                task.status.as_str(),
                task.slurm_job_id,
                task.upload_root,
                serde_json::to_string(&task.ignore)?,
                task.workdir,
                serde_json::to_string(&task.commands)?,
                serde_json::to_string(&task.logs_paths)?,
                serde_json::to_string(&task.results_paths)?,
                task.gpus,
                task.cpus,
                task.memory,
                task.time_limit,
                task.partition,
                task.created_at,
                task.updated_at,
                task.started_at,
                task.completed_at,
                task.exit_code,
            ],
        )?;
        tx.execute(
            "INSERT INTO users (username, total_tasks) VALUES (?1, 1)
             ON CONFLICT(username) DO UPDATE SET total_tasks = total_tasks + 1",
            params![task.username],
        )?;
        tx.commit()?;
        Ok(task)
    }

    pub fn get(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM tasks WHERE task_id = ?1", params![task_id], row_to_task)
            .optional()
            .map_err(StoreError::from)
    }

    /// Used by the Remote Server, whose status/cancel endpoints are
    /// indexed by Slurm job id rather than task id (spec.md §6).
    pub fn get_by_slurm_job_id(&self, slurm_job_id: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM tasks WHERE slurm_job_id = ?1",
            params![slurm_job_id],
            row_to_task,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list(&self, username: &str, status: Option<TaskStatus>) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = if status.is_some() {
            conn.prepare(
                "SELECT * FROM tasks WHERE username = ?1 AND status = ?2 ORDER BY created_at DESC",
            )?
        } else {
            conn.prepare("SELECT * FROM tasks WHERE username = ?1 ORDER BY created_at DESC")?
        };
        let rows = if let Some(status) = status {
            stmt.query_map(params![username, status.as_str()], row_to_task)?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            stmt.query_map(params![username], row_to_task)?
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }

    /// Non-terminal rows, used by the Reconciler each tick.
    pub fn list_non_terminal(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE status IN ('pending','running') ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Apply a state transition with the guarantees spec.md §4.1 lists:
    /// rejects leaving a terminal state, sets `started_at`/`completed_at`
    /// exactly once, always refreshes `updated_at`, and is idempotent
    /// when `new_status == current_status`.
    pub fn update_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        update: StatusUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let conn = self.conn.lock().unwrap();
        let current = conn
            .query_row("SELECT * FROM tasks WHERE task_id = ?1", params![task_id], row_to_task)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;

        if current.status.is_terminal() {
            // §7.7: a transition out of a terminal state silently no-ops.
            return Ok(UpdateOutcome::Unchanged);
        }
        let slurm_job_id_unchanged = match update.slurm_job_id {
            Some(id) => current.slurm_job_id.as_deref() == Some(id),
            None => true,
        };
        let exit_code_unchanged = match update.exit_code {
            Some(code) => current.exit_code == Some(code),
            None => true,
        };
        if current.status == new_status && slurm_job_id_unchanged && exit_code_unchanged {
            return Ok(UpdateOutcome::Unchanged);
        }

        let now = now_ms();
        let started_at = if new_status == TaskStatus::Running && current.started_at.is_none() {
            Some(now)
        } else {
            current.started_at
        };
        let completed_at = if new_status.is_terminal() && current.completed_at.is_none() {
            Some(now)
        } else {
            current.completed_at
        };
        let slurm_job_id = update
            .slurm_job_id
            .map(|s| s.to_string())
            .or(current.slurm_job_id);
        let exit_code = update.exit_code.or(current.exit_code);

        conn.execute(
            "UPDATE tasks SET status=?1, slurm_job_id=?2, started_at=?3, completed_at=?4,
             exit_code=?5, updated_at=?6 WHERE task_id=?7",
            params![
                new_status.as_str(),
                slurm_job_id,
                started_at,
                completed_at,
                exit_code,
                now,
                task_id,
            ],
        )?;
        Ok(UpdateOutcome::Changed)
    }

    /// Sets status to `canceled` from any non-terminal state; no-op on
    /// terminal (spec.md §4.1, §5 Cancellation semantics).
    pub fn cancel(&self, task_id: &str) -> Result<UpdateOutcome, StoreError> {
        let conn = self.conn.lock().unwrap();
        let current = conn
            .query_row("SELECT * FROM tasks WHERE task_id = ?1", params![task_id], row_to_task)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        if current.status.is_terminal() {
            return Ok(UpdateOutcome::Unchanged);
        }
        let now = now_ms();
        conn.execute(
            "UPDATE tasks SET status='canceled', completed_at=?1, updated_at=?1 WHERE task_id=?2",
            params![now, task_id],
        )?;
        Ok(UpdateOutcome::Changed)
    }

    pub fn record_message(
        &self,
        task_id: Option<&str>,
        direction: MessageDirection,
        msg_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (id, task_id, direction, msg_type, payload, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                ulid::Ulid::new().to_string(),
                task_id,
                direction.as_str(),
                msg_type,
                serde_json::to_string(payload)?,
                now_ms(),
            ],
        )?;
        Ok(())
    }
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let target_str: String = row.get("target")?;
    let status_str: String = row.get("status")?;
    let ignore_json: String = row.get("ignore_json")?;
    let commands_json: String = row.get("commands_json")?;
    let logs_json: String = row.get("logs_json")?;
    let results_json: String = row.get("results_json")?;

    Ok(Task {
        task_id: row.get("task_id")?,
        username: row.get("username")?,
        target: Target::parse(&target_str).unwrap_or(Target::Local),
        status: TaskStatus::parse(&status_str).unwrap_or(TaskStatus::Pending),
        slurm_job_id: row.get("slurm_job_id")?,
        upload_root: row.get("upload_root")?,
        ignore: serde_json::from_str(&ignore_json).unwrap_or_default(),
        workdir: row.get("workdir")?,
        commands: serde_json::from_str(&commands_json).unwrap_or_default(),
        logs_paths: serde_json::from_str(&logs_json).unwrap_or_default(),
        results_paths: serde_json::from_str(&results_json).unwrap_or_default(),
        gpus: row.get("gpus")?,
        cpus: row.get("cpus")?,
        memory: row.get("memory")?,
        time_limit: row.get("time_limit")?,
        partition: row.get("partition")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        exit_code: row.get("exit_code")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            task_id: String::new(),
            username: "alice".into(),
            target: Target::Local,
            status: TaskStatus::Pending,
            slurm_job_id: None,
            upload_root: "/home/alice/proj".into(),
            ignore: vec![],
            workdir: ".".into(),
            commands: vec!["echo hi".into()],
            logs_paths: vec![],
            results_paths: vec![],
            gpus: 0,
            cpus: 1,
            memory: "1G".into(),
            time_limit: "0:01:00".into(),
            partition: None,
            created_at: 0,
            updated_at: 0,
            started_at: None,
            completed_at: None,
            exit_code: None,
        }
    }

    #[test]
    fn create_assigns_id_and_increments_user_counter() {
        let store = TaskStore::open_in_memory().unwrap();
        let t1 = store.create(sample_task()).unwrap();
        assert!(!t1.task_id.is_empty());
        let t2 = store.create(sample_task()).unwrap();
        assert_ne!(t1.task_id, t2.task_id);

        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT total_tasks FROM users WHERE username = 'alice'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn update_status_sets_started_and_completed_once() {
        let store = TaskStore::open_in_memory().unwrap();
        let t = store.create(sample_task()).unwrap();

        store
            .update_status(
                &t.task_id,
                TaskStatus::Running,
                StatusUpdate {
                    slurm_job_id: Some("42"),
                    exit_code: None,
                },
            )
            .unwrap();
        let running = store.get(&t.task_id).unwrap().unwrap();
        assert!(running.started_at.is_some());
        let first_started = running.started_at;

        // Re-entering running must not move started_at.
        store
            .update_status(
                &t.task_id,
                TaskStatus::Running,
                StatusUpdate {
                    slurm_job_id: None,
                    exit_code: None,
                },
            )
            .unwrap();
        let still_running = store.get(&t.task_id).unwrap().unwrap();
        assert_eq!(still_running.started_at, first_started);

        store
            .update_status(
                &t.task_id,
                TaskStatus::Completed,
                StatusUpdate {
                    slurm_job_id: None,
                    exit_code: Some(0),
                },
            )
            .unwrap();
        let done = store.get(&t.task_id).unwrap().unwrap();
        assert!(done.completed_at.is_some());
        assert_eq!(done.exit_code, Some(0));
    }

    #[test]
    fn update_status_rejects_leaving_terminal_state() {
        let store = TaskStore::open_in_memory().unwrap();
        let t = store.create(sample_task()).unwrap();
        store.cancel(&t.task_id).unwrap();

        let outcome = store
            .update_status(
                &t.task_id,
                TaskStatus::Running,
                StatusUpdate {
                    slurm_job_id: None,
                    exit_code: None,
                },
            )
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Unchanged);
        let after = store.get(&t.task_id).unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::Canceled);
    }

    #[test]
    fn identical_update_status_calls_are_idempotent() {
        let store = TaskStore::open_in_memory().unwrap();
        let t = store.create(sample_task()).unwrap();
        let upd = || StatusUpdate {
            slurm_job_id: Some("42"),
            exit_code: None,
        };
        let first_outcome = store.update_status(&t.task_id, TaskStatus::Running, upd()).unwrap();
        assert_eq!(first_outcome, UpdateOutcome::Changed);
        let first = store.get(&t.task_id).unwrap().unwrap();

        let second_outcome = store.update_status(&t.task_id, TaskStatus::Running, upd()).unwrap();
        assert_eq!(second_outcome, UpdateOutcome::Unchanged);
        let second = store.get(&t.task_id).unwrap().unwrap();
        assert_eq!(first.updated_at, second.updated_at);
        assert_eq!(first.started_at, second.started_at);
    }

    #[test]
    fn cancel_is_noop_on_terminal_task() {
        let store = TaskStore::open_in_memory().unwrap();
        let t = store.create(sample_task()).unwrap();
        store.cancel(&t.task_id).unwrap();
        let after_first = store.get(&t.task_id).unwrap().unwrap();

        let outcome = store.cancel(&t.task_id).unwrap();
        assert_eq!(outcome, UpdateOutcome::Unchanged);
        let after_second = store.get(&t.task_id).unwrap().unwrap();
        assert_eq!(after_first.updated_at, after_second.updated_at);
    }

    #[test]
    fn list_non_terminal_excludes_terminal_rows() {
        let store = TaskStore::open_in_memory().unwrap();
        let t1 = store.create(sample_task()).unwrap();
        let t2 = store.create(sample_task()).unwrap();
        store.cancel(&t2.task_id).unwrap();

        let rows = store.list_non_terminal().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task_id, t1.task_id);
    }
}
