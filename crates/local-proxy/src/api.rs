use crate::bridge;
use crate::context::AppContext;
use crate::submitter::{read_local_logs, submit_local};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use broker_core::{
    validate::validate_submit, AttachSlurmIdRequest, BrokerError, CancelView, HealthView,
    LogsView, MessageDirection, SubmitRequest, SubmitResponse, Target, Task, TaskListView,
    TaskStatus, TaskView,
};
use serde::Deserialize;
use std::sync::atomic::Ordering;
use task_store::StatusUpdate;

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/submit", post(submit))
        .route("/api/local-run", post(local_run))
        .route("/api/local-run/{task_id}/slurm", post(attach_slurm_id))
        .route("/api/status/{task_id}", get(status))
        .route("/api/tasks", get(list_tasks))
        .route("/api/logs/{task_id}", get(logs))
        .route("/api/fetch/{task_id}", get(fetch))
        .route("/api/cancel/{task_id}", post(cancel))
        .route("/health", get(health))
        .with_state(ctx)
}

/// Wraps `BrokerError` so it can be used as an axum handler error type
/// without pulling an axum dependency into `broker-core`.
pub struct ApiError(BrokerError);

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        ApiError(e)
    }
}

impl From<task_store::StoreError> for ApiError {
    fn from(e: task_store::StoreError) -> Self {
        ApiError(BrokerError::from(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({ "error": self.0.kind(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

fn task_into_model(req: &SubmitRequest, target: Target) -> Task {
    Task {
        task_id: String::new(),
        username: req.username.clone(),
        target,
        status: TaskStatus::Pending,
        slurm_job_id: None,
        upload_root: req.upload.clone(),
        ignore: req.ignore.clone(),
        workdir: req.workdir.clone(),
        commands: req.commands.clone(),
        logs_paths: req.logs.clone(),
        results_paths: req.results.clone(),
        gpus: req.gpus,
        cpus: req.cpus,
        memory: req.memory.clone(),
        time_limit: req.time_limit.clone(),
        partition: req.partition.clone(),
        created_at: 0,
        updated_at: 0,
        started_at: None,
        completed_at: None,
        exit_code: None,
    }
}

async fn submit(
    State(ctx): State<AppContext>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let target = validate_submit(&req)?;
    let task = ctx.store.create(task_into_model(&req, target))?;
    let _ = ctx.store.record_message(
        Some(&task.task_id),
        MessageDirection::Incoming,
        "task_submit",
        &serde_json::to_value(&req).unwrap_or_default(),
    );

    let slurm_job_id = match target {
        Target::Local => Some(submit_local(&ctx, &task).await?),
        Target::Remote => Some(bridge::submit_remote(&ctx, &task).await?),
        Target::LocalRun => None,
    };

    Ok(Json(SubmitResponse {
        task_id: task.task_id,
        slurm_job_id,
        target: target.as_str().to_string(),
    }))
}

/// Create a `local-run` record without submitting; the CLI caller
/// submits separately and attaches the resulting job id (spec.md §6,
/// and the `local` vs `local-run` resolution in SPEC_FULL.md).
async fn local_run(
    State(ctx): State<AppContext>,
    Json(mut req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    req.target = "local-run".to_string();
    let target = validate_submit(&req)?;
    let task = ctx.store.create(task_into_model(&req, target))?;
    let _ = ctx.store.record_message(
        Some(&task.task_id),
        MessageDirection::Incoming,
        "task_submit",
        &serde_json::to_value(&req).unwrap_or_default(),
    );
    Ok(Json(SubmitResponse {
        task_id: task.task_id,
        slurm_job_id: None,
        target: target.as_str().to_string(),
    }))
}

async fn attach_slurm_id(
    State(ctx): State<AppContext>,
    Path(task_id): Path<String>,
    Json(req): Json<AttachSlurmIdRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let task = get_owned(&ctx, &task_id, None)?;
    if task.target != Target::LocalRun {
        return Err(BrokerError::Validation("task is not a local-run task".into()).into());
    }
    ctx.store.update_status(
        &task_id,
        TaskStatus::Running,
        StatusUpdate {
            slurm_job_id: Some(&req.slurm_job_id),
            exit_code: None,
        },
    )?;
    Ok(Json(serde_json::json!({})))
}

#[derive(Deserialize)]
struct UsernameQuery {
    username: Option<String>,
}

fn get_owned(ctx: &AppContext, task_id: &str, username: Option<&str>) -> Result<Task, BrokerError> {
    let task = ctx
        .store
        .get(task_id)?
        .ok_or_else(|| BrokerError::NotFound(task_id.to_string()))?;
    if let Some(username) = username {
        if task.username != username {
            return Err(BrokerError::Authorization);
        }
    }
    Ok(task)
}

async fn status(
    State(ctx): State<AppContext>,
    Path(task_id): Path<String>,
    Query(q): Query<UsernameQuery>,
) -> Result<Json<TaskView>, ApiError> {
    let task = get_owned(&ctx, &task_id, q.username.as_deref())?;
    Ok(Json(TaskView { task }))
}

#[derive(Deserialize)]
struct ListQuery {
    username: String,
    status: Option<String>,
}

async fn list_tasks(
    State(ctx): State<AppContext>,
    Query(q): Query<ListQuery>,
) -> Result<Json<TaskListView>, ApiError> {
    let status = match &q.status {
        Some(s) => Some(
            TaskStatus::parse(s)
                .ok_or_else(|| BrokerError::Validation(format!("unknown status '{s}'")))?,
        ),
        None => None,
    };
    let tasks = ctx.store.list(&q.username, status)?;
    Ok(Json(TaskListView { tasks }))
}

async fn logs(
    State(ctx): State<AppContext>,
    Path(task_id): Path<String>,
    Query(q): Query<UsernameQuery>,
) -> Result<Json<LogsView>, ApiError> {
    let task = get_owned(&ctx, &task_id, q.username.as_deref())?;
    let (stdout, stderr) = match task.target {
        Target::Remote => {
            let remote = ctx
                .remote
                .as_ref()
                .ok_or_else(|| BrokerError::Internal("remote client not initialized".into()))?;
            let view = remote
                .logs(&task.task_id, &task.username)
                .await
                .map_err(BrokerError::from)?;
            (view.stdout, view.stderr)
        }
        Target::Local | Target::LocalRun => {
            read_local_logs(&task.resolved_workdir(), &task.task_id).await?
        }
    };
    Ok(Json(LogsView { stdout, stderr }))
}

async fn fetch(
    State(ctx): State<AppContext>,
    Path(task_id): Path<String>,
    Query(q): Query<UsernameQuery>,
) -> Result<Response, ApiError> {
    let task = get_owned(&ctx, &task_id, q.username.as_deref())?;
    let dest = result_packager::default_archive_path(&ctx.config.data_dir, &task.task_id);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BrokerError::Internal(e.to_string()))?;
    }

    match task.target {
        Target::Local | Target::LocalRun => {
            let task_clone = task.clone();
            let dest_clone = dest.clone();
            tokio::task::spawn_blocking(move || result_packager::build_archive(&task_clone, &dest_clone))
                .await
                .map_err(|e| BrokerError::Internal(e.to_string()))?
                .map_err(|e| BrokerError::Internal(e.to_string()))?;
        }
        Target::Remote => {
            let remote = ctx
                .remote
                .as_ref()
                .ok_or_else(|| BrokerError::Internal("remote client not initialized".into()))?;
            let mut paths = task.logs_paths.clone();
            paths.extend(task.results_paths.clone());
            remote
                .fetch(&task.task_id, &task.username, &task.workdir, &paths, &dest)
                .await
                .map_err(BrokerError::from)?;
        }
    }

    let bytes = tokio::fs::read(&dest)
        .await
        .map_err(|e| BrokerError::Internal(e.to_string()))?;
    let filename = result_packager::archive_filename(&task.task_id);
    Ok((
        StatusCode::OK,
        [
            ("content-type", "application/zip".to_string()),
            (
                "content-disposition",
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn cancel(
    State(ctx): State<AppContext>,
    Path(task_id): Path<String>,
    Query(q): Query<UsernameQuery>,
) -> Result<Json<CancelView>, ApiError> {
    let task = get_owned(&ctx, &task_id, q.username.as_deref())?;
    if task.status.is_terminal() {
        return Err(BrokerError::Validation(format!("task is already {}", task.status.as_str())).into());
    }

    if let Some(slurm_job_id) = &task.slurm_job_id {
        match task.target {
            Target::Local | Target::LocalRun => {
                let _ = slurm_adapter::cancel_job(slurm_job_id).await;
            }
            Target::Remote => {
                let _ = bridge::cancel_remote(&ctx, slurm_job_id).await;
            }
        }
    }

    ctx.store.cancel(&task_id)?;
    let _ = ctx.store.record_message(
        Some(&task_id),
        MessageDirection::Outgoing,
        "task_cancel",
        &serde_json::json!({}),
    );
    Ok(Json(CancelView { status: "canceled" }))
}

async fn health(State(ctx): State<AppContext>) -> Json<HealthView> {
    Json(HealthView {
        status: "ok",
        polling_active: ctx.polling_active.load(Ordering::SeqCst),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_ctx() -> AppContext {
        let store = task_store::TaskStore::open_in_memory().unwrap();
        let config = Config {
            listen: "127.0.0.1:0".into(),
            data_dir: std::env::temp_dir().join(format!("ailabber-test-{}", broker_core::new_task_id())),
            poll_interval_secs: 5,
            remote: None,
        };
        AppContext::new(store, config)
    }

    async fn send(ctx: &AppContext, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router(ctx.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn local_run_request(username: &str) -> Request<Body> {
        let payload = serde_json::json!({
            "username": username,
            "target": "local-run",
            "upload": "/tmp/upload",
            "workdir": ".",
            "memory": "4G",
            "time_limit": "01:00:00",
        });
        Request::builder()
            .method("POST")
            .uri("/api/local-run")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn local_run_then_status_roundtrip() {
        let ctx = test_ctx();
        let (status, body) = send(&ctx, local_run_request("alice")).await;
        assert_eq!(status, StatusCode::OK);
        let task_id = body["task_id"].as_str().unwrap().to_string();
        assert_eq!(body["target"], "local-run");

        let req = Request::builder()
            .uri(format!("/api/status/{task_id}?username=alice"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&ctx, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["task"]["status"], "pending");
    }

    #[tokio::test]
    async fn status_rejects_wrong_owner() {
        let ctx = test_ctx();
        let (_, body) = send(&ctx, local_run_request("alice")).await;
        let task_id = body["task_id"].as_str().unwrap().to_string();

        let req = Request::builder()
            .uri(format!("/api/status/{task_id}?username=bob"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&ctx, req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn cancel_before_submission_is_terminal_and_idempotent_rejects() {
        let ctx = test_ctx();
        let (_, body) = send(&ctx, local_run_request("alice")).await;
        let task_id = body["task_id"].as_str().unwrap().to_string();

        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/cancel/{task_id}?username=alice"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&ctx, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "canceled");

        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/cancel/{task_id}?username=alice"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&ctx, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn attach_slurm_id_moves_local_run_to_running() {
        let ctx = test_ctx();
        let (_, body) = send(&ctx, local_run_request("alice")).await;
        let task_id = body["task_id"].as_str().unwrap().to_string();

        let payload = serde_json::json!({ "slurm_job_id": "12345" });
        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/local-run/{task_id}/slurm"))
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let (status, _) = send(&ctx, req).await;
        assert_eq!(status, StatusCode::OK);

        let req = Request::builder()
            .uri(format!("/api/status/{task_id}?username=alice"))
            .body(Body::empty())
            .unwrap();
        let (_, body) = send(&ctx, req).await;
        assert_eq!(body["task"]["status"], "running");
        assert_eq!(body["task"]["slurm_job_id"], "12345");
    }

    #[tokio::test]
    async fn list_tasks_filters_by_username_and_status() {
        let ctx = test_ctx();
        send(&ctx, local_run_request("alice")).await;
        send(&ctx, local_run_request("bob")).await;

        let req = Request::builder()
            .uri("/api/tasks?username=alice")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&ctx, req).await;
        assert_eq!(status, StatusCode::OK);
        let tasks = body["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["username"], "alice");
    }

    #[tokio::test]
    async fn health_reports_polling_state() {
        let ctx = test_ctx();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&ctx, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["polling_active"], false);
    }
}
