use crate::context::AppContext;
use crate::submitter::{read_logs, submit};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use broker_core::{
    BrokerError, CancelView, LogsView, RemoteStatusResponse, RemoteSubmitRequest,
    RemoteSubmitResponse, Target, Task, TaskStatus,
};
use serde::Deserialize;

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/submit", post(submit_handler))
        .route("/api/status/{slurm_job_id}", get(status))
        .route("/api/cancel/{slurm_job_id}", post(cancel))
        .route("/api/logs/{task_id}", get(logs))
        .route("/api/fetch/{task_id}", get(fetch))
        .route("/health", get(health))
        .with_state(ctx)
}

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

async fn submit_handler(
    State(ctx): State<AppContext>,
    Json(req): Json<RemoteSubmitRequest>,
) -> Result<Json<RemoteSubmitResponse>, ApiError> {
    let user_root = ctx.config.user_root(&req.username);
    let task = Task {
        task_id: req.task_id.clone(),
        username: req.username.clone(),
        target: Target::Local,
        status: TaskStatus::Pending,
        slurm_job_id: None,
        upload_root: user_root.to_string_lossy().into_owned(),
        ignore: vec![],
        workdir: req.workdir.clone(),
        commands: req.commands.clone(),
        logs_paths: vec![],
        results_paths: vec![],
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
    };
    let task = ctx.store.create_with_id(task)?;

    let slurm_job_id = match submit(&ctx, &task).await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(task_id = %task.task_id, error = %e, "remote submission failed");
            None
        }
    };
    Ok(Json(RemoteSubmitResponse { slurm_job_id }))
}

async fn status(
    State(ctx): State<AppContext>,
    Path(slurm_job_id): Path<String>,
) -> Result<Json<RemoteStatusResponse>, ApiError> {
    let task = ctx
        .store
        .get_by_slurm_job_id(&slurm_job_id)?
        .ok_or_else(|| BrokerError::NotFound(slurm_job_id.clone()))?;
    Ok(Json(RemoteStatusResponse {
        status: task.status.as_str().to_string(),
        exit_code: task.exit_code,
    }))
}

async fn cancel(
    State(ctx): State<AppContext>,
    Path(slurm_job_id): Path<String>,
) -> Result<Json<CancelView>, ApiError> {
    let task = ctx
        .store
        .get_by_slurm_job_id(&slurm_job_id)?
        .ok_or_else(|| BrokerError::NotFound(slurm_job_id.clone()))?;
    if !task.status.is_terminal() {
        let _ = slurm_adapter::cancel_job(&slurm_job_id).await;
        ctx.store.cancel(&task.task_id)?;
    }
    Ok(Json(CancelView { status: "canceled" }))
}

#[derive(Deserialize)]
struct UsernameQuery {
    username: Option<String>,
}

async fn logs(
    State(ctx): State<AppContext>,
    Path(task_id): Path<String>,
    Query(_q): Query<UsernameQuery>,
) -> Result<Json<LogsView>, ApiError> {
    let task = ctx
        .store
        .get(&task_id)?
        .ok_or_else(|| BrokerError::NotFound(task_id.clone()))?;
    let (stdout, stderr) = read_logs(&task.resolved_workdir(), &task.task_id).await;
    Ok(Json(LogsView { stdout, stderr }))
}

#[derive(Deserialize)]
struct FetchQuery {
    username: String,
    workdir: String,
    paths: String,
}

async fn fetch(
    State(ctx): State<AppContext>,
    Path(task_id): Path<String>,
    Query(q): Query<FetchQuery>,
) -> Result<Response, ApiError> {
    let paths: Vec<String> = serde_json::from_str(&q.paths).unwrap_or_default();
    let user_root = ctx.config.user_root(&q.username);
    let synthetic = Task {
        task_id: task_id.clone(),
        username: q.username.clone(),
        target: Target::Local,
        status: TaskStatus::Completed,
        slurm_job_id: None,
        upload_root: user_root.to_string_lossy().into_owned(),
        ignore: vec![],
        workdir: q.workdir.clone(),
        commands: vec![],
        logs_paths: paths,
        results_paths: vec![],
        gpus: 0,
        cpus: 1,
        memory: String::new(),
        time_limit: String::new(),
        partition: None,
        created_at: 0,
        updated_at: 0,
        started_at: None,
        completed_at: None,
        exit_code: None,
    };

    let dest = result_packager::default_archive_path(&ctx.config.data_dir, &task_id);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BrokerError::Internal(e.to_string()))?;
    }
    let dest_clone = dest.clone();
    tokio::task::spawn_blocking(move || result_packager::build_archive(&synthetic, &dest_clone))
        .await
        .map_err(|e| BrokerError::Internal(e.to_string()))?
        .map_err(|e| BrokerError::Internal(e.to_string()))?;

    let bytes = tokio::fs::read(&dest)
        .await
        .map_err(|e| BrokerError::Internal(e.to_string()))?;
    let filename = result_packager::archive_filename(&task_id);
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

async fn health(State(ctx): State<AppContext>) -> Json<broker_core::HealthView> {
    Json(broker_core::HealthView {
        status: "ok",
        polling_active: ctx
            .polling_active
            .load(std::sync::atomic::Ordering::SeqCst),
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
            data_dir: std::env::temp_dir().join(format!("remote-server-test-{}", broker_core::new_task_id())),
            poll_interval_secs: 5,
            remote_base_dir: std::env::temp_dir().join("remote-server-test-base"),
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

    /// `sbatch` is not present in the test environment, so a submit
    /// request fails at the scheduler boundary and the endpoint still
    /// answers with a null job id rather than surfacing a 500 (spec.md
    /// §6: submission failures are recorded on the task, not the
    /// response).
    #[tokio::test]
    async fn submit_without_scheduler_returns_null_job_id() {
        let ctx = test_ctx();
        let payload = serde_json::json!({
            "task_id": broker_core::new_task_id(),
            "username": "alice",
            "workdir": ".",
            "commands": ["echo hi"],
            "gpus": 0,
            "cpus": 1,
            "memory": "4G",
            "time_limit": "01:00:00",
            "partition": null,
        });
        let req = Request::builder()
            .method("POST")
            .uri("/api/submit")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let (status, body) = send(&ctx, req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["slurm_job_id"].is_null());
    }

    #[tokio::test]
    async fn status_for_unknown_job_is_not_found() {
        let ctx = test_ctx();
        let req = Request::builder()
            .uri("/api/status/99999")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&ctx, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_for_unknown_job_is_not_found() {
        let ctx = test_ctx();
        let req = Request::builder()
            .method("POST")
            .uri("/api/cancel/99999")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&ctx, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn logs_for_unknown_task_is_not_found() {
        let ctx = test_ctx();
        let req = Request::builder()
            .uri("/api/logs/does-not-exist")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&ctx, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
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
