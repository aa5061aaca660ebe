//! JSON-over-HTTP front end for the job service.
//!
//! Every operation is a `POST` to `/<OperationName>`. Successful calls answer
//! `200` with a `result` field; failures answer `{"error": "..."}` with a
//! status derived from the [`JobError`] kind.

use std::net::SocketAddr;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::JobError;
use crate::jobs::JobSpec;
use crate::refresh::SecuritySnapshots;
use crate::service::JobService;
use crate::workload::ScriptExecution;

#[derive(Clone)]
pub struct ApiState {
    pub service: JobService,
    pub security: SecuritySnapshots,
}

#[derive(Debug, Deserialize)]
pub struct JobRequest {
    pub job: JobSpec,
    #[serde(default)]
    pub script: ScriptExecution,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(rename = "jobId", alias = "jobID", default)]
    pub job_id: String,
    #[serde(default)]
    pub script: ScriptExecution,
}

#[derive(Debug, Deserialize)]
pub struct JobIdRequest {
    #[serde(rename = "jobId", alias = "jobID", default)]
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RenewLeaseRequest {
    #[serde(rename = "jobId", alias = "jobID", default)]
    pub job_id: String,
    #[serde(rename = "expirationInSeconds")]
    pub lease_secs: f64,
}

/// Error body plus status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        let status = match err {
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::AlreadyExists(_) => StatusCode::CONFLICT,
            JobError::TimedOut(_) => StatusCode::REQUEST_TIMEOUT,
            JobError::Closed(_) => StatusCode::GONE,
            JobError::Teardown(_) | JobError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            JobError::ExecutionFailure(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn success(result: impl serde::Serialize) -> ApiResult {
    Ok(Json(json!({ "success": true, "result": result })))
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/HelloWorld", post(hello_world_handler))
        .route("/GetVersion", post(get_version_handler))
        .route("/GetStatus", post(get_status_handler))
        .route("/OpenJob", post(open_job_handler))
        .route("/Execute", post(execute_handler))
        .route("/CloseJob", post(close_job_handler))
        .route("/BatchJob", post(batch_job_handler))
        .route("/RenewLease", post(renew_lease_handler))
        .route("/GetExpiration", post(get_expiration_handler))
        .route("/GetAllJobs", post(get_all_jobs_handler))
        .route("/CloseExpiredJobs", post(close_expired_jobs_handler))
        .route("/CloseAllJobs", post(close_all_jobs_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown` fires.
pub async fn run_api(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Job API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn hello_world_handler() -> ApiResult {
    success("Hello World from gridjob")
}

async fn get_version_handler() -> ApiResult {
    success(env!("CARGO_PKG_VERSION"))
}

async fn get_status_handler(State(state): State<ApiState>) -> ApiResult {
    let status = state.service.status().await;
    success(json!({
        "version": status.version,
        "environmentCount": status.environment_count,
        "livenessReporting": status.liveness_reporting,
        "beats": status.beats,
        "lastBeatAgeMs": status.last_beat_age_ms,
        "securityVersions": state.security.security_versions().len(),
        "contentHashes": state.security.content_hashes().len(),
        "memHashConfigs": state.security.mem_hashes().len(),
    }))
}

async fn open_job_handler(
    State(state): State<ApiState>,
    body: Result<Json<JobRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    let job_id = request.job.id.clone();
    let result = state.service.open_job(request.job, request.script).await?;
    Ok(Json(json!({ "success": true, "jobId": job_id, "result": result })))
}

async fn execute_handler(
    State(state): State<ApiState>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    let timeout = state.service.config().execute_timeout();
    let result = state
        .service
        .execute_with_timeout(&request.job_id, request.script, timeout)
        .await?;
    success(result)
}

async fn close_job_handler(
    State(state): State<ApiState>,
    body: Result<Json<JobIdRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    match state.service.close_job(&request.job_id, None).await {
        Ok(_) => Ok(Json(json!({ "success": true }))),
        Err(e) => Err(e.into()),
    }
}

async fn batch_job_handler(
    State(state): State<ApiState>,
    body: Result<Json<JobRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    let result = state.service.batch_job(request.job, request.script).await?;
    success(result)
}

async fn renew_lease_handler(
    State(state): State<ApiState>,
    body: Result<Json<RenewLeaseRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    state
        .service
        .renew_lease(&request.job_id, request.lease_secs)
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn get_expiration_handler(
    State(state): State<ApiState>,
    body: Result<Json<JobIdRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    success(state.service.get_expiration(&request.job_id).await?)
}

async fn get_all_jobs_handler(State(state): State<ApiState>) -> ApiResult {
    success(state.service.get_all_jobs().await)
}

async fn close_expired_jobs_handler(State(state): State<ApiState>) -> ApiResult {
    success(state.service.close_expired_jobs().await)
}

async fn close_all_jobs_handler(State(state): State<ApiState>) -> ApiResult {
    success(state.service.close_all_jobs().await)
}
