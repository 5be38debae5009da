//! Polling triad for one job kind:
//!
//! ```text
//! POST /jobs                  202 {job_id, status}   | 400
//! GET  /jobs/:job_id          200 status view        | 404
//! GET  /jobs/:job_id/result   200 result             | 404 | 425 | 500
//! ```
//!
//! Mount one router per kind, e.g. under `/analysis` and `/ingestion`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::error::JobError;
use crate::job::{JobId, JobStatus};
use crate::pipeline::JobSubmitter;
use crate::poller::JobPoller;

#[derive(Clone)]
struct JobRoutesState {
    poller: JobPoller,
    submitter: Arc<dyn JobSubmitter>,
}

/// Routes for `submitter`'s job kind. Jobs of any other kind poll as not
/// found.
pub fn job_routes(poller: JobPoller, submitter: Arc<dyn JobSubmitter>) -> Router {
    let poller = poller.scoped(submitter.kind());
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:job_id", get(job_status))
        .route("/jobs/:job_id/result", get(job_result))
        .with_state(JobRoutesState { poller, submitter })
}

async fn submit_job(
    State(state): State<JobRoutesState>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return json_error(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match state.submitter.submit(request).await {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "job_id": job_id,
                "status": JobStatus::Initiated,
            })),
        )
            .into_response(),
        Err(err) => job_error_response(err),
    }
}

async fn job_status(State(state): State<JobRoutesState>, Path(job_id): Path<String>) -> Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(job_id) => job_id,
        Err(response) => return response,
    };

    match state.poller.get_status(job_id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => job_error_response(err),
    }
}

async fn job_result(State(state): State<JobRoutesState>, Path(job_id): Path<String>) -> Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(job_id) => job_id,
        Err(response) => return response,
    };

    match state.poller.get_result(job_id).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => job_error_response(err),
    }
}

/// Unparsable ids cannot name a job, so they poll as not found.
fn parse_job_id(raw: &str) -> Result<JobId, Response> {
    raw.parse::<JobId>()
        .map_err(|_| json_error(StatusCode::NOT_FOUND, format!("job {raw} not found")))
}

fn too_early() -> StatusCode {
    StatusCode::from_u16(425).unwrap_or(StatusCode::ACCEPTED)
}

pub(crate) fn job_error_response(err: JobError) -> Response {
    match err {
        JobError::Validation(message) => json_error(StatusCode::BAD_REQUEST, message),
        JobError::NotFound(_) => json_error(StatusCode::NOT_FOUND, err.to_string()),
        JobError::NotReady { job_id, status } => (
            too_early(),
            Json(json!({
                "job_id": job_id,
                "status": status,
                "error": "job has not finished",
            })),
        )
            .into_response(),
        JobError::Failed { job_id, message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "job_id": job_id,
                "status": JobStatus::Error,
                "error_message": message,
            })),
        )
            .into_response(),
        JobError::Internal(source) => {
            tracing::error!(error = %format!("{source:#}"), "request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
        other @ (JobError::StaleProgress { .. }
        | JobError::InvalidTransition { .. }
        | JobError::Terminal { .. }) => json_error(StatusCode::CONFLICT, other.to_string()),
    }
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_maps_to_425() {
        let response = job_error_response(JobError::NotReady {
            job_id: JobId::new(),
            status: JobStatus::Processing,
        });
        assert_eq!(response.status().as_u16(), 425);
    }

    #[test]
    fn error_mapping() {
        assert_eq!(
            job_error_response(JobError::validation("bad")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            job_error_response(JobError::NotFound(JobId::new())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            job_error_response(JobError::Failed {
                job_id: JobId::new(),
                message: "boom".into()
            })
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            job_error_response(JobError::Internal(anyhow::anyhow!("store down"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn garbage_id_is_not_found() {
        let response = parse_job_id("not-a-uuid").unwrap_err();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
