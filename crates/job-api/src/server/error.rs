use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde_json::json;
use tracing::{error, warn};

use crate::{jobs::service::status_url, Error};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::Validation(message) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Invalid job request",
                    "message": message,
                }),
            ),
            Error::Conflict {
                job_name,
                namespace,
                current_status,
            } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "Job already exists",
                    "job_name": job_name,
                    "current_status": current_status,
                    "message": "Use replace_existing=true to delete and recreate, \
                                or use a different job_name",
                    "status_url": status_url(job_name, namespace),
                }),
            ),
            Error::NotFound(job_name) => (
                StatusCode::NOT_FOUND,
                json!({
                    "error": "Job not found",
                    "job_name": job_name,
                }),
            ),
            Error::KubeApi { code, reason, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": self.to_string(),
                    "message": "Kubernetes API error",
                    "status_code": code,
                    "reason": reason,
                }),
            ),
            Error::Timeout { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": self.to_string(),
                    "message": "Kubernetes API request timed out",
                }),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": self.to_string(),
                    "message": "Internal error",
                }),
            ),
        };

        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else if status != StatusCode::NOT_FOUND {
            warn!("Request rejected: {}", self);
        }

        (status, Json(body)).into_response()
    }
}
