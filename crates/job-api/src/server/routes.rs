use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::Server;
use crate::{
    jobs::{DeleteOutcome, ListFilters},
    metrics, Error, Result,
};

#[derive(Debug, Default, Deserialize)]
pub struct NamespaceQuery {
    pub namespace: Option<String>,
}

pub async fn health(State(server): State<Arc<Server>>) -> Json<Value> {
    Json(json!({ "status": "healthy", "service": server.service_name }))
}

pub async fn readiness(State(server): State<Arc<Server>>) -> Json<Value> {
    Json(json!({ "status": "ready", "service": server.service_name }))
}

pub async fn metrics() -> String {
    metrics::gather_metrics()
}

pub async fn create_job(
    State(server): State<Arc<Server>>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let Json(body) = body.map_err(|e| Error::Validation(e.body_text()))?;
    let created = server.jobs.create(&body).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Job created successfully",
            "job_name": created.job_name,
            "namespace": created.namespace,
            "replaced_existing": created.replaced_existing,
            "configuration": created.configuration,
            "status_url": created.status_url,
            "created_at": created.created_at,
        })),
    )
        .into_response())
}

pub async fn job_status(
    State(server): State<Arc<Server>>,
    Path(name): Path<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Response> {
    let report = server
        .jobs
        .get_status(query.namespace.as_deref(), &name)
        .await?;
    Ok(Json(report).into_response())
}

pub async fn list_jobs(
    State(server): State<Arc<Server>>,
    Query(filters): Query<ListFilters>,
) -> Result<Response> {
    let list = server.jobs.list(filters).await?;
    Ok(Json(list).into_response())
}

pub async fn delete_job(
    State(server): State<Arc<Server>>,
    Path(name): Path<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Response> {
    match server.jobs.delete(query.namespace.as_deref(), &name).await? {
        DeleteOutcome::Deleted => Ok(Json(json!({
            "message": "Job deleted successfully",
            "job_name": name,
        }))
        .into_response()),
        DeleteOutcome::AlreadyAbsent => {
            info!("Delete requested for absent job {}", name);
            Err(Error::NotFound(name))
        }
    }
}
