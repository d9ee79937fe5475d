mod error;
mod routes;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{config::Config, jobs::JobService, Result};

pub struct Server {
    jobs: Arc<JobService>,
    service_name: String,
}

impl Server {
    pub fn new(config: &Config, jobs: Arc<JobService>) -> Self {
        Self {
            jobs,
            service_name: config.worker.manager_name.clone(),
        }
    }

    pub fn build_router(self) -> Router {
        let state = Arc::new(self);

        Router::new()
            .route("/health", get(routes::health))
            .route("/readiness", get(routes::readiness))
            .route("/metrics", get(routes::metrics))
            .route("/api/jobs", post(routes::create_job).get(routes::list_jobs))
            .route("/api/jobs/{name}", delete(routes::delete_job))
            .route("/api/jobs/{name}/status", get(routes::job_status))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
            .with_state(state)
    }

    pub async fn start(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Job API listening on {}", addr);

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
