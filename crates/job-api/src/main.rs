use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use indexer_job_api::{
    config::{Config, OrchestratorBackend},
    jobs::JobService,
    kubernetes::{InMemoryOrchestrator, KubeOrchestrator, Orchestrator},
    server::Server,
};

#[derive(Parser, Debug)]
#[command(name = "indexer-job-api")]
#[command(about = "HTTP API for batch indexing jobs on Kubernetes")]
struct Args {
    /// Address to listen on (overrides SERVER_ADDR)
    #[arg(long)]
    addr: Option<String>,

    /// Orchestrator backend: kubernetes or memory (overrides ORCHESTRATOR_BACKEND)
    #[arg(long)]
    backend: Option<OrchestratorBackend>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let mut config = Config::load()?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(backend) = args.backend {
        config.execution.backend = backend;
    }
    info!("Loaded configuration: {:?}", config);

    let orchestrator: Arc<dyn Orchestrator> = match config.execution.backend {
        OrchestratorBackend::Kubernetes => {
            Arc::new(KubeOrchestrator::try_default(&config.kube).await?)
        }
        OrchestratorBackend::Memory => {
            warn!("Using the in-memory orchestrator; jobs will not run and are lost on exit");
            Arc::new(InMemoryOrchestrator::new())
        }
    };

    let jobs = Arc::new(JobService::new(orchestrator, &config));
    let server = Server::new(&config, jobs);

    info!("Starting server on {}", config.server.addr);
    server.start(&config.server.addr).await?;

    Ok(())
}
