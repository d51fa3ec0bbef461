mod config;

use anyhow::Context;
use chrono::Utc;
use collector::Orchestrator;
use config::Config;
use datastore::{InMemoryRepository, Repository, SqliteRepository};
use live_chat_service::{create_service, proto::FILE_DESCRIPTOR_SET};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use youtube_client::{DataApiClient, ReplayClient};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_repository(path: &str) -> anyhow::Result<Arc<dyn Repository>> {
    if path == ":memory:" {
        info!("using in-memory store");
        return Ok(Arc::new(InMemoryRepository::new()));
    }
    let repo = SqliteRepository::open(path)
        .await
        .with_context(|| format!("opening database at {path}"))?;
    info!(path, "using sqlite store");
    Ok(Arc::new(repo))
}

async fn run_retention(
    orchestrator: Arc<Orchestrator>,
    window: chrono::Duration,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(err) = orchestrator.sweep_retention(Utc::now() - window).await {
            warn!(error = %err, "scheduled retention sweep failed");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("reading LIVECHAT_* configuration")?;
    init_tracing(config.log_json);

    let repo = open_repository(&config.database_path).await?;
    let client_config = config.client_config();
    let live = Arc::new(DataApiClient::new(&client_config)?);
    let replay = Arc::new(ReplayClient::new(&client_config)?);
    let orchestrator = Arc::new(Orchestrator::new(
        repo,
        live,
        replay,
        config.collector_config(),
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        let orchestrator = orchestrator.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for ctrl-c");
                return;
            }
            info!("shutdown requested");
            orchestrator.shutdown();
            shutdown.cancel();
        }
    });

    match config.retention_window() {
        Some(window) => {
            let every = Duration::from_secs(config.retention_interval_secs.max(1));
            tokio::spawn(run_retention(
                orchestrator.clone(),
                window,
                every,
                shutdown.clone(),
            ));
        }
        None => info!("periodic retention sweep disabled"),
    }

    let grpc_addr: SocketAddr = config
        .grpc_addr
        .parse()
        .with_context(|| format!("invalid gRPC address {}", config.grpc_addr))?;
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;
    let grpc = Server::builder()
        .add_service(create_service(orchestrator.clone()))
        .add_service(reflection_service)
        .serve_with_shutdown(grpc_addr, shutdown.clone().cancelled_owned());

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("binding control API to {}", config.http_addr))?;
    let router = control_service::create_router(orchestrator.clone());
    let http = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    info!(grpc = %grpc_addr, http = %config.http_addr, "server listening");
    let (grpc_result, http_result) = tokio::join!(grpc, async { http.await });

    orchestrator.shutdown();
    grpc_result.context("gRPC server")?;
    http_result.context("control API server")?;
    info!("server stopped");
    Ok(())
}
