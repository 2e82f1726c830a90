use std::net::SocketAddr;

use anyhow::Context;
use inventory_snapshot::config::Config;
use inventory_snapshot::db::create_pool;
use inventory_snapshot::middleware::AuthLayer;
use inventory_snapshot::proto::backup::backup_service_server::BackupServiceServer;
use inventory_snapshot::proto::health::health_server::HealthServer;
use inventory_snapshot::services::{BackupServiceImpl, HealthServiceImpl};
use inventory_snapshot::snapshot::{SnapshotLoader, SnapshotWriter};
use inventory_snapshot::storage::open_backend;

use tonic::transport::Server;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inventory_snapshot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    let jwt_secret = config
        .jwt_secret
        .clone()
        .context("JWT_SECRET must be set for the server")?;

    tracing::info!("Starting inventory-snapshot gRPC server...");
    tracing::info!("Opening database {}", config.database_url);

    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database ready");

    let storage = open_backend(&config)?;

    // Create services
    let writer = SnapshotWriter::new(pool.clone(), storage.clone());
    let loader = SnapshotLoader::new(pool.clone(), storage)
        .with_staging_root(config.staging_dir.clone());
    let backup_service = BackupServiceServer::new(BackupServiceImpl::new(writer, loader))
        .max_decoding_message_size(config.max_message_bytes)
        .max_encoding_message_size(config.max_message_bytes);
    let health_service = HealthServiceImpl::new();

    // CORS layer for gRPC-Web
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any)
        .expose_headers(Any);

    let addr: SocketAddr = config.server_addr().parse()?;
    tracing::info!("Listening on {}", addr);

    // Build and run server with gRPC-Web support
    Server::builder()
        .accept_http1(true) // Required for gRPC-Web
        .layer(TraceLayer::new_for_grpc())
        .layer(cors)
        .layer(tonic_web::GrpcWebLayer::new()) // Enable gRPC-Web
        .layer(AuthLayer::new(pool, jwt_secret))
        .add_service(backup_service)
        .add_service(HealthServer::new(health_service))
        .serve(addr)
        .await?;

    Ok(())
}
