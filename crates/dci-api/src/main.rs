//! DCI API Server

use std::path::PathBuf;

use clap::Parser;
use dci_api::{AppState, routes};
use dci_config::{LogFormat, LoggingConfig, ServerConfig};
use dci_db::{create_pool, run_migrations};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dci-server")]
#[command(about = "DCI job scheduling API server", long_about = None)]
#[command(version)]
struct Args {
    /// Path to a KDL configuration file
    #[arg(long, env = "DCI_CONFIG")]
    config: Option<PathBuf>,

    /// Run database migrations before serving
    #[arg(long)]
    migrate: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured filter.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref())?;

    init_tracing(&config.logging);

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, config.database.max_connections).await?;
    info!("Database connected");

    if args.migrate {
        run_migrations(&pool).await?;
        info!("Migrations applied");
    }

    let state = AppState::postgres(pool);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!(bind = %config.server.bind, "Starting server");
    let listener = TcpListener::bind(config.server.bind.as_str()).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
