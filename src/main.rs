use axum::extract::DefaultBodyLimit;
use clap::{Parser, Subcommand};
use epitrack::analytics::{self, AnalyticsState};
use epitrack::config::AppConfig;
use epitrack::records::handler as records_handler;
use epitrack::{loader, storage};
use axum::routing::{get, post, put};
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Parser)]
#[command(name = "epitrack", about = "Pandemic time-series store and analytics API")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Bulk-load a processed CSV export into the database
    Load {
        /// CSV file to load
        #[arg(long)]
        file: PathBuf,
        /// Override the source column for every row (e.g. covid, mpox)
        #[arg(long)]
        source: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "epitrack=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(Some(&cli.config))?;

    if let Err(msg) = config.validate() {
        eprintln!("Configuration error: {msg}");
        return Err(msg.into());
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Load { file, source } => {
            let summary = loader::run(&config, &file, source.as_deref())?;
            tracing::info!(
                inserted = summary.inserted,
                skipped = summary.skipped,
                file = %file.display(),
                "load finished"
            );
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        db = %config.database.path.display(),
        "starting epitrack"
    );

    // Setup SQLite pool
    let pool = storage::sqlite::create_pool(&config.database)?;
    storage::sqlite::init_pool(&pool).await?;
    tracing::info!("database initialized");

    let records_pool = Arc::new(pool.clone());
    let analytics_state = Arc::new(AnalyticsState::new(pool.clone(), config.analytics.clone()));

    // Rate limiter for mutating routes
    let governor_conf = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_second(config.rate_limit.per_second)
        .burst_size(config.rate_limit.burst_size)
        .finish()
        .expect("failed to build rate limiter config");

    // ── Health route ──
    let health_route = Router::new()
        .route("/health", get(records_handler::health))
        .with_state(records_pool.clone());

    // ── Record CRUD routes ──
    let read_routes = Router::new()
        .route("/api/historical-data", get(records_handler::list_records))
        .route(
            "/api/historical-data/filter",
            get(records_handler::filter_records),
        )
        .route(
            "/api/historical-data/country/{iso_code}",
            get(records_handler::country_records),
        )
        .route(
            "/api/historical-data/{id}",
            get(records_handler::get_record),
        )
        .with_state(records_pool.clone());

    let write_routes = Router::new()
        .route("/api/historical-data", post(records_handler::create_record))
        .route(
            "/api/historical-data/{id}",
            put(records_handler::update_record).delete(records_handler::delete_record),
        )
        .route_layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB is plenty for a single record
        .route_layer(GovernorLayer::new(governor_conf))
        .with_state(records_pool);

    // ── Analytics routes ──
    let analytics_routes = Router::new()
        .route(
            "/api/historical-data/aggregation",
            get(analytics::handler::aggregation),
        )
        .route(
            "/api/historical-data/stats",
            get(analytics::handler::stats),
        )
        .route("/api/historical-data/rt", get(analytics::handler::rt))
        .route(
            "/api/historical-data/mortality-rate",
            get(analytics::handler::mortality_rate),
        )
        .route(
            "/api/historical-data/geographic-spread",
            get(analytics::handler::geographic_spread),
        )
        .route(
            "/api/historical-data/ml-ready",
            get(analytics::handler::ml_ready),
        )
        .with_state(analytics_state);

    // CORS: the dashboard is served from another origin
    let cors = if config.server.cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::exact(
                config
                    .server
                    .cors_origin
                    .parse()
                    .expect("server.cors_origin must be a valid header value"),
            ))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    };

    let app = Router::new()
        .merge(health_route)
        .merge(read_routes)
        .merge(write_routes)
        .merge(analytics_routes)
        .layer(cors);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down...");
}
