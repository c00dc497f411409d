use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod db;
mod handlers;
mod hub;
mod models;
mod rules;
mod session;
mod store;
mod views;

use crate::config::Config;
use crate::db::Database;
use crate::hub::Hub;
use crate::store::Store;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "kingside")]
#[command(about = "Tiny shareable chess rooms over server-sent events")]
struct Cli {
    /// Host to bind to
    #[arg(short = 'b', long, default_value = "127.0.0.1")]
    host: String,

    /// Port for the web server
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// SQLite database URL (falls back to DATABASE_URL; empty = no storage)
    #[arg(long)]
    database: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config {
        host: cli.host,
        port: cli.port,
        database_url: config::resolve_database_url(
            cli.database,
            std::env::var("DATABASE_URL").ok(),
        ),
        debug: cli.debug,
    };

    // Setup logging
    let default_directive = if config.debug {
        "kingside=debug,tower_http=debug,info"
    } else {
        "kingside=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Kingside");

    let store = match &config.database_url {
        Some(url) => {
            info!("Using database at {url}");
            let db = Database::connect(url).await?;
            Store::new(db.pool)
        }
        None => {
            info!("No database configured, games live in memory only");
            Store::disabled()
        }
    };

    let hub = Hub::new(store);
    hub.clone().start_sweeper();
    let app_state = AppState { hub };

    let app = Router::new()
        .route("/", get(views::home_page))
        .route(
            "/new",
            get(handlers::create_game_redirect).post(handlers::create_game),
        )
        .route("/api/stats", get(handlers::stats))
        .route("/sse/{id}", get(handlers::game_stream))
        .route("/move/{id}", post(handlers::play_move))
        .route("/react/{id}", post(handlers::send_reaction))
        .route("/release/{id}", post(handlers::release_client))
        .route("/forget/{id}", post(handlers::forget_game))
        .route("/{id}", get(views::game_page))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = config.bind_addr().parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Kingside listening on http://{}", actual_addr);
    info!("");
    info!("Web UI: http://{}/", actual_addr);
    info!("API endpoints:");
    info!("  POST /new          - Create a game");
    info!("  GET  /sse/:id      - Subscribe to a game's event stream");
    info!("  POST /move/:id     - Make a move");
    info!("  POST /react/:id    - Send a reaction");
    info!("  POST /release/:id  - Free a seat");
    info!("  POST /forget/:id   - Abandon a game (owner only)");
    info!("  GET  /api/stats    - Aggregate counters");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
