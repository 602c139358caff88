mod api;
mod client;
mod input_filter;
mod ws;
mod ws_protocol;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::ws::AppState;

#[derive(Parser, Debug)]
#[command(name = "crewmux-web", about = "WebSocket streaming gateway for crewmux")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8788")]
    listen: SocketAddr,

    /// Path to the crewmux-server unix socket.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Allowed CORS origin; repeat for several, or "*" for any.
    #[arg(long = "allow-origin", default_value = "http://localhost:3000")]
    allow_origins: Vec<String>,

    /// Retry interval in seconds while a subscribed session is activating.
    #[arg(long, default_value_t = 3)]
    pending_retry_secs: u64,

    /// Give up on an activating session after this many seconds.
    #[arg(long, default_value_t = 60)]
    pending_deadline_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crewmux_web=info".into()),
        )
        .init();

    let args = Args::parse();
    let socket_path = args
        .socket
        .unwrap_or_else(crewmux_protocol::paths::default_socket_path);

    let state = Arc::new(AppState {
        socket_path,
        pending_retry: Duration::from_secs(args.pending_retry_secs),
        pending_deadline: Duration::from_secs(args.pending_deadline_secs),
    });

    let cors = build_cors(&args.allow_origins)?;

    let app = Router::new()
        .route("/api/sessions", get(api::list_sessions))
        .route("/api/tasks", get(api::list_tasks))
        .route("/api/schedules", get(api::list_schedules))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind web listener on {}", args.listen))?;

    tracing::info!("crewmux-web listening on http://{}", args.listen);
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_cors(origins: &[String]) -> Result<CorsLayer> {
    if origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any));
    }

    let mut headers = Vec::with_capacity(origins.len());
    for origin in origins {
        headers.push(
            HeaderValue::from_str(origin)
                .with_context(|| format!("invalid --allow-origin value: {origin}"))?,
        );
    }

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(headers))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any))
}
