//! Sketchboard Relay Server
//!
//! Relays canvas events between clients registered on the same canvas.
//!
//! ## Protocol
//!
//! Every frame is one JSON object (a WebSocket text message, or one line on a
//! TCP stream):
//! ```json
//! { "type": "register", "canvas_id": "canvas-id" }
//! { "type": "ADD_SHAPE", "payload": { ... }, "timestamp": 1700000000000 }
//! { "type": "PING", "canvas_id": "canvas-id" }
//! ```
//! After `register` the server sends the canvas history as a JSON array of
//! event strings, then forwards every durable event to the other clients of
//! the canvas over either transport.

mod connection;
mod hub;

use anyhow::Context;
use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use clap::Parser;
use sketchboard_core::relay::StreamTransport;
use sketchboard_core::storage::{FileLogStorage, LogStorage};
use std::{future::IntoFuture, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use connection::{WsConnection, serve_connection};
use hub::Hub;

#[derive(Debug, Parser)]
#[command(name = "sketchboard-server", version, about = "Sketchboard relay server")]
struct Args {
    /// Address of the HTTP/WebSocket listener.
    #[arg(long, env = "SKETCHBOARD_WS_ADDR", default_value = "0.0.0.0:3030")]
    ws_addr: SocketAddr,

    /// Address of the newline-delimited JSON stream listener.
    #[arg(long, env = "SKETCHBOARD_STREAM_ADDR", default_value = "0.0.0.0:3031")]
    stream_addr: SocketAddr,

    /// Directory for persisted canvas logs. History is memory-only without it.
    #[arg(long, env = "SKETCHBOARD_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// History length per canvas above which it is compacted to its final state.
    #[arg(long, env = "SKETCHBOARD_MAX_HISTORY", default_value_t = 10_000)]
    max_history: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sketchboard_server=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let storage: Option<Arc<dyn LogStorage>> = match &args.log_dir {
        Some(dir) => {
            let storage = FileLogStorage::new(dir.clone())
                .with_context(|| format!("opening log directory {}", dir.display()))?;
            info!("Persisting canvas logs in {}", dir.display());
            Some(Arc::new(storage))
        }
        None => None,
    };
    let hub = Arc::new(Hub::new(args.max_history, storage));

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(hub.clone());

    let http = TcpListener::bind(args.ws_addr)
        .await
        .with_context(|| format!("binding {}", args.ws_addr))?;
    let stream = TcpListener::bind(args.stream_addr)
        .await
        .with_context(|| format!("binding {}", args.stream_addr))?;
    info!("Sketchboard relay server listening on {}", args.ws_addr);
    info!("WebSocket endpoint: ws://{}/ws", args.ws_addr);
    info!("Stream endpoint: tcp://{}", args.stream_addr);

    tokio::select! {
        served = axum::serve(http, app).into_future() => served.context("HTTP server failed")?,
        accepted = accept_streams(stream, hub) => accepted?,
    }
    Ok(())
}

/// Accept TCP clients speaking newline-delimited JSON.
async fn accept_streams(listener: TcpListener, hub: Arc<Hub>) -> anyhow::Result<()> {
    loop {
        let (socket, addr) = listener.accept().await.context("accepting stream client")?;
        if let Err(e) = socket.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {addr}: {e}");
        }
        info!("Stream client connected from {addr}");
        tokio::spawn(serve_connection(hub.clone(), StreamTransport::from_stream(socket)));
    }
}

/// Index page
async fn index() -> &'static str {
    "Sketchboard Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_connection(hub, WsConnection::new(socket)))
}
