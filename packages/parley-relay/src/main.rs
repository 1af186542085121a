//! Parley Relay Server
//!
//! A small WebSocket relay that brokers WebRTC call setup between browser
//! clients:
//!
//! 1. **Session registry**: each client registers a user id; the most
//!    recent connection for a user wins.
//!
//! 2. **Envelope routing**: `offer`, `answer`, `ice-candidate`,
//!    `call-end` and `call-reject` envelopes are forwarded to the
//!    registered recipient with `from` stamped by the relay.
//!
//! The relay never interprets call state and never queues: an envelope
//! for an offline user is dropped and, by default, the sender is told.

mod handler;
mod protocol;
mod registry;
mod router;
mod state;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::{RelayConfig, RelayState};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "parley-relay", version, about = "Parley call-signaling relay")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "RELAY_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "RELAY_PORT")]
    port: u16,

    /// Largest accepted WebSocket message, in bytes
    #[arg(long, default_value_t = 65536, env = "RELAY_MAX_MESSAGE_BYTES")]
    max_message_bytes: usize,

    /// Send a `peer-unavailable` notice when an envelope's recipient is offline
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "RELAY_NOTIFY_UNAVAILABLE")]
    notify_unavailable: bool,

    /// Close a connection once a newer one registers the same user id
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "RELAY_CLOSE_SUPERSEDED")]
    close_superseded: bool,

    /// Broadcast online/offline presence to all registered clients
    #[arg(long, env = "RELAY_BROADCAST_PRESENCE")]
    broadcast_presence: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "RELAY_LOG_JSON")]
    log_json: bool,
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            max_message_bytes: args.max_message_bytes,
            notify_unavailable: args.notify_unavailable,
            close_superseded: args.close_superseded,
            broadcast_presence: args.broadcast_presence,
        }
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "parley_relay=info,tower_http=info".into());
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = RelayConfig::from(args);
    tracing::info!(
        notify_unavailable = config.notify_unavailable,
        close_superseded = config.close_superseded,
        broadcast_presence = config.broadcast_presence,
        "Relay configured"
    );

    let addr = format!("{}:{}", config.host, config.port);
    let state = RelayState::new(config);

    tracing::info!("Parley relay server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app(state))
        .await
        .expect("Server error");
}

/// Build the HTTP router.
fn app(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    let max = state.config.max_message_bytes;
    ws.max_message_size(max)
        .on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "parley-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "online_clients": state.online_count(),
        "uptime_secs": state.uptime_secs(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = app(RelayState::new(RelayConfig::default()));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "parley-relay");
    }

    #[tokio::test]
    async fn test_stats_endpoint_counts_clients() {
        let state = RelayState::new(RelayConfig::default());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        state
            .registry
            .register("alice", registry::ConnectionHandle::new(tx));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = app(state);
        tokio::spawn(async move {
            axum::serve(listener, server).await.unwrap();
        });

        let body: serde_json::Value = reqwest::get(format!("http://{}/stats", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["online_clients"], 1);
    }

    #[test]
    fn test_args_map_to_config() {
        let args = Args::parse_from([
            "parley-relay",
            "--port",
            "9001",
            "--notify-unavailable",
            "false",
            "--broadcast-presence",
        ]);
        let config = RelayConfig::from(args);
        assert_eq!(config.port, 9001);
        assert!(!config.notify_unavailable);
        assert!(config.close_superseded);
        assert!(config.broadcast_presence);
    }

    #[test]
    fn test_args_defaults_match_config_defaults() {
        let config = RelayConfig::from(Args::parse_from(["parley-relay"]));
        let defaults = RelayConfig::default();
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.host, defaults.host);
        assert_eq!(config.max_message_bytes, defaults.max_message_bytes);
        assert_eq!(config.notify_unavailable, defaults.notify_unavailable);
        assert_eq!(config.close_superseded, defaults.close_superseded);
        assert_eq!(config.broadcast_presence, defaults.broadcast_presence);
    }
}
