//! HTTP gateway for AgentBus.
//!
//! Exposes the broker to out-of-process agents and hosts:
//! - `GET /health`: liveness
//! - `GET /v1/stats`: broker stats snapshot
//! - `GET /v1/agents`: agent directory
//! - `GET /v1/ws`: one broker connection per socket, JSON envelopes both ways

use agentbus_broker::{BrokerHandle, BrokerSender};
use agentbus_config::{AppConfig, GatewayConfig};
use agentbus_core::envelope::Envelope;
use axum::{
    Router,
    extract::State,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Shared state for the gateway.
#[derive(Clone)]
pub struct GatewayState {
    pub broker: BrokerHandle,
}

impl GatewayState {
    pub fn new(broker: BrokerHandle) -> Self {
        Self { broker }
    }
}

/// Build the axum router.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/stats", get(stats_handler))
        .route("/v1/agents", get(agents_handler))
        .route("/v1/ws", get(ws_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Spawn a broker for `config` and serve it until the listener fails.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let broker = BrokerHandle::spawn(&config.broker);
    info!(
        ring_capacity = config.broker.ring_capacity,
        connection_buffer = config.broker.connection_buffer,
        "Broker spawned"
    );
    serve(&config.gateway, broker).await
}

/// Serve an already running broker.
pub async fn serve(
    config: &GatewayConfig,
    broker: BrokerHandle,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    info!(addr = %addr, "Gateway starting");

    let app = build_router(GatewayState::new(broker));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats_handler(State(state): State<GatewayState>) -> Response {
    match state.broker.snapshot().await {
        Ok(snapshot) => Json(snapshot.stats).into_response(),
        Err(e) => unavailable(e),
    }
}

async fn agents_handler(State(state): State<GatewayState>) -> Response {
    match state.broker.snapshot().await {
        Ok(snapshot) => Json(serde_json::json!({ "agents": snapshot.agents })).into_response(),
        Err(e) => unavailable(e),
    }
}

fn unavailable(e: agentbus_core::error::Error) -> Response {
    warn!(error = %e, "Broker unavailable");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
        .into_response()
}

// ── WebSocket ─────────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state.broker))
}

async fn handle_ws_connection(socket: WebSocket, broker: BrokerHandle) {
    let connection = match broker.connect() {
        Ok(connection) => connection,
        Err(e) => {
            warn!(error = %e, "WebSocket refused: broker unavailable");
            return;
        }
    };
    let (sender, mut events) = connection.split();
    let connection_id = sender.id().clone();
    info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            event = events.recv() => {
                // None: the broker purged this connection.
                let Some(event) = event else { break };
                let envelope = match Envelope::encode(&event) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Unencodable broker event");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(envelope.to_json().into())).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !forward_frame(&sender, text.as_str()) {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue, // binary, ping, pong
                }
            }
        }
    }

    // Dropping `sender` disconnects from the broker.
    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Hand one text frame to the broker. Returns `false` once the broker is gone.
fn forward_frame(sender: &BrokerSender, text: &str) -> bool {
    let envelope = match Envelope::from_json(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(connection_id = %sender.id(), error = %e, "Dropping invalid WebSocket frame");
            return true;
        }
    };
    debug!(connection_id = %sender.id(), kind = %envelope.kind, "WebSocket frame");
    sender.send_envelope(envelope).is_ok()
}
