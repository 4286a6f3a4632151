//! WebSocket transport for notebook clients.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use cellrun_core::Event;
use cellrun_engine::{Engine, EngineStatus};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{connection::Connection, protocol::ServerMessage};

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    pub engine: Arc<Engine>,
}

impl WsState {
    #[must_use]
    pub const fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    #[serde(flatten)]
    pub engine: EngineStatus,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let mut conn = Connection::new(state.engine, tx);
    let id = conn.id();
    tracing::info!("WebSocket {id} connected");

    // Forward engine events to the client in emission order
    let send_task = tokio::spawn(async move {
        let mut messages = UnboundedReceiverStream::new(rx).map(ServerMessage::from);
        while let Some(msg) = messages.next().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => conn.handle_text(text.as_str()),
            Ok(Message::Binary(data)) => conn.handle_binary(data.to_vec()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        }
    }

    drop(conn);
    send_task.abort();
    tracing::info!("WebSocket {id} disconnected");
}

/// Liveness of the engine.
pub async fn health_handler(State(state): State<WsState>) -> Json<Health> {
    let engine = state.engine.status();
    Json(Health {
        status: if engine.worker_alive { "ok" } else { "degraded" },
        engine,
    })
}

/// Create the router: WebSocket on `/` and `/ws`, health on `/health`.
#[must_use]
pub fn create_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(WsState::new(engine))
}
