use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use vox_core::ids::ClientId;
use vox_engine::manager::SharedSettings;
use vox_engine::SessionManager;
use vox_live::CredentialBroker;

use crate::client::{self, ClientRegistry};
use crate::forwarder;
use crate::handlers;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub broker: Arc<CredentialBroker>,
    pub client_registry: Arc<ClientRegistry>,
    pub command_tx: mpsc::Sender<(ClientId, String)>,
    pub settings: SharedSettings,
}

/// Build the Axum router with the WebSocket and REST routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::health))
        .route("/api/auth-status", get(handlers::auth_status))
        .route("/api/validate-token", post(handlers::validate_token))
        .route("/api/logout", post(handlers::logout))
        .route("/api/set-user-name", post(handlers::set_user_name))
        .route(
            "/api/system-instructions",
            get(handlers::get_system_instructions).post(handlers::set_system_instructions),
        )
        .route(
            "/api/clear-session-handle",
            post(handlers::clear_session_handle),
        )
        .route("/api/current-model", get(handlers::current_model))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the background
/// tasks alive.
pub async fn start(
    config: ServerConfig,
    manager: Arc<SessionManager>,
    broker: Arc<CredentialBroker>,
) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    let forwarder_handle =
        forwarder::start_forwarder(Arc::clone(&client_registry), manager.subscribe());

    let cleanup_handle = client::start_cleanup_task(
        Arc::clone(&client_registry),
        std::time::Duration::from_secs(60),
    );

    let (command_tx, command_rx) = mpsc::channel::<(ClientId, String)>(1024);
    let command_handle = tokio::spawn(handlers::process_commands(
        command_rx,
        Arc::clone(&manager),
        Arc::clone(&client_registry),
    ));

    let state = AppState {
        settings: manager.settings(),
        manager,
        broker,
        client_registry: Arc::clone(&client_registry),
        command_tx,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "vox server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _forwarder: forwarder_handle,
        _commands: command_handle,
        _cleanup: cleanup_handle,
    })
}

/// Keeps the server's background tasks alive for the process lifetime.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _forwarder: tokio::task::JoinHandle<()>,
    _commands: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    tracing::info!(client_id = %client_id, "client connected");

    client::handle_ws_connection(
        socket,
        client_id,
        rx,
        state.client_registry,
        state.command_tx,
    )
    .await;
}
