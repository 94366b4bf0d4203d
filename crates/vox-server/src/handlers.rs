use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vox_core::events::{BridgeEvent, ClientCommand};
use vox_core::ids::ClientId;
use vox_core::prompt::{DEFAULT_INSTRUCTIONS, DEFAULT_USER_NAME};
use vox_engine::SessionManager;

use crate::client::ClientRegistry;
use crate::server::AppState;

/// Consume raw WebSocket messages from all clients and dispatch the typed
/// commands into the engine. Malformed messages never kill the loop.
pub async fn process_commands(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    manager: Arc<SessionManager>,
    registry: Arc<ClientRegistry>,
) {
    while let Some((client_id, raw)) = rx.recv().await {
        let command: ClientCommand = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "unparseable command dropped");
                continue;
            }
        };
        handle_command(&manager, &registry, client_id, command);
    }
}

fn handle_command(
    manager: &SessionManager,
    registry: &ClientRegistry,
    client_id: ClientId,
    command: ClientCommand,
) {
    let session_id = command.session_id();
    match command {
        ClientCommand::StartSession { .. } => {
            manager.start(session_id, client_id);
        }

        ClientCommand::StopSession { .. } => {
            manager.stop(&session_id);
        }

        ClientCommand::CheckStatus { .. } => {
            let event = BridgeEvent::SessionStatus {
                active: manager.is_active(&session_id),
            };
            if let Ok(json) = serde_json::to_string(&event) {
                registry.send_to(&client_id, json);
            }
        }

        ClientCommand::SendAudio { audio, .. } => match decode_payload(&audio) {
            Ok(data) => manager.push_audio(&session_id, data),
            Err(e) => warn!(session_id = %session_id, error = %e, "bad audio payload dropped"),
        },

        ClientCommand::SendCameraFrame { frame, .. } => match decode_payload(&frame) {
            Ok(data) => manager.push_video(&session_id, data),
            Err(e) => warn!(session_id = %session_id, error = %e, "bad camera frame dropped"),
        },

        ClientCommand::SendTextMessage { text, .. } => {
            manager.push_text(&session_id, text);
        }

        ClientCommand::ClearSessionHandle { .. } => {
            if let Err(e) = manager.clear_handle(&session_id) {
                warn!(session_id = %session_id, error = %e, "handle clear failed");
            }
        }
    }
}

fn decode_payload(b64: &str) -> Result<Bytes, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map(Bytes::from)
}

// --- REST handlers ---

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

pub async fn auth_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "authenticated": state.broker.is_authenticated(),
        "email": state.broker.email(),
    }))
}

#[derive(Deserialize)]
pub struct ValidateTokenBody {
    pub token: String,
}

pub async fn validate_token(
    State(state): State<AppState>,
    Json(body): Json<ValidateTokenBody>,
) -> impl IntoResponse {
    match state.broker.adopt_token(&body.token).await {
        Ok(email) => (
            StatusCode::OK,
            Json(json!({ "success": true, "email": email })),
        ),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.wire_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (
                status,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
        }
    }
}

pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    state.broker.logout();
    Json(json!({ "success": true }))
}

#[derive(Deserialize)]
pub struct SetUserNameBody {
    pub user_name: String,
}

pub async fn set_user_name(
    State(state): State<AppState>,
    Json(body): Json<SetUserNameBody>,
) -> impl IntoResponse {
    let name = body.user_name.trim();
    let name = if name.is_empty() {
        DEFAULT_USER_NAME
    } else {
        name
    };
    state.settings.write().user_name = name.to_string();
    debug!(user_name = name, "user name updated");
    Json(json!({ "success": true, "user_name": name }))
}

pub async fn get_system_instructions(State(state): State<AppState>) -> impl IntoResponse {
    let instructions = state.settings.read().custom_instructions.clone();
    Json(json!({ "instructions": instructions }))
}

#[derive(Deserialize)]
pub struct SetInstructionsBody {
    pub instructions: String,
}

pub async fn set_system_instructions(
    State(state): State<AppState>,
    Json(body): Json<SetInstructionsBody>,
) -> impl IntoResponse {
    let instructions = body.instructions.trim();
    let instructions = if instructions.is_empty() {
        DEFAULT_INSTRUCTIONS
    } else {
        instructions
    };
    state.settings.write().custom_instructions = instructions.to_string();
    Json(json!({ "success": true }))
}

#[derive(Deserialize)]
pub struct ClearHandleBody {
    pub session_id: Option<String>,
}

pub async fn clear_session_handle(
    State(state): State<AppState>,
    Json(body): Json<ClearHandleBody>,
) -> impl IntoResponse {
    let session_id =
        vox_core::ids::SessionId::from_raw(body.session_id.as_deref().unwrap_or("default"));
    match state.manager.clear_handle(&session_id) {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn current_model(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "model": state.manager.connector_model() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_core::prompt::PromptSettings;
    use vox_live::mock::{MockConnector, MockScript};
    use vox_store::{Database, HandleStore, TranscriptRepo};

    fn manager(scripts: Vec<MockScript>) -> Arc<SessionManager> {
        let db = Database::in_memory().unwrap();
        Arc::new(SessionManager::new(
            Arc::new(MockConnector::new(scripts)),
            Arc::new(HandleStore::new(db.clone())),
            Arc::new(TranscriptRepo::new(db)),
            PromptSettings::default(),
        ))
    }

    #[tokio::test]
    async fn status_query_replies_directly_to_the_asker() {
        let manager = manager(vec![]);
        let registry = ClientRegistry::new(32);
        let (client_id, mut rx) = registry.register();

        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"check_session_status","session_id":"s1"}"#).unwrap();
        handle_command(&manager, &registry, client_id, cmd);

        let msg = rx.try_recv().unwrap();
        assert!(msg.contains("\"type\":\"session_status\""));
        assert!(msg.contains("\"active\":false"));
    }

    #[tokio::test]
    async fn malformed_base64_audio_is_dropped() {
        let manager = manager(vec![]);
        let registry = ClientRegistry::new(32);
        let (client_id, _rx) = registry.register();

        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"send_audio","session_id":"s1","audio":"!!!not-base64!!!"}"#,
        )
        .unwrap();
        // Must not panic or kill anything.
        handle_command(&manager, &registry, client_id, cmd);
    }

    #[tokio::test]
    async fn text_message_for_unknown_session_is_silent() {
        let manager = manager(vec![]);
        let registry = ClientRegistry::new(32);
        let (client_id, _rx) = registry.register();

        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"send_text_message","session_id":"ghost","text":"anyone there?"}"#,
        )
        .unwrap();
        handle_command(&manager, &registry, client_id, cmd);
    }

    #[tokio::test]
    async fn unparseable_command_does_not_kill_the_loop() {
        let manager = manager(vec![]);
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = mpsc::channel(8);

        let task = tokio::spawn(process_commands(rx, manager, Arc::clone(&registry)));

        let (client_id, mut client_rx) = registry.register();
        tx.send((client_id.clone(), "garbage".to_string()))
            .await
            .unwrap();
        tx.send((
            client_id,
            r#"{"type":"check_session_status","session_id":"s1"}"#.to_string(),
        ))
        .await
        .unwrap();

        let msg = tokio::time::timeout(std::time::Duration::from_secs(1), client_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(msg.contains("session_status"));

        drop(tx);
        task.await.unwrap();
    }

    #[test]
    fn decode_payload_roundtrip() {
        let data = decode_payload("AQID").unwrap();
        assert_eq!(data.as_ref(), &[1, 2, 3]);
        assert!(decode_payload("???").is_err());
    }
}
