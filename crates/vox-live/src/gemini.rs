use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use vox_core::errors::LiveError;
use vox_core::live::{
    LiveConnectConfig, LiveConnection, LiveConnector, LiveEventStream, LiveSender, Sensitivity,
};
use vox_core::stream::{LiveEvent, TurnPart};

use crate::auth::CredentialBroker;

pub const DEFAULT_MODEL: &str = "gemini-live-2.5-flash-preview-native-audio";
pub const DEFAULT_LOCATION: &str = "us-central1";

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket connector for the Vertex Live API.
///
/// Each `connect` opens a fresh bidirectional stream: sends the setup
/// message, waits for `setupComplete`, then hands back the split halves.
pub struct GeminiLive {
    broker: Arc<CredentialBroker>,
    model: String,
    location: String,
}

impl GeminiLive {
    pub fn new(broker: Arc<CredentialBroker>) -> Self {
        Self {
            broker,
            model: DEFAULT_MODEL.to_string(),
            location: DEFAULT_LOCATION.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "wss://{}-aiplatform.googleapis.com/ws/google.cloud.aiplatform.v1beta1.LlmBidiService/BidiGenerateContent",
            self.location
        )
    }

    fn model_path(&self, project: &str) -> String {
        format!(
            "projects/{}/locations/{}/publishers/google/models/{}",
            project, self.location, self.model
        )
    }
}

#[async_trait]
impl LiveConnector for GeminiLive {
    fn name(&self) -> &str {
        "gemini-live"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn connect(&self, config: &LiveConnectConfig) -> Result<LiveConnection, LiveError> {
        let creds = self.broker.active().ok_or_else(|| {
            LiveError::AuthenticationRequired("no credentials available".into())
        })?;
        let project = creds.project_id.clone().ok_or_else(|| {
            LiveError::ConnectFailed("no cloud project configured".into())
        })?;
        let bearer = self
            .broker
            .bearer()
            .ok_or_else(|| LiveError::AuthenticationRequired("no access token".into()))?;

        let mut request = self
            .endpoint()
            .into_client_request()
            .map_err(|e| LiveError::ConnectFailed(format!("bad endpoint: {e}")))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| LiveError::ConnectFailed(format!("bad auth header: {e}")))?,
        );

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| LiveError::ConnectFailed(format!("websocket connect: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let setup = build_setup(&self.model_path(&project), config);
        let setup_json = serde_json::to_string(&setup)
            .map_err(|e| LiveError::ConnectFailed(format!("encode setup: {e}")))?;
        sink.send(Message::text(setup_json))
            .await
            .map_err(|e| LiveError::ConnectFailed(format!("send setup: {e}")))?;

        // First server frame must acknowledge the setup.
        match stream.next().await {
            Some(Ok(msg)) => {
                let text = message_text(&msg);
                let parsed: ServerMessage = serde_json::from_str(&text)
                    .map_err(|e| LiveError::ConnectFailed(format!("setup response: {e}")))?;
                if parsed.setup_complete.is_none() {
                    return Err(LiveError::ConnectFailed(
                        "expected setupComplete, got something else".into(),
                    ));
                }
            }
            Some(Err(e)) => {
                return Err(LiveError::ConnectFailed(format!("setup handshake: {e}")))
            }
            None => {
                return Err(LiveError::ConnectFailed(
                    "connection closed during setup".into(),
                ))
            }
        }

        info!(model = %self.model, resumed = config.resumption_handle.is_some(), "live connection established");

        let events: LiveEventStream = Box::pin(
            stream.flat_map(|msg| futures::stream::iter(decode_ws_message(msg))),
        );

        Ok(LiveConnection {
            sender: Box::new(GeminiSender { sink }),
            events,
        })
    }
}

struct GeminiSender {
    sink: WsSink,
}

impl GeminiSender {
    async fn send_json(&mut self, value: serde_json::Value) -> Result<(), LiveError> {
        self.sink
            .send(Message::text(value.to_string()))
            .await
            .map_err(|e| LiveError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl LiveSender for GeminiSender {
    async fn send_audio(&mut self, data: Bytes, mime_type: &str) -> Result<(), LiveError> {
        self.send_json(realtime_chunk(&data, mime_type)).await
    }

    async fn send_video(&mut self, data: Bytes, mime_type: &str) -> Result<(), LiveError> {
        self.send_json(realtime_chunk(&data, mime_type)).await
    }

    async fn send_turn(&mut self, text: &str) -> Result<(), LiveError> {
        self.send_json(serde_json::json!({
            "clientContent": {
                "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                "turnComplete": true,
            }
        }))
        .await
    }
}

fn realtime_chunk(data: &[u8], mime_type: &str) -> serde_json::Value {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    serde_json::json!({
        "realtimeInput": {
            "mediaChunks": [{ "mimeType": mime_type, "data": encoded }]
        }
    })
}

// --- setup message ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupMessage {
    setup: Setup,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    realtime_input_config: RealtimeInputConfig,
    session_resumption: SessionResumption,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Empty>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<vox_core::live::ResponseModality>,
    speech_config: SpeechConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Serialize)]
struct TextPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputConfig {
    automatic_activity_detection: AutomaticActivityDetection,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AutomaticActivityDetection {
    start_of_speech_sensitivity: &'static str,
    end_of_speech_sensitivity: &'static str,
    prefix_padding_ms: u32,
    silence_duration_ms: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResumption {
    #[serde(skip_serializing_if = "Option::is_none")]
    handle: Option<String>,
    transparent: bool,
}

#[derive(Serialize, Deserialize, Debug)]
struct Empty {}

fn start_sensitivity_wire(s: Sensitivity) -> &'static str {
    match s {
        Sensitivity::Low => "START_SENSITIVITY_LOW",
        Sensitivity::High => "START_SENSITIVITY_HIGH",
    }
}

fn end_sensitivity_wire(s: Sensitivity) -> &'static str {
    match s {
        Sensitivity::Low => "END_SENSITIVITY_LOW",
        Sensitivity::High => "END_SENSITIVITY_HIGH",
    }
}

fn build_setup(model_path: &str, config: &LiveConnectConfig) -> SetupMessage {
    let system_instruction = if config.system_instruction.is_empty() {
        None
    } else {
        Some(Content {
            parts: vec![TextPart {
                text: config.system_instruction.clone(),
            }],
        })
    };

    SetupMessage {
        setup: Setup {
            model: model_path.to_string(),
            generation_config: GenerationConfig {
                response_modalities: config.response_modalities.clone(),
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction,
            realtime_input_config: RealtimeInputConfig {
                automatic_activity_detection: AutomaticActivityDetection {
                    start_of_speech_sensitivity: start_sensitivity_wire(
                        config.activity_detection.start_sensitivity,
                    ),
                    end_of_speech_sensitivity: end_sensitivity_wire(
                        config.activity_detection.end_sensitivity,
                    ),
                    prefix_padding_ms: config.activity_detection.prefix_padding_ms,
                    silence_duration_ms: config.activity_detection.silence_duration_ms,
                },
            },
            session_resumption: SessionResumption {
                handle: config.resumption_handle.clone(),
                transparent: config.transparent_resumption,
            },
            input_audio_transcription: config.input_audio_transcription.then_some(Empty {}),
            output_audio_transcription: config.output_audio_transcription.then_some(Empty {}),
        },
    }
}

// --- server messages ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<Empty>,
    server_content: Option<ServerContent>,
    session_resumption_update: Option<ResumptionUpdate>,
    go_away: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ResumptionUpdate {
    new_handle: Option<String>,
    #[serde(default)]
    resumable: bool,
}

#[derive(Deserialize, Debug)]
struct Transcription {
    #[serde(default)]
    text: String,
}

fn message_text(msg: &Message) -> String {
    match msg {
        Message::Text(t) => t.to_string(),
        Message::Binary(b) => String::from_utf8_lossy(b).into_owned(),
        _ => String::new(),
    }
}

fn decode_ws_message(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Vec<LiveEvent> {
    match msg {
        Ok(msg @ (Message::Text(_) | Message::Binary(_))) => {
            parse_server_message(&message_text(&msg))
        }
        Ok(Message::Close(_)) => {
            debug!("server closed the live connection");
            Vec::new()
        }
        Ok(_) => Vec::new(),
        Err(e) => vec![LiveEvent::Error {
            error: LiveError::StreamInterrupted(e.to_string()),
        }],
    }
}

/// Decode one server frame into zero or more events, preserving the order
/// transcript consumers depend on. Malformed frames are dropped.
fn parse_server_message(text: &str) -> Vec<LiveEvent> {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "dropping undecodable server frame");
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if let Some(update) = msg.session_resumption_update {
        if let Some(handle) = update.new_handle {
            if !handle.is_empty() {
                events.push(LiveEvent::ResumptionUpdate {
                    handle,
                    resumable: update.resumable,
                });
            }
        }
    }

    if let Some(content) = msg.server_content {
        if let Some(t) = content.input_transcription {
            if !t.text.is_empty() {
                events.push(LiveEvent::InputTranscription { text: t.text });
            }
        }

        if let Some(turn) = content.model_turn {
            let mut parts = Vec::new();
            for part in turn.parts {
                if let Some(text) = part.text {
                    parts.push(TurnPart::Text(text));
                }
                if let Some(inline) = part.inline_data {
                    match base64::engine::general_purpose::STANDARD.decode(&inline.data) {
                        Ok(bytes) => parts.push(TurnPart::InlineAudio {
                            data: Bytes::from(bytes),
                            mime_type: inline.mime_type,
                        }),
                        Err(e) => warn!(error = %e, "dropping undecodable inline data"),
                    }
                }
            }
            if !parts.is_empty() {
                events.push(LiveEvent::ModelTurn { parts });
            }
        }

        // When a frame carries both, the turn boundary comes first so the
        // transcription that follows starts the next transcript segment.
        if content.turn_complete {
            events.push(LiveEvent::TurnComplete);
        }

        if let Some(t) = content.output_transcription {
            if !t.text.is_empty() {
                events.push(LiveEvent::OutputTranscription { text: t.text });
            }
        }
    }

    if msg.go_away.is_some() {
        debug!("server signalled imminent disconnect");
    }

    events
}
