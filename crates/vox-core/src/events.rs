use serde::{Deserialize, Serialize};

use crate::ids::{ClientId, SessionId};

/// Commands arriving from a transport client, keyed by session identifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    #[serde(rename = "start_live_session")]
    StartSession { session_id: Option<String> },

    #[serde(rename = "stop_live_session")]
    StopSession { session_id: String },

    #[serde(rename = "check_session_status")]
    CheckStatus { session_id: String },

    /// Base64-encoded 16 kHz mono PCM16.
    #[serde(rename = "send_audio")]
    SendAudio { session_id: String, audio: String },

    /// Base64-encoded JPEG frame.
    #[serde(rename = "send_camera_frame")]
    SendCameraFrame { session_id: String, frame: String },

    #[serde(rename = "send_text_message")]
    SendTextMessage { session_id: String, text: String },

    #[serde(rename = "clear_session_handle")]
    ClearSessionHandle { session_id: String },
}

impl ClientCommand {
    /// The session this command addresses. StartSession defaults to
    /// "default" when the client omits the id.
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::StartSession { session_id } => {
                SessionId::from_raw(session_id.as_deref().unwrap_or("default"))
            }
            Self::StopSession { session_id }
            | Self::CheckStatus { session_id }
            | Self::SendAudio { session_id, .. }
            | Self::SendCameraFrame { session_id, .. }
            | Self::SendTextMessage { session_id, .. }
            | Self::ClearSessionHandle { session_id } => SessionId::from_raw(session_id.as_str()),
        }
    }
}

/// How a session start was satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartStatus {
    Connected,
    Reconnected,
}

/// Events emitted back to a transport client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    #[serde(rename = "live_session_started")]
    SessionStarted { status: StartStatus, user_name: String },

    #[serde(rename = "live_session_error")]
    SessionError { error: String, code: u16 },

    #[serde(rename = "live_session_stopped")]
    SessionStopped,

    #[serde(rename = "session_status")]
    SessionStatus { active: bool },

    #[serde(rename = "text_response")]
    TextResponse { text: String },

    #[serde(rename = "audio_response")]
    AudioResponse { audio: String, mime_type: String },

    #[serde(rename = "input_transcription")]
    InputTranscription { text: String },

    #[serde(rename = "clear_transcript")]
    ClearTranscript,

    #[serde(rename = "session_ended_reconnect")]
    SessionEnded { session_id: SessionId, can_resume: bool },
}

impl BridgeEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "live_session_started",
            Self::SessionError { .. } => "live_session_error",
            Self::SessionStopped => "live_session_stopped",
            Self::SessionStatus { .. } => "session_status",
            Self::TextResponse { .. } => "text_response",
            Self::AudioResponse { .. } => "audio_response",
            Self::InputTranscription { .. } => "input_transcription",
            Self::ClearTranscript => "clear_transcript",
            Self::SessionEnded { .. } => "session_ended_reconnect",
        }
    }
}

/// A bridge event addressed to the transport connection that currently owns
/// the session's output. The destination is resolved at dispatch time, not
/// captured at task start, so it tracks client re-attachment.
#[derive(Clone, Debug)]
pub struct Outbound {
    pub destination: ClientId,
    pub event: BridgeEvent,
}
