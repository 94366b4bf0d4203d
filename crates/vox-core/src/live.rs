use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::LiveError;
use crate::stream::LiveEvent;

/// Inbound half of a live connection.
pub type LiveEventStream = Pin<Box<dyn Stream<Item = LiveEvent> + Send>>;

/// Configuration for one connect attempt against the remote live service.
#[derive(Clone, Debug)]
pub struct LiveConnectConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub system_instruction: String,
    pub voice_name: String,
    pub activity_detection: ActivityDetection,
    pub input_audio_transcription: bool,
    pub output_audio_transcription: bool,
    /// Stored handle from a previous connection, passed through unmodified.
    pub resumption_handle: Option<String>,
    /// Transparent resumption: the service silently continues the same
    /// logical conversation across the reconnect.
    pub transparent_resumption: bool,
}

impl Default for LiveConnectConfig {
    fn default() -> Self {
        Self {
            response_modalities: vec![ResponseModality::Audio],
            system_instruction: String::new(),
            voice_name: "Aoede".to_string(),
            activity_detection: ActivityDetection::default(),
            input_audio_transcription: true,
            output_audio_transcription: true,
            resumption_handle: None,
            transparent_resumption: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseModality {
    Audio,
    Text,
}

/// Automatic speech-activity detection thresholds.
#[derive(Clone, Debug)]
pub struct ActivityDetection {
    pub start_sensitivity: Sensitivity,
    pub end_sensitivity: Sensitivity,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for ActivityDetection {
    fn default() -> Self {
        Self {
            start_sensitivity: Sensitivity::Low,
            end_sensitivity: Sensitivity::Low,
            prefix_padding_ms: 20,
            silence_duration_ms: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sensitivity {
    Low,
    High,
}

/// Trait implemented by each live backend (Gemini Live, mock).
#[async_trait]
pub trait LiveConnector: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Open one connection attempt. A `ConnectFailed` here is terminal for
    /// the attempt; retry policy lives with the caller.
    async fn connect(&self, config: &LiveConnectConfig) -> Result<LiveConnection, LiveError>;
}

/// A connected live session, split into its two halves so the sender and
/// receiver loops can run concurrently.
pub struct LiveConnection {
    pub sender: Box<dyn LiveSender>,
    pub events: LiveEventStream,
}

/// Outbound half of a live connection.
#[async_trait]
pub trait LiveSender: Send {
    async fn send_audio(&mut self, data: Bytes, mime_type: &str) -> Result<(), LiveError>;
    async fn send_video(&mut self, data: Bytes, mime_type: &str) -> Result<(), LiveError>;
    /// Send text as a completed conversational turn.
    async fn send_turn(&mut self, text: &str) -> Result<(), LiveError>;
}
