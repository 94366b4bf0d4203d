use bytes::Bytes;

use crate::errors::LiveError;

/// Events arriving on a live connection's inbound stream.
///
/// Within one session these are delivered to the dispatcher in stream order;
/// the receiver never reorders transcript-affecting events
/// (InputTranscription / TurnComplete / OutputTranscription).
#[derive(Clone, Debug)]
pub enum LiveEvent {
    /// The service issued (or refreshed) a resumption handle.
    ResumptionUpdate { handle: String, resumable: bool },

    /// A chunk of model output: text and/or inline audio parts.
    ModelTurn { parts: Vec<TurnPart> },

    /// Transcription of what the user said.
    InputTranscription { text: String },

    /// Transcription of what the model said.
    OutputTranscription { text: String },

    /// The model finished its turn.
    TurnComplete,

    /// The stream failed; the receiver exits after this.
    Error { error: LiveError },
}

/// One part of a model turn.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnPart {
    Text(String),
    InlineAudio { data: Bytes, mime_type: String },
}

impl LiveEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ResumptionUpdate { .. } => "resumption_update",
            Self::ModelTurn { .. } => "model_turn",
            Self::InputTranscription { .. } => "input_transcription",
            Self::OutputTranscription { .. } => "output_transcription",
            Self::TurnComplete => "turn_complete",
            Self::Error { .. } => "error",
        }
    }
}
