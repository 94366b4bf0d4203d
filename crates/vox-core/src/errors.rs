/// Typed error hierarchy for live-session operations.
/// Classifies errors as attempt-fatal (end the connect attempt) or
/// transient (log, drop the offending item, keep the loop running).
#[derive(Clone, Debug, thiserror::Error)]
pub enum LiveError {
    // Attempt-fatal
    #[error("authentication required: {0}")]
    AuthenticationRequired(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    // Mid-stream
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    // Transient — the sender/receiver loop continues
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("decode error: {0}")]
    Decode(String),

    #[error("session closed")]
    Closed,
}

impl LiveError {
    /// Numeric code reported to the transport layer.
    /// 401 means the client must supply credentials; everything else is 500.
    pub fn wire_code(&self) -> u16 {
        match self {
            Self::AuthenticationRequired(_) => 401,
            _ => 500,
        }
    }

    /// Whether the sender/receiver loop should swallow this error and continue.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SendFailed(_) | Self::Decode(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired(_) => "authentication_required",
            Self::ConnectFailed(_) => "connect_failed",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::SendFailed(_) => "send_failed",
            Self::Decode(_) => "decode_error",
            Self::Closed => "closed",
        }
    }
}
