use bytes::Bytes;

/// Mime type for client microphone audio: 16 kHz mono PCM16.
pub const AUDIO_MIME: &str = "audio/pcm;rate=16000";
/// Mime type for client camera frames.
pub const VIDEO_MIME: &str = "image/jpeg";

/// One unit of user input awaiting transmission to the remote session.
/// Immutable once enqueued.
#[derive(Clone, Debug, PartialEq)]
pub enum InputItem {
    Audio { data: Bytes, mime_type: String },
    Video { data: Bytes, mime_type: String },
    Text(String),
}

impl InputItem {
    pub fn audio(data: impl Into<Bytes>) -> Self {
        Self::Audio {
            data: data.into(),
            mime_type: AUDIO_MIME.to_string(),
        }
    }

    pub fn video(data: impl Into<Bytes>) -> Self {
        Self::Video {
            data: data.into(),
            mime_type: VIDEO_MIME.to_string(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Audio { .. } => "audio",
            Self::Video { .. } => "video",
            Self::Text(_) => "text",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_mime_types() {
        let audio = InputItem::audio(vec![0u8; 4]);
        assert!(matches!(&audio, InputItem::Audio { mime_type, .. } if mime_type == AUDIO_MIME));

        let video = InputItem::video(vec![0u8; 4]);
        assert!(matches!(&video, InputItem::Video { mime_type, .. } if mime_type == VIDEO_MIME));
    }

    #[test]
    fn kind_strings() {
        assert_eq!(InputItem::audio(vec![]).kind(), "audio");
        assert_eq!(InputItem::video(vec![]).kind(), "video");
        assert_eq!(InputItem::text("hi").kind(), "text");
    }
}
