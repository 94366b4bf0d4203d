use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use vox_core::errors::LiveError;
use vox_core::live::{LiveConnectConfig, LiveConnection, LiveConnector, LiveSender};
use vox_core::stream::LiveEvent;

/// Pre-programmed connection outcomes for deterministic testing without a
/// remote service. Scripts are consumed in order, one per connect attempt.
pub enum MockScript {
    /// Connect succeeds; the event stream yields these events, then ends
    /// (the remote side drops the connection).
    Drop(Vec<LiveEvent>),
    /// Connect succeeds; the event stream yields these events, then stays
    /// pending until the connection is torn down by the caller.
    Hold(Vec<LiveEvent>),
    /// The connect call itself fails.
    Fail(LiveError),
}

/// What a mock connection observed being sent, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum SentItem {
    Audio { mime_type: String, len: usize },
    Video { mime_type: String, len: usize },
    Turn(String),
}

/// Mock connector that plays back scripted connections in sequence and
/// records everything sent through its senders.
pub struct MockConnector {
    scripts: Mutex<VecDeque<MockScript>>,
    connect_count: AtomicUsize,
    configs: Mutex<Vec<LiveConnectConfig>>,
    sent: Arc<Mutex<Vec<SentItem>>>,
}

impl MockConnector {
    pub fn new(scripts: Vec<MockScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            connect_count: AtomicUsize::new(0),
            configs: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of connect attempts made so far.
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::Relaxed)
    }

    /// The config passed to each connect attempt, in order.
    pub fn configs(&self) -> Vec<LiveConnectConfig> {
        self.configs.lock().clone()
    }

    /// Everything sent through any of this connector's senders, in order.
    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl LiveConnector for MockConnector {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-live-model"
    }

    async fn connect(&self, config: &LiveConnectConfig) -> Result<LiveConnection, LiveError> {
        let idx = self.connect_count.fetch_add(1, Ordering::Relaxed);
        self.configs.lock().push(config.clone());

        let script = self.scripts.lock().pop_front().ok_or_else(|| {
            LiveError::ConnectFailed(format!("MockConnector: no script for attempt {idx}"))
        })?;

        let events: vox_core::live::LiveEventStream = match script {
            MockScript::Drop(events) => Box::pin(stream::iter(events)),
            MockScript::Hold(events) => {
                Box::pin(stream::iter(events).chain(stream::pending()))
            }
            MockScript::Fail(e) => return Err(e),
        };

        Ok(LiveConnection {
            sender: Box::new(MockSender {
                sent: self.sent.clone(),
            }),
            events,
        })
    }
}

struct MockSender {
    sent: Arc<Mutex<Vec<SentItem>>>,
}

#[async_trait]
impl LiveSender for MockSender {
    async fn send_audio(&mut self, data: Bytes, mime_type: &str) -> Result<(), LiveError> {
        self.sent.lock().push(SentItem::Audio {
            mime_type: mime_type.to_string(),
            len: data.len(),
        });
        Ok(())
    }

    async fn send_video(&mut self, data: Bytes, mime_type: &str) -> Result<(), LiveError> {
        self.sent.lock().push(SentItem::Video {
            mime_type: mime_type.to_string(),
            len: data.len(),
        });
        Ok(())
    }

    async fn send_turn(&mut self, text: &str) -> Result<(), LiveError> {
        self.sent.lock().push(SentItem::Turn(text.to_string()));
        Ok(())
    }
}
