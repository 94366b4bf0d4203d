use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use vox_core::events::{BridgeEvent, Outbound, StartStatus};
use vox_core::ids::{ClientId, SessionId};
use vox_core::input::InputItem;
use vox_core::live::LiveConnector;
use vox_core::prompt::PromptSettings;
use vox_store::{HandleStore, StoreError, TranscriptRepo};

use crate::dispatcher::OutputDispatcher;
use crate::driver::SessionContext;
use crate::registry::SessionRegistry;
use crate::supervisor::run_session;

pub type SharedSettings = Arc<RwLock<PromptSettings>>;

/// Owns everything the engine needs per process: the registry, the live
/// connector, the stores, the prompt settings, and the dispatcher. One
/// instance serves all sessions.
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    connector: Arc<dyn LiveConnector>,
    handles: Arc<HandleStore>,
    transcripts: Arc<TranscriptRepo>,
    settings: SharedSettings,
    dispatcher: Arc<OutputDispatcher>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        handles: Arc<HandleStore>,
        transcripts: Arc<TranscriptRepo>,
        settings: PromptSettings,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = Arc::new(OutputDispatcher::new(registry.clone()));
        Self {
            registry,
            connector,
            handles,
            transcripts,
            settings: Arc::new(RwLock::new(settings)),
            dispatcher,
        }
    }

    /// Receiver for all outbound events; the transport forwarder consumes
    /// this.
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.dispatcher.subscribe()
    }

    pub fn settings(&self) -> SharedSettings {
        self.settings.clone()
    }

    pub fn connector_model(&self) -> &str {
        self.connector.model()
    }

    /// Start a session for a client, or attach the client to a session that
    /// is already running. Idempotent: concurrent starts spawn exactly one
    /// driver task.
    pub fn start(&self, id: SessionId, destination: ClientId) {
        if self.registry.is_active(&id) {
            self.registry.retarget(&id, destination);
            let user_name = self.settings.read().user_name.clone();
            self.dispatcher.dispatch(
                &id,
                BridgeEvent::SessionStarted {
                    status: StartStatus::Reconnected,
                    user_name,
                },
            );
            info!(session_id = %id, "client attached to running session");
            return;
        }

        if !self.registry.begin_start(&id) {
            debug!(session_id = %id, "start already in flight, ignored");
            return;
        }

        let ctx = SessionContext {
            id: id.clone(),
            registry: self.registry.clone(),
            connector: self.connector.clone(),
            handles: self.handles.clone(),
            transcripts: self.transcripts.clone(),
            settings: self.settings.clone(),
            dispatcher: self.dispatcher.clone(),
        };
        tokio::spawn(run_session(ctx, destination));
        info!(session_id = %id, "session task spawned");
    }

    /// Request a stop. The driver observes the cleared flag within one poll
    /// interval and finalizes. Unknown session is a no-op.
    pub fn stop(&self, id: &SessionId) {
        if self.registry.stop(id) {
            info!(session_id = %id, "stop requested");
        }
    }

    pub fn is_active(&self, id: &SessionId) -> bool {
        self.registry.is_active(id)
    }

    pub fn retarget(&self, id: &SessionId, destination: ClientId) -> bool {
        self.registry.retarget(id, destination)
    }

    pub fn push_audio(&self, id: &SessionId, data: Bytes) {
        self.push(id, InputItem::audio(data));
    }

    pub fn push_video(&self, id: &SessionId, data: Bytes) {
        self.push(id, InputItem::video(data));
    }

    pub fn push_text(&self, id: &SessionId, text: impl Into<String>) {
        self.push(id, InputItem::text(text));
    }

    fn push(&self, id: &SessionId, item: InputItem) {
        match self.registry.channel(id) {
            Some(channel) => channel.push(item),
            None => debug!(session_id = %id, kind = item.kind(), "input for unknown session dropped"),
        }
    }

    /// Explicit "new session" request: the only path that discards a stored
    /// resumption handle.
    pub fn clear_handle(&self, id: &SessionId) -> Result<(), StoreError> {
        self.handles.clear(id)
    }

    /// Flag every running session for stop; used at shutdown.
    pub fn stop_all(&self) {
        for id in self.registry.session_ids() {
            self.stop(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use vox_core::errors::LiveError;
    use vox_core::stream::{LiveEvent, TurnPart};
    use vox_live::mock::{MockConnector, MockScript, SentItem};
    use vox_store::transcripts::Role;
    use vox_store::Database;

    use crate::channel::POLL_INTERVAL;
    use crate::supervisor::{MAX_RECONNECTS, RECONNECT_DELAY};

    struct Harness {
        manager: SessionManager,
        connector: Arc<MockConnector>,
        handles: Arc<HandleStore>,
        transcripts: Arc<TranscriptRepo>,
        rx: broadcast::Receiver<Outbound>,
    }

    fn harness(scripts: Vec<MockScript>) -> Harness {
        let db = Database::in_memory().unwrap();
        let connector = Arc::new(MockConnector::new(scripts));
        let handles = Arc::new(HandleStore::new(db.clone()));
        let transcripts = Arc::new(TranscriptRepo::new(db));
        let manager = SessionManager::new(
            connector.clone(),
            handles.clone(),
            transcripts.clone(),
            PromptSettings::default(),
        );
        let rx = manager.subscribe();
        Harness {
            manager,
            connector,
            handles,
            transcripts,
            rx,
        }
    }

    fn sid() -> SessionId {
        SessionId::from_raw("s1")
    }

    fn cid() -> ClientId {
        ClientId::from_raw("c1")
    }

    async fn next_event(rx: &mut broadcast::Receiver<Outbound>) -> Outbound {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for outbound event")
            .expect("outbound channel closed")
    }

    async fn expect_event(rx: &mut broadcast::Receiver<Outbound>, event_type: &str) -> Outbound {
        let out = next_event(rx).await;
        assert_eq!(out.event.event_type(), event_type);
        out
    }

    #[tokio::test(start_paused = true)]
    async fn start_connects_and_announces() {
        let mut h = harness(vec![MockScript::Hold(vec![])]);
        h.manager.start(sid(), cid());

        let out = expect_event(&mut h.rx, "live_session_started").await;
        assert_eq!(out.destination, cid());
        match out.event {
            BridgeEvent::SessionStarted { status, .. } => {
                assert_eq!(status, StartStatus::Connected)
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(h.manager.is_active(&sid()));
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_spawns_one_driver() {
        let mut h = harness(vec![MockScript::Hold(vec![])]);
        h.manager.start(sid(), cid());
        h.manager.start(sid(), cid());

        expect_event(&mut h.rx, "live_session_started").await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_active_retargets_and_reports_reconnected() {
        let mut h = harness(vec![MockScript::Hold(vec![])]);
        h.manager.start(sid(), cid());
        expect_event(&mut h.rx, "live_session_started").await;

        let other = ClientId::from_raw("c2");
        h.manager.start(sid(), other.clone());
        let out = expect_event(&mut h.rx, "live_session_started").await;
        assert_eq!(out.destination, other);
        match out.event {
            BridgeEvent::SessionStarted { status, .. } => {
                assert_eq!(status, StartStatus::Reconnected)
            }
            other => panic!("unexpected event {other:?}"),
        }
        // Still only one live connection.
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn input_flows_through_to_the_connection() {
        let mut h = harness(vec![MockScript::Hold(vec![])]);
        h.manager.start(sid(), cid());
        expect_event(&mut h.rx, "live_session_started").await;

        h.manager.push_audio(&sid(), Bytes::from_static(&[0u8; 320]));
        h.manager.push_text(&sid(), "hello there");
        tokio::time::sleep(Duration::from_secs(1)).await;

        let sent = h.connector.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], SentItem::Audio { len: 320, .. }));
        assert_eq!(sent[1], SentItem::Turn("hello there".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn push_to_unknown_session_is_silent() {
        let h = harness(vec![]);
        h.manager.push_audio(&sid(), Bytes::from_static(&[1, 2]));
        h.manager.push_text(&sid(), "nobody home");
        assert!(!h.manager.is_active(&sid()));
    }

    #[tokio::test(start_paused = true)]
    async fn receiver_orders_transcript_events() {
        let mut h = harness(vec![MockScript::Hold(vec![
            LiveEvent::InputTranscription {
                text: "what time is it".into(),
            },
            LiveEvent::ModelTurn {
                parts: vec![
                    TurnPart::Text("It is ".into()),
                    TurnPart::InlineAudio {
                        data: Bytes::from_static(&[9, 9]),
                        mime_type: "audio/pcm;rate=24000".into(),
                    },
                ],
            },
            LiveEvent::OutputTranscription {
                text: "It is half past three".into(),
            },
            LiveEvent::TurnComplete,
        ])]);
        h.manager.start(sid(), cid());

        expect_event(&mut h.rx, "live_session_started").await;
        expect_event(&mut h.rx, "input_transcription").await;
        expect_event(&mut h.rx, "text_response").await;
        let audio = expect_event(&mut h.rx, "audio_response").await;
        match audio.event {
            BridgeEvent::AudioResponse { audio, mime_type } => {
                assert_eq!(audio, "CQk=");
                assert_eq!(mime_type, "audio/pcm;rate=24000");
            }
            other => panic!("unexpected event {other:?}"),
        }
        expect_event(&mut h.rx, "text_response").await;
        expect_event(&mut h.rx, "clear_transcript").await;
    }

    #[tokio::test(start_paused = true)]
    async fn transcriptions_are_persisted_with_roles() {
        let mut h = harness(vec![MockScript::Hold(vec![
            LiveEvent::InputTranscription {
                text: "hello".into(),
            },
            LiveEvent::OutputTranscription {
                text: "hi yourself".into(),
            },
        ])]);
        h.manager.start(sid(), cid());

        expect_event(&mut h.rx, "live_session_started").await;
        expect_event(&mut h.rx, "input_transcription").await;
        expect_event(&mut h.rx, "text_response").await;

        let lines = h.transcripts.list(&sid()).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].role, Role::User);
        assert_eq!(lines[0].text, "hello");
        assert_eq!(lines[1].role, Role::Assistant);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_finalizes_within_one_poll_interval() {
        let mut h = harness(vec![MockScript::Hold(vec![])]);
        h.manager.start(sid(), cid());
        expect_event(&mut h.rx, "live_session_started").await;

        h.manager.stop(&sid());
        let deadline = POLL_INTERVAL + Duration::from_millis(100);
        let out = tokio::time::timeout(deadline, h.rx.recv())
            .await
            .expect("stop not observed within one poll interval")
            .unwrap();
        assert_eq!(out.event.event_type(), "live_session_stopped");
        expect_event(&mut h.rx, "session_ended_reconnect").await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!h.manager.is_active(&sid()));
        // Registry entry is gone; the id can start fresh.
        assert_eq!(h.manager.registry.destination(&sid()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_session_reports_resumability() {
        let mut h = harness(vec![MockScript::Hold(vec![LiveEvent::ResumptionUpdate {
            handle: "h1".into(),
            resumable: true,
        }])]);
        h.manager.start(sid(), cid());
        expect_event(&mut h.rx, "live_session_started").await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.manager.stop(&sid());
        expect_event(&mut h.rx, "live_session_stopped").await;
        let out = expect_event(&mut h.rx, "session_ended_reconnect").await;
        match out.event {
            BridgeEvent::SessionEnded {
                session_id,
                can_resume,
            } => {
                assert_eq!(session_id, sid());
                assert!(can_resume, "stored handle should survive a user stop");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_reports_401_without_retry() {
        let mut h = harness(vec![MockScript::Fail(LiveError::AuthenticationRequired(
            "no credentials".into(),
        ))]);
        h.manager.start(sid(), cid());

        let out = expect_event(&mut h.rx, "live_session_error").await;
        assert_eq!(out.destination, cid());
        match out.event {
            BridgeEvent::SessionError { code, .. } => assert_eq!(code, 401),
            other => panic!("unexpected event {other:?}"),
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.connector.connect_count(), 1);
        assert!(!h.manager.is_active(&sid()));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_reports_500_without_retry() {
        let mut h = harness(vec![MockScript::Fail(LiveError::ConnectFailed(
            "refused".into(),
        ))]);
        h.manager.start(sid(), cid());

        let out = expect_event(&mut h.rx, "live_session_error").await;
        match out.event {
            BridgeEvent::SessionError { code, .. } => assert_eq!(code, 500),
            other => panic!("unexpected event {other:?}"),
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_drop_reconnects_with_persisted_handle() {
        let mut h = harness(vec![
            MockScript::Drop(vec![LiveEvent::ResumptionUpdate {
                handle: "h1".into(),
                resumable: true,
            }]),
            MockScript::Hold(vec![]),
        ]);
        h.manager.start(sid(), cid());

        expect_event(&mut h.rx, "live_session_started").await;
        let out = expect_event(&mut h.rx, "live_session_started").await;
        match out.event {
            BridgeEvent::SessionStarted { status, .. } => {
                assert_eq!(status, StartStatus::Reconnected)
            }
            other => panic!("unexpected event {other:?}"),
        }

        let configs = h.connector.configs();
        assert_eq!(configs.len(), 2);
        assert!(configs[0].resumption_handle.is_none());
        assert_eq!(configs[1].resumption_handle.as_deref(), Some("h1"));
        assert!(h.manager.is_active(&sid()));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_budget_exhaustion_ends_the_session() {
        // The initial connect counts against the budget: MAX_RECONNECTS
        // connections in total, all dropping.
        let scripts: Vec<MockScript> = (0..MAX_RECONNECTS)
            .map(|_| {
                MockScript::Drop(vec![LiveEvent::ResumptionUpdate {
                    handle: "h-final".into(),
                    resumable: true,
                }])
            })
            .collect();
        let mut h = harness(scripts);
        h.manager.start(sid(), cid());

        let mut started = 0;
        loop {
            let out = next_event(&mut h.rx).await;
            match out.event {
                BridgeEvent::SessionStarted { .. } => started += 1,
                BridgeEvent::SessionEnded {
                    session_id,
                    can_resume,
                } => {
                    assert_eq!(session_id, sid());
                    assert!(can_resume, "stored handle should make the end resumable");
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(started as u32, MAX_RECONNECTS);
        assert_eq!(h.connector.connect_count() as u32, MAX_RECONNECTS);
        tokio::time::sleep(RECONNECT_DELAY).await;
        assert!(!h.manager.is_active(&sid()));
        assert_eq!(h.handles.load(&sid()).unwrap().as_deref(), Some("h-final"));
    }

    #[tokio::test(start_paused = true)]
    async fn ended_session_can_start_fresh_and_resume() {
        let mut h = harness(vec![
            MockScript::Drop(vec![LiveEvent::ResumptionUpdate {
                handle: "h1".into(),
                resumable: true,
            }]),
            // Reconnects all fail to yield anything and drop immediately.
            MockScript::Drop(vec![]),
            MockScript::Drop(vec![]),
            MockScript::Drop(vec![]),
            MockScript::Drop(vec![]),
            // Brand-new session after the first one ended.
            MockScript::Hold(vec![]),
        ]);
        h.manager.start(sid(), cid());

        loop {
            let out = next_event(&mut h.rx).await;
            if matches!(out.event, BridgeEvent::SessionEnded { .. }) {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        // New task, fresh reconnect budget, handle carried over.
        h.manager.start(sid(), cid());
        expect_event(&mut h.rx, "live_session_started").await;
        let configs = h.connector.configs();
        assert_eq!(
            configs.last().unwrap().resumption_handle.as_deref(),
            Some("h1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clear_handle_forces_fresh_start() {
        let mut h = harness(vec![
            MockScript::Drop(vec![LiveEvent::ResumptionUpdate {
                handle: "h1".into(),
                resumable: true,
            }]),
            MockScript::Drop(vec![]),
            MockScript::Drop(vec![]),
            MockScript::Drop(vec![]),
            MockScript::Drop(vec![]),
            MockScript::Hold(vec![]),
        ]);
        h.manager.start(sid(), cid());
        loop {
            let out = next_event(&mut h.rx).await;
            if matches!(out.event, BridgeEvent::SessionEnded { .. }) {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.manager.clear_handle(&sid()).unwrap();
        h.manager.start(sid(), cid());
        expect_event(&mut h.rx, "live_session_started").await;
        assert!(h
            .connector
            .configs()
            .last()
            .unwrap()
            .resumption_handle
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_error_event_triggers_reconnect() {
        let mut h = harness(vec![
            MockScript::Hold(vec![LiveEvent::Error {
                error: LiveError::StreamInterrupted("reset by peer".into()),
            }]),
            MockScript::Hold(vec![]),
        ]);
        h.manager.start(sid(), cid());

        expect_event(&mut h.rx, "live_session_started").await;
        let out = expect_event(&mut h.rx, "live_session_started").await;
        match out.event {
            BridgeEvent::SessionStarted { status, .. } => {
                assert_eq!(status, StartStatus::Reconnected)
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(h.connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn output_follows_retarget_mid_session() {
        let mut h = harness(vec![MockScript::Hold(vec![])]);
        h.manager.start(sid(), cid());
        expect_event(&mut h.rx, "live_session_started").await;

        let other = ClientId::from_raw("c2");
        assert!(h.manager.retarget(&sid(), other.clone()));
        h.manager.stop(&sid());

        let out = expect_event(&mut h.rx, "live_session_stopped").await;
        assert_eq!(out.destination, other);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_flags_every_session() {
        let mut h = harness(vec![
            MockScript::Hold(vec![]),
            MockScript::Hold(vec![]),
        ]);
        let s2 = SessionId::from_raw("s2");
        h.manager.start(sid(), cid());
        h.manager.start(s2.clone(), cid());
        expect_event(&mut h.rx, "live_session_started").await;
        expect_event(&mut h.rx, "live_session_started").await;

        h.manager.stop_all();
        tokio::time::sleep(POLL_INTERVAL + Duration::from_millis(100)).await;
        assert!(!h.manager.is_active(&sid()));
        assert!(!h.manager.is_active(&s2));
    }
}
