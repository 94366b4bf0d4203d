use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace};

use vox_core::events::{BridgeEvent, Outbound};
use vox_core::ids::{ClientId, SessionId};

use crate::registry::SessionRegistry;

const OUTBOUND_BUFFER: usize = 256;

/// Routes engine events to transport clients. The destination is read from
/// the registry at dispatch time, never captured at task start, so output
/// follows client re-attachment.
pub struct OutputDispatcher {
    registry: Arc<SessionRegistry>,
    tx: broadcast::Sender<Outbound>,
}

impl OutputDispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let (tx, _) = broadcast::channel(OUTBOUND_BUFFER);
        Self { registry, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.tx.subscribe()
    }

    /// Send an event to whichever client currently owns the session's
    /// output. Dropped when the session has no registry entry.
    pub fn dispatch(&self, session_id: &SessionId, event: BridgeEvent) -> bool {
        let Some(destination) = self.registry.destination(session_id) else {
            debug!(session_id = %session_id, event = event.event_type(), "no destination, event dropped");
            return false;
        };
        self.send(destination, event)
    }

    /// Send an event straight to a client, bypassing the registry. Used for
    /// failures before a session is ever activated.
    pub fn dispatch_to(&self, destination: ClientId, event: BridgeEvent) -> bool {
        self.send(destination, event)
    }

    fn send(&self, destination: ClientId, event: BridgeEvent) -> bool {
        trace!(destination = %destination, event = event.event_type(), "outbound event");
        self.tx
            .send(Outbound { destination, event })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InputChannel;

    #[test]
    fn dispatch_reads_destination_fresh() {
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = OutputDispatcher::new(registry.clone());
        let mut rx = dispatcher.subscribe();

        let sid = SessionId::from_raw("s1");
        registry.activate(
            &sid,
            ClientId::from_raw("c1"),
            Arc::new(InputChannel::new()),
        );

        dispatcher.dispatch(&sid, BridgeEvent::ClearTranscript);
        registry.retarget(&sid, ClientId::from_raw("c2"));
        dispatcher.dispatch(&sid, BridgeEvent::ClearTranscript);

        assert_eq!(rx.try_recv().unwrap().destination.as_str(), "c1");
        assert_eq!(rx.try_recv().unwrap().destination.as_str(), "c2");
    }

    #[test]
    fn dispatch_without_registry_entry_is_dropped() {
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = OutputDispatcher::new(registry);
        let mut rx = dispatcher.subscribe();

        let delivered = dispatcher.dispatch(
            &SessionId::from_raw("missing"),
            BridgeEvent::ClearTranscript,
        );
        assert!(!delivered);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_to_bypasses_registry() {
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = OutputDispatcher::new(registry);
        let mut rx = dispatcher.subscribe();

        dispatcher.dispatch_to(
            ClientId::from_raw("c9"),
            BridgeEvent::SessionError {
                error: "no credentials".into(),
                code: 401,
            },
        );

        let out = rx.try_recv().unwrap();
        assert_eq!(out.destination.as_str(), "c9");
        assert_eq!(out.event.event_type(), "live_session_error");
    }
}
