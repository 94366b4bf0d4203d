use std::sync::Arc;

use tokio::sync::broadcast;

use vox_core::events::Outbound;

use crate::client::ClientRegistry;

/// Forward engine events to the WebSocket client each one is addressed to.
/// The engine resolved the destination at dispatch time; all this does is
/// serialize and deliver.
pub fn start_forwarder(
    registry: Arc<ClientRegistry>,
    mut rx: broadcast::Receiver<Outbound>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(Outbound { destination, event }) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        registry.send_to(&destination, json);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "outbound event failed to serialize");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "forwarder lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("outbound channel closed, forwarder exiting");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_core::events::BridgeEvent;
    use vox_core::ids::ClientId;

    #[tokio::test]
    async fn forwards_to_addressed_client_only() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(16);
        let _handle = start_forwarder(Arc::clone(&registry), rx);

        let (id1, mut rx1) = registry.register();
        let (_id2, mut rx2) = registry.register();

        tx.send(Outbound {
            destination: id1,
            event: BridgeEvent::TextResponse {
                text: "hello".into(),
            },
        })
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let msg = rx1.try_recv().unwrap();
        assert!(msg.contains("\"type\":\"text_response\""));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn event_for_gone_client_is_dropped() {
        let registry = Arc::new(ClientRegistry::new(32));
        let (tx, rx) = broadcast::channel(16);
        let _handle = start_forwarder(Arc::clone(&registry), rx);

        tx.send(Outbound {
            destination: ClientId::new(),
            event: BridgeEvent::ClearTranscript,
        })
        .unwrap();

        // Nothing to assert beyond "does not panic"; give the task a beat.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(registry.count(), 0);
    }
}
