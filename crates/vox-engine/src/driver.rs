use std::sync::Arc;

use base64::Engine;
use futures::StreamExt;
use tracing::{debug, info, warn};

use vox_core::events::{BridgeEvent, StartStatus};
use vox_core::ids::{ClientId, SessionId};
use vox_core::input::InputItem;
use vox_core::live::{LiveConnectConfig, LiveConnection, LiveConnector, LiveEventStream, LiveSender};
use vox_core::stream::{LiveEvent, TurnPart};
use vox_store::transcripts::Role;
use vox_store::{HandleStore, TranscriptRepo};

use crate::channel::{InputChannel, POLL_INTERVAL};
use crate::dispatcher::OutputDispatcher;
use crate::manager::SharedSettings;
use crate::registry::SessionRegistry;

/// Everything one session's driver task needs, cloned out of the manager.
pub(crate) struct SessionContext {
    pub id: SessionId,
    pub registry: Arc<SessionRegistry>,
    pub connector: Arc<dyn LiveConnector>,
    pub handles: Arc<HandleStore>,
    pub transcripts: Arc<TranscriptRepo>,
    pub settings: SharedSettings,
    pub dispatcher: Arc<OutputDispatcher>,
}

/// How one connection attempt ended. Only `RemoteDropped` is eligible for
/// reconnection.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The stop flag was observed; the user asked for this.
    Stopped,
    /// The remote stream ended or errored while the session was live.
    RemoteDropped,
    /// No usable credentials. Wire code 401, never retried.
    AuthFailed(String),
    /// The connect call failed. Wire code 500, never retried.
    ConnectFailed(String),
}

/// Run one connection attempt end to end: connect, activate, then race the
/// sender and receiver loops until one of them finishes.
pub(crate) async fn run_attempt(
    ctx: &SessionContext,
    destination: &ClientId,
    channel: &Arc<InputChannel>,
    status: StartStatus,
) -> AttemptOutcome {
    // CONNECTING
    let (system_instruction, user_name) = {
        let settings = ctx.settings.read();
        (settings.compose(), settings.user_name.clone())
    };
    let resumption_handle = match ctx.handles.load(&ctx.id) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(session_id = %ctx.id, error = %e, "handle load failed, starting fresh");
            None
        }
    };

    let config = LiveConnectConfig {
        system_instruction,
        resumption_handle,
        ..Default::default()
    };

    let connection = match ctx.connector.connect(&config).await {
        Ok(c) => c,
        Err(vox_core::errors::LiveError::AuthenticationRequired(msg)) => {
            return AttemptOutcome::AuthFailed(msg)
        }
        Err(e) => return AttemptOutcome::ConnectFailed(e.to_string()),
    };

    // CONNECTED
    ctx.registry
        .activate(&ctx.id, destination.clone(), channel.clone());
    ctx.dispatcher.dispatch(
        &ctx.id,
        BridgeEvent::SessionStarted { status, user_name },
    );
    info!(session_id = %ctx.id, status = ?status, "session live");

    // RUNNING: first loop to finish wins, the other is dropped.
    let LiveConnection { mut sender, events } = connection;
    tokio::select! {
        outcome = sender_loop(ctx, channel, sender.as_mut()) => outcome,
        outcome = receiver_loop(ctx, events) => outcome,
    }
}

/// Drain the input channel into the live connection until the active flag
/// clears. Poll timeout bounds how long a stop can go unobserved.
async fn sender_loop(
    ctx: &SessionContext,
    channel: &Arc<InputChannel>,
    sender: &mut (dyn LiveSender + '_),
) -> AttemptOutcome {
    loop {
        if !ctx.registry.is_active(&ctx.id) {
            debug!(session_id = %ctx.id, "stop observed, sender exiting");
            return AttemptOutcome::Stopped;
        }

        let Some(item) = channel.pop_timeout(POLL_INTERVAL).await else {
            continue;
        };

        let result = match item {
            InputItem::Audio { data, mime_type } => sender.send_audio(data, &mime_type).await,
            InputItem::Video { data, mime_type } => sender.send_video(data, &mime_type).await,
            InputItem::Text(text) => sender.send_turn(&text).await,
        };

        if let Err(e) = result {
            if e.is_transient() {
                warn!(session_id = %ctx.id, error = %e, "send failed, input item dropped");
            } else {
                warn!(session_id = %ctx.id, error = %e, "connection unusable, sender exiting");
                return AttemptOutcome::RemoteDropped;
            }
        }
    }
}

/// Consume the remote event stream, forwarding output and persisting
/// transcript lines and resumption handles in stream order.
async fn receiver_loop(ctx: &SessionContext, mut events: LiveEventStream) -> AttemptOutcome {
    while let Some(event) = events.next().await {
        match event {
            LiveEvent::ResumptionUpdate { handle, resumable } => {
                if resumable {
                    if let Err(e) = ctx.handles.save(&ctx.id, &handle) {
                        warn!(session_id = %ctx.id, error = %e, "handle save failed");
                    }
                }
            }

            LiveEvent::ModelTurn { parts } => {
                for part in parts {
                    match part {
                        TurnPart::Text(text) => {
                            ctx.dispatcher
                                .dispatch(&ctx.id, BridgeEvent::TextResponse { text });
                        }
                        TurnPart::InlineAudio { data, mime_type } => {
                            let audio =
                                base64::engine::general_purpose::STANDARD.encode(&data);
                            ctx.dispatcher.dispatch(
                                &ctx.id,
                                BridgeEvent::AudioResponse { audio, mime_type },
                            );
                        }
                    }
                }
            }

            LiveEvent::InputTranscription { text } => {
                ctx.dispatcher.dispatch(
                    &ctx.id,
                    BridgeEvent::InputTranscription { text: text.clone() },
                );
                if let Err(e) = ctx.transcripts.append(&ctx.id, Role::User, &text) {
                    warn!(session_id = %ctx.id, error = %e, "transcript append failed");
                }
            }

            LiveEvent::OutputTranscription { text } => {
                ctx.dispatcher.dispatch(
                    &ctx.id,
                    BridgeEvent::TextResponse { text: text.clone() },
                );
                if let Err(e) = ctx.transcripts.append(&ctx.id, Role::Assistant, &text) {
                    warn!(session_id = %ctx.id, error = %e, "transcript append failed");
                }
            }

            LiveEvent::TurnComplete => {
                ctx.dispatcher.dispatch(&ctx.id, BridgeEvent::ClearTranscript);
            }

            LiveEvent::Error { error } => {
                warn!(session_id = %ctx.id, error = %error, "live stream errored");
                return AttemptOutcome::RemoteDropped;
            }
        }
    }

    info!(session_id = %ctx.id, "live stream ended");
    AttemptOutcome::RemoteDropped
}
