use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use vox_core::events::{BridgeEvent, StartStatus};
use vox_core::ids::ClientId;

use crate::channel::InputChannel;
use crate::driver::{run_attempt, AttemptOutcome, SessionContext};

/// Connection budget for one session task: the initial connect counts, so a
/// session drops at most this many times before it ends. The counter never
/// resets while the task lives; only a brand-new session starts from zero.
pub const MAX_RECONNECTS: u32 = 5;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Drive one session from first connect to final teardown, reconnecting on
/// mid-stream drops with the persisted resumption handle.
pub(crate) async fn run_session(ctx: SessionContext, destination: ClientId) {
    // One channel for the whole session: input queued during a reconnect
    // survives into the next attempt.
    let channel = Arc::new(InputChannel::new());
    let mut reconnects: u32 = 0;

    loop {
        let status = if reconnects == 0 {
            StartStatus::Connected
        } else {
            StartStatus::Reconnected
        };

        match run_attempt(&ctx, &destination, &channel, status).await {
            AttemptOutcome::Stopped => {
                info!(session_id = %ctx.id, "session stopped by user");
                ctx.dispatcher.dispatch(&ctx.id, BridgeEvent::SessionStopped);
                dispatch_session_ended(&ctx);
                break;
            }

            AttemptOutcome::AuthFailed(msg) => {
                warn!(session_id = %ctx.id, error = %msg, "authentication required");
                ctx.dispatcher.dispatch_to(
                    destination.clone(),
                    BridgeEvent::SessionError {
                        error: msg,
                        code: 401,
                    },
                );
                break;
            }

            AttemptOutcome::ConnectFailed(msg) => {
                warn!(session_id = %ctx.id, error = %msg, "connect failed");
                ctx.dispatcher.dispatch_to(
                    destination.clone(),
                    BridgeEvent::SessionError {
                        error: msg,
                        code: 500,
                    },
                );
                if reconnects > 0 {
                    // The client thought the session was live; tell it the
                    // session is gone and whether it can be resumed.
                    dispatch_session_ended(&ctx);
                }
                break;
            }

            AttemptOutcome::RemoteDropped => {
                if !ctx.registry.is_active(&ctx.id) {
                    // Stop raced the drop; honor the stop.
                    info!(session_id = %ctx.id, "session stopped during disconnect");
                    ctx.dispatcher.dispatch(&ctx.id, BridgeEvent::SessionStopped);
                    dispatch_session_ended(&ctx);
                    break;
                }

                reconnects += 1;
                if reconnects >= MAX_RECONNECTS {
                    warn!(session_id = %ctx.id, drops = reconnects, "reconnect budget exhausted");
                    dispatch_session_ended(&ctx);
                    break;
                }

                info!(
                    session_id = %ctx.id,
                    attempt = reconnects,
                    max = MAX_RECONNECTS,
                    "connection dropped, reconnecting"
                );
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }

    // ENDED
    channel.close();
    ctx.registry.remove(&ctx.id);
    info!(session_id = %ctx.id, "session ended");
}

fn dispatch_session_ended(ctx: &SessionContext) {
    let can_resume = ctx.handles.has(&ctx.id).unwrap_or(false);
    ctx.dispatcher.dispatch(
        &ctx.id,
        BridgeEvent::SessionEnded {
            session_id: ctx.id.clone(),
            can_resume,
        },
    );
}
