//! Per-session bridging between transport clients and the remote live
//! service: bounded input channels, the session registry, the streaming
//! driver with its reconnect supervisor, and the output dispatcher.

pub mod channel;
pub mod dispatcher;
pub mod driver;
pub mod manager;
pub mod registry;
pub mod supervisor;

pub use channel::{InputChannel, CHANNEL_CAPACITY, POLL_INTERVAL};
pub use dispatcher::OutputDispatcher;
pub use manager::SessionManager;
pub use registry::SessionRegistry;
pub use supervisor::{MAX_RECONNECTS, RECONNECT_DELAY};
