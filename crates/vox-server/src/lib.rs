//! WebSocket and REST surface: client registry with heartbeat, typed
//! command dispatch into the engine, and the outbound event forwarder.

pub mod client;
pub mod forwarder;
pub mod handlers;
pub mod server;

pub use client::ClientRegistry;
pub use server::{start, AppState, ServerConfig, ServerHandle};
