//! Live backend connectors: Gemini Live over WebSocket, credential
//! brokering, and a scripted mock for tests.

pub mod auth;
pub mod gemini;
pub mod mock;

pub use auth::{CredentialBroker, Credentials};
pub use gemini::GeminiLive;
pub use mock::{MockConnector, MockScript, SentItem};
