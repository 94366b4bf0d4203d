pub mod database;
pub mod error;
pub mod handles;
pub mod schema;
pub mod transcripts;

pub use database::Database;
pub use error::StoreError;
pub use handles::HandleStore;
pub use transcripts::{Role, TranscriptRepo};
