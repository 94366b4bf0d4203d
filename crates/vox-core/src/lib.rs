pub mod errors;
pub mod events;
pub mod ids;
pub mod input;
pub mod live;
pub mod prompt;
pub mod stream;

pub use errors::LiveError;
pub use ids::{ClientId, SessionId};
pub use input::InputItem;
pub use live::{LiveConnectConfig, LiveConnection, LiveConnector, LiveSender};
pub use stream::LiveEvent;
