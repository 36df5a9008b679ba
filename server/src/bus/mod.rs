pub mod channel;
pub mod connection;
pub mod hub;
pub mod message;
pub mod router;
pub mod session;

pub use channel::Channel;
pub use hub::RoomHub;
pub use message::Message;
pub use router::{HandlerFn, MessageRouter};
pub use session::{ConnectionId, OutboundFrame, SessionContext};
