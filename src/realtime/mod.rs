mod policy;
mod session;
mod session_loop;
mod transport;

pub use session::{ConnectionState, RealtimeEvent, RealtimeSession};
pub use transport::{LinkEvent, RealtimeLink, RealtimeTransport, WebSocketTransport};
