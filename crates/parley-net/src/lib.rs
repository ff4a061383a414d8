// Live-connection layer: connection state machine, listener registry and
// transports.

pub mod connection;
pub mod error;
pub mod listeners;
pub mod memory;
pub mod transport;
pub mod ws;

pub use connection::{ConnectionConfig, ConnectionManager};
pub use error::NetError;
pub use listeners::{Listener, ListenerRegistry, Subscriptions};
pub use memory::{MemoryPeer, MemoryServer, MemoryTransport};
pub use transport::{ConnectOptions, Transport, TransportEvent, TransportLink};
pub use ws::WsTransport;
