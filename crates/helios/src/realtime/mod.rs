//! Realtime channel to the Helios service.
//!
//! One parametrised WebSocket client serves both the user stream
//! (`/ws/{userId}`) and the per-task conversation stream
//! (`/ws/tasks/{taskId}/messages`). The channel reconnects with capped
//! multiplicative backoff, sends a heartbeat while open, and hands every
//! decoded event to an [`EventHandler`], normally a [`StoreDispatcher`].

mod backoff;
mod channel;
mod dispatch;
mod endpoint;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod status;
mod transport;

pub use backoff::{
    BackoffPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_MULTIPLIER,
};
pub use channel::{
    CONNECT_TIMEOUT_SECS, ChannelConfig, PING_INTERVAL_SECS, RealtimeChannel, SendError,
};
pub use dispatch::{EventHandler, StoreDispatcher};
pub use endpoint::{DEFAULT_HOST, DEFAULT_PORT, Endpoint, resolve_base_url};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryConnector, MemoryPeer};
pub use status::{ChannelStatus, ConnectionState};
pub use transport::{Connector, Frame, FrameSink, FrameStream, Socket, TransportError, WsConnector};
