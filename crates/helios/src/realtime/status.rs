//! Connection state reported by a realtime channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the underlying socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}

/// Snapshot of a channel, published on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    /// Failed or closed attempts since the last successful open.
    pub retries: u32,
    /// Set when the retry budget ran out; cleared by a manual connect.
    pub exhausted: bool,
    /// A reconnect timer is armed.
    pub reconnect_pending: bool,
    /// The heartbeat timer is armed.
    pub heartbeat_active: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Resolved URL of the endpoint.
    pub endpoint: Option<String>,
}

impl ChannelStatus {
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}
