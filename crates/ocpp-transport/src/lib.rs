//! # OCPP Transport
//!
//! The seam between the central system and a connected charge point. The
//! socket itself lives outside this workspace; what the station manager needs
//! is a [`DeviceChannel`] that sends a Call and resolves with the paired reply.
//! [`MessageChannel`] provides that pairing over any frame sink.

pub mod channel;
pub mod error;

pub use channel::MessageChannel;
pub use error::*;

use ocpp_types::Call;
use std::time::Duration;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum encoded frame size in bytes
    pub max_message_size: usize,
    /// How long a Call may wait for its reply
    pub request_timeout: Duration,
    /// Capacity of the outbound frame queue
    pub message_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: 65536, // 64KB
            request_timeout: Duration::from_secs(30),
            message_buffer_size: 1000,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is established and ready
    Connected,
    /// Connection is closed
    Closed,
}

/// A live, bidirectional protocol channel to one charge point
#[async_trait::async_trait]
pub trait DeviceChannel: Send + Sync {
    /// Charging station this channel talks to
    fn charging_station_id(&self) -> &str;

    /// Send a Call and wait for the CallResult payload
    async fn call(&self, call: Call) -> TransportResult<serde_json::Value>;

    /// Get connection state
    fn state(&self) -> ConnectionState;

    /// Close the channel, failing every pending call
    async fn close(&self, reason: &str);

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// Transport statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransportStats {
    /// Calls written to the outbound queue
    pub calls_sent: u64,
    /// Replies paired with a pending call
    pub replies_received: u64,
    /// Calls that ran out of time
    pub timeouts: u64,
    /// Replies nobody was waiting for
    pub orphan_replies: u64,
}
