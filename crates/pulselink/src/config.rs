use std::time::Duration;

use pulselink_proto::limits::{
    DEFAULT_MAX_INBOUND_PACKET_SIZE, DEFAULT_MAX_INBOUND_QUEUE_SIZE,
    DEFAULT_MAX_OUTBOUND_QUEUE_SIZE,
};

/// Tunables for a single connection.
///
/// Every connection takes its own copy at construction time, so changing a client's or
/// server's config only affects connections created afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Send heartbeat requests on a quiet connection and expect them to be answered.
    pub heartbeat_enabled: bool,
    /// Answer heartbeat requests sent by the peer.
    pub heartbeat_responses_enabled: bool,
    /// How long an outstanding heartbeat request may wait for its response.
    pub heartbeat_response_timeout: Duration,
    /// How long the connection may go without receiving data before a heartbeat is sent.
    pub heartbeat_inactivity_interval: Duration,
    /// Largest data frame payload accepted from the peer, in bytes.
    pub max_inbound_packet_size: usize,
    /// Decoded messages allowed to wait for dispatch before the connection is invalidated.
    pub max_inbound_queue_size: usize,
    /// Messages allowed to wait for sending before the connection is invalidated.
    pub max_outbound_queue_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_enabled: true,
            heartbeat_responses_enabled: true,
            heartbeat_response_timeout: Duration::from_secs(5),
            heartbeat_inactivity_interval: Duration::from_secs(10),
            max_inbound_packet_size: DEFAULT_MAX_INBOUND_PACKET_SIZE,
            max_inbound_queue_size: DEFAULT_MAX_INBOUND_QUEUE_SIZE,
            max_outbound_queue_size: DEFAULT_MAX_OUTBOUND_QUEUE_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Defaults with both heartbeat directions switched off.
    ///
    /// A peer that sends heartbeat frames to such a connection is disconnected.
    pub fn without_heartbeats() -> Self {
        Self {
            heartbeat_enabled: false,
            heartbeat_responses_enabled: false,
            ..Self::default()
        }
    }
}
