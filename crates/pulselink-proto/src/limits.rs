//! Size limits shared by the framing code and the connection configuration.
//!
//! Keeping them here gives one source of truth for the defaults the transport
//! crate exposes through `ConnectionConfig`.

// ============================================================================
// Frame Limits
// ============================================================================

/// Default maximum payload size accepted from a peer (1,000,000 bytes).
///
/// Larger frames invalidate the receiving connection instead of being buffered.
pub const DEFAULT_MAX_INBOUND_PACKET_SIZE: usize = 1_000_000;

/// Largest payload that can be described by the signed 32-bit length prefix.
pub const MAX_FRAME_PAYLOAD: usize = i32::MAX as usize;

// ============================================================================
// Queue Limits
// ============================================================================

/// Default number of decoded messages allowed to wait in a connection's inbound queue.
pub const DEFAULT_MAX_INBOUND_QUEUE_SIZE: usize = 10;

/// Default number of messages allowed to wait in a connection's outbound queue.
pub const DEFAULT_MAX_OUTBOUND_QUEUE_SIZE: usize = 100;

// ============================================================================
// Read Buffering
// ============================================================================

/// Size of the scratch buffer used to pull payload bytes off the transport.
///
/// Payloads larger than this are accumulated across several reads.
pub const READ_CHUNK_SIZE: usize = 16 * 1024;
