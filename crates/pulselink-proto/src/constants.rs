/// Length prefix size in bytes.
///
/// TCP is a byte stream, so every frame is written as `[i32 len_le][payload]`.
pub const LEN_PREFIX: usize = 4;

/// Reserved length prefix announcing a heartbeat request.
pub const HEARTBEAT_REQUEST_PREFIX: i32 = -1;

/// Reserved length prefix announcing a heartbeat response.
pub const HEARTBEAT_RESPONSE_PREFIX: i32 = -2;

/// Heartbeat frames always carry a single `i32` correlation id.
pub const HEARTBEAT_PAYLOAD_LEN: usize = 4;

/// Full size of a heartbeat frame on the wire (prefix + id).
pub const HEARTBEAT_FRAME_LEN: usize = LEN_PREFIX + HEARTBEAT_PAYLOAD_LEN;
