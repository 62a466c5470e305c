use bytes::{BufMut, BytesMut};

use crate::{
    constants::{
        HEARTBEAT_FRAME_LEN, HEARTBEAT_PAYLOAD_LEN, HEARTBEAT_REQUEST_PREFIX,
        HEARTBEAT_RESPONSE_PREFIX, LEN_PREFIX,
    },
    error::ProtoError,
    limits::MAX_FRAME_PAYLOAD,
};

/// What a length prefix announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Application data with the given payload length (always >= 1).
    Data(usize),
    /// Heartbeat request carrying a 4-byte correlation id.
    HeartbeatRequest,
    /// Heartbeat response echoing a 4-byte correlation id.
    HeartbeatResponse,
}

impl FrameKind {
    /// Number of payload bytes that follow the prefix.
    pub const fn payload_len(self) -> usize {
        match self {
            FrameKind::Data(len) => len,
            FrameKind::HeartbeatRequest | FrameKind::HeartbeatResponse => HEARTBEAT_PAYLOAD_LEN,
        }
    }
}

/// Interpret a length prefix.
///
/// Heartbeat prefixes are recognised regardless of `max_payload`; data lengths must
/// satisfy `1 <= len <= max_payload`. Everything else is malformed.
pub fn classify_prefix(prefix: i32, max_payload: usize) -> Result<FrameKind, ProtoError> {
    match prefix {
        HEARTBEAT_REQUEST_PREFIX => Ok(FrameKind::HeartbeatRequest),
        HEARTBEAT_RESPONSE_PREFIX => Ok(FrameKind::HeartbeatResponse),
        len if len >= 1 && len as usize <= max_payload => Ok(FrameKind::Data(len as usize)),
        len => Err(ProtoError::MalformedLength(len)),
    }
}

#[inline]
pub fn decode_prefix(bytes: [u8; LEN_PREFIX]) -> i32 {
    i32::from_le_bytes(bytes)
}

/// Read the correlation id out of a heartbeat payload.
pub fn decode_heartbeat_id(payload: &[u8]) -> Result<i32, ProtoError> {
    let bytes: [u8; HEARTBEAT_PAYLOAD_LEN] = payload
        .get(..HEARTBEAT_PAYLOAD_LEN)
        .ok_or(ProtoError::TooShort)?
        .try_into()
        .map_err(|_| ProtoError::TooShort)?;
    Ok(i32::from_le_bytes(bytes))
}

/// Append a data frame (`[len][payload]`) to `out`.
pub fn encode_data_frame(payload: &[u8], out: &mut BytesMut) -> Result<(), ProtoError> {
    if payload.is_empty() {
        return Err(ProtoError::EmptyPayload);
    }
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(ProtoError::PayloadTooLarge(payload.len()));
    }
    out.reserve(LEN_PREFIX + payload.len());
    out.put_i32_le(payload.len() as i32);
    out.put_slice(payload);
    Ok(())
}

pub fn encode_heartbeat_request(id: i32, out: &mut BytesMut) {
    encode_heartbeat(HEARTBEAT_REQUEST_PREFIX, id, out);
}

pub fn encode_heartbeat_response(id: i32, out: &mut BytesMut) {
    encode_heartbeat(HEARTBEAT_RESPONSE_PREFIX, id, out);
}

fn encode_heartbeat(prefix: i32, id: i32, out: &mut BytesMut) {
    out.reserve(HEARTBEAT_FRAME_LEN);
    out.put_i32_le(prefix);
    out.put_i32_le(id);
}

/// A complete frame borrowed from a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView<'a> {
    pub kind: FrameKind,
    pub payload: &'a [u8],
}

/// Decode as many complete frames as `in_buf` holds.
///
/// Returns the frames and the number of bytes they occupy; a trailing partial frame is
/// left for the caller to complete with more data. The connection engine reads frames
/// incrementally instead; this is for peers that buffer whole reads.
pub fn try_decode_frames(
    in_buf: &[u8],
    max_payload: usize,
) -> Result<(Vec<FrameView<'_>>, usize), ProtoError> {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    loop {
        if in_buf.len().saturating_sub(offset) < LEN_PREFIX {
            break;
        }
        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&in_buf[offset..offset + LEN_PREFIX]);
        let kind = classify_prefix(decode_prefix(prefix), max_payload)?;

        let total_needed = LEN_PREFIX + kind.payload_len();
        if in_buf.len().saturating_sub(offset) < total_needed {
            break;
        }

        let payload = &in_buf[offset + LEN_PREFIX..offset + total_needed];
        frames.push(FrameView { kind, payload });
        offset += total_needed;
    }

    Ok((frames, offset))
}
