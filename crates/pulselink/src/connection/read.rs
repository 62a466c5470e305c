use std::io;
use std::time::Instant;

use pulselink_proto::constants::LEN_PREFIX;
use pulselink_proto::frame::{FrameKind, classify_prefix, decode_heartbeat_id, decode_prefix};
use pulselink_proto::limits::READ_CHUNK_SIZE;
use pulselink_proto::Message;
use tracing::trace;

use super::Connection;
use crate::error::ConnectionError;
use crate::transport::Transport;

/// Progress through the frame currently being received.
pub(super) enum ReadState {
    /// Collecting the 4-byte length prefix.
    Prefix {
        buf: [u8; LEN_PREFIX],
        filled: usize,
    },
    /// Collecting `kind.payload_len()` payload bytes into `buf`.
    Payload { kind: FrameKind, buf: Vec<u8> },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::Prefix {
            buf: [0; LEN_PREFIX],
            filled: 0,
        }
    }
}

impl<M: Message> Connection<M> {
    /// Pull bytes toward the next frame without blocking.
    ///
    /// Returns `Ok(true)` when a whole frame was consumed this call, `Ok(false)` when more
    /// bytes are needed. Partial progress is kept for the next call. On failure the
    /// connection is invalidated before the error is returned.
    pub fn perform_read_cycle(&mut self) -> Result<bool, ConnectionError> {
        if self.is_invalidated() {
            return Ok(false);
        }
        self.read_frame().map_err(|err| self.fail(err))
    }

    fn read_frame(&mut self) -> Result<bool, ConnectionError> {
        if let ReadState::Prefix { buf, filled } = &mut self.read {
            while *filled < LEN_PREFIX {
                let Some(n) = read_some(self.transport.as_mut(), &mut buf[*filled..])? else {
                    return Ok(false);
                };
                *filled += n;
                self.last_received = Instant::now();
            }
            let prefix = decode_prefix(*buf);
            let kind = self.begin_frame(prefix)?;
            self.read = ReadState::Payload {
                kind,
                buf: Vec::with_capacity(kind.payload_len().min(READ_CHUNK_SIZE)),
            };
        }

        let ReadState::Payload { kind, buf } = &mut self.read else {
            return Ok(false);
        };
        let target = kind.payload_len();
        while buf.len() < target {
            let filled = buf.len();
            let want = (target - filled).min(READ_CHUNK_SIZE);
            buf.resize(filled + want, 0);
            match read_some(self.transport.as_mut(), &mut buf[filled..]) {
                Ok(Some(n)) => {
                    buf.truncate(filled + n);
                    self.last_received = Instant::now();
                }
                Ok(None) => {
                    buf.truncate(filled);
                    return Ok(false);
                }
                Err(err) => {
                    buf.truncate(filled);
                    return Err(err);
                }
            }
        }

        let kind = *kind;
        let payload = std::mem::take(buf);
        self.read = ReadState::default();
        self.finish_frame(kind, &payload)?;
        Ok(true)
    }

    /// Validate a freshly read prefix against the connection's state and limits.
    fn begin_frame(&mut self, prefix: i32) -> Result<FrameKind, ConnectionError> {
        let kind = classify_prefix(prefix, self.config.max_inbound_packet_size)
            .map_err(ConnectionError::Frame)?;
        match kind {
            FrameKind::HeartbeatRequest if !self.config.heartbeat_responses_enabled => {
                Err(ConnectionError::HeartbeatResponsesDisabled)
            }
            FrameKind::HeartbeatResponse if !self.config.heartbeat_enabled => {
                Err(ConnectionError::HeartbeatsDisabled)
            }
            FrameKind::HeartbeatResponse if self.heartbeat.awaiting.is_none() => {
                Err(ConnectionError::UnsolicitedHeartbeat)
            }
            _ => {
                // A backlogged connection accepts no further frame of any kind.
                let depth = self.inbound.count();
                if depth > self.config.max_inbound_queue_size {
                    return Err(ConnectionError::InboundQueueFull {
                        depth,
                        limit: self.config.max_inbound_queue_size,
                    });
                }
                if let FrameKind::Data(len) = kind {
                    trace!(conn_id = self.id, len, "Receiving data frame");
                }
                Ok(kind)
            }
        }
    }

    fn finish_frame(&mut self, kind: FrameKind, payload: &[u8]) -> Result<(), ConnectionError> {
        match kind {
            FrameKind::HeartbeatRequest => {
                let id = decode_heartbeat_id(payload).map_err(ConnectionError::Frame)?;
                trace!(conn_id = self.id, id, "Heartbeat request received");
                self.heartbeat.response_due = Some(id);
            }
            FrameKind::HeartbeatResponse => {
                let received = decode_heartbeat_id(payload).map_err(ConnectionError::Frame)?;
                match self.heartbeat.awaiting {
                    Some((expected, _)) if expected == received => {
                        trace!(conn_id = self.id, id = received, "Heartbeat response received");
                        self.heartbeat.awaiting = None;
                    }
                    Some((expected, _)) => {
                        return Err(ConnectionError::HeartbeatMismatch { expected, received });
                    }
                    None => return Err(ConnectionError::UnsolicitedHeartbeat),
                }
            }
            FrameKind::Data(_) => {
                let message = self.codec.decode(payload).map_err(ConnectionError::Decode)?;
                self.inbound.enqueue(message);
            }
        }
        Ok(())
    }
}

/// One non-blocking read. `Ok(None)` means nothing is available right now.
fn read_some(transport: &mut dyn Transport, buf: &mut [u8]) -> Result<Option<usize>, ConnectionError> {
    loop {
        match transport.read(buf) {
            Ok(0) => return Err(ConnectionError::PeerClosed),
            Ok(n) => return Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
