use std::io;
use std::time::Instant;

use bytes::{Buf, BytesMut};
use pulselink_proto::Message;
use pulselink_proto::frame::{
    encode_data_frame, encode_heartbeat_request, encode_heartbeat_response,
};
use tracing::trace;

use super::Connection;
use crate::error::ConnectionError;

/// The single write a connection may have in flight.
#[derive(Default)]
pub(super) struct WriteState {
    /// Bytes not yet accepted by the transport.
    in_flight: Option<BytesMut>,
}

impl<M: Message> Connection<M> {
    /// Send whatever is due without blocking.
    ///
    /// One buffer is built per write: a pending heartbeat response, then a new heartbeat
    /// request, then at most one outbound message. A buffer the transport only partly
    /// accepts stays in flight, and no new buffer is started until it has been fully
    /// written. On failure the connection is invalidated before the error is returned.
    pub fn perform_write_cycle(&mut self) -> Result<(), ConnectionError> {
        if self.is_invalidated() {
            return Ok(());
        }
        self.write_frame().map_err(|err| self.fail(err))
    }

    /// True while a partly written buffer is waiting for the transport.
    pub fn is_write_in_flight(&self) -> bool {
        self.write.in_flight.is_some()
    }

    fn write_frame(&mut self) -> Result<(), ConnectionError> {
        let depth = self.outbound.count();
        if depth > self.config.max_outbound_queue_size {
            return Err(ConnectionError::OutboundQueueFull {
                depth,
                limit: self.config.max_outbound_queue_size,
            });
        }

        if self.write.in_flight.is_some() {
            return self.progress_write();
        }

        if self.heartbeat.response_due.is_none() && !self.heartbeat.request_due && depth == 0 {
            return self.flush_transport();
        }

        let mut buf = BytesMut::new();
        if let Some(id) = self.heartbeat.response_due.take() {
            trace!(conn_id = self.id, id, "Sending heartbeat response");
            encode_heartbeat_response(id, &mut buf);
        }
        if self.heartbeat.request_due {
            let id = rand::random::<i32>();
            trace!(conn_id = self.id, id, "Sending heartbeat request");
            self.heartbeat.request_due = false;
            self.heartbeat.awaiting = Some((id, Instant::now()));
            encode_heartbeat_request(id, &mut buf);
        }
        if let Some(message) = self.outbound.dequeue() {
            let payload = self.codec.encode(&message).map_err(ConnectionError::Encode)?;
            encode_data_frame(&payload, &mut buf).map_err(ConnectionError::Encode)?;
            trace!(conn_id = self.id, len = payload.len(), "Sending data frame");
        }
        if buf.is_empty() {
            return Ok(());
        }

        self.write.in_flight = Some(buf);
        self.progress_write()
    }

    fn progress_write(&mut self) -> Result<(), ConnectionError> {
        let Some(buf) = self.write.in_flight.as_mut() else {
            return Ok(());
        };
        while buf.has_remaining() {
            match self.transport.write(buf.chunk()) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.write.in_flight = None;
        self.last_sent = Instant::now();
        self.flush_transport()
    }

    /// Push out anything the transport buffered internally (TLS records).
    fn flush_transport(&mut self) -> Result<(), ConnectionError> {
        match self.transport.flush() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use bytes::BytesMut;
    use proptest::prelude::*;
    use pulselink_proto::frame::{FrameKind, encode_heartbeat_request, try_decode_frames};

    use crate::config::ConnectionConfig;
    use crate::error::ErrorKind;
    use crate::test_support::{Text, data_frame, scripted_connection};

    #[test]
    fn sends_one_message_per_cycle_in_order() {
        let (script, mut conn) = scripted_connection(ConnectionConfig::default());
        conn.outbound_queue().enqueue(Text::from("first"));
        conn.outbound_queue().enqueue(Text::from("second"));

        conn.perform_write_cycle().unwrap();
        assert_eq!(script.take_written(), data_frame("first"));
        conn.perform_write_cycle().unwrap();
        assert_eq!(script.take_written(), data_frame("second"));
        conn.perform_write_cycle().unwrap();
        assert!(script.take_written().is_empty());
    }

    #[test]
    fn heartbeat_response_and_request_precede_message() {
        let cfg = ConnectionConfig {
            heartbeat_inactivity_interval: std::time::Duration::ZERO,
            ..ConnectionConfig::default()
        };
        let (script, mut conn) = scripted_connection(cfg);
        let mut request = BytesMut::new();
        encode_heartbeat_request(77, &mut request);
        script.push_bytes(&request);
        assert!(conn.perform_read_cycle().unwrap());
        std::thread::sleep(std::time::Duration::from_millis(2));
        conn.perform_heartbeat_check().unwrap();
        conn.outbound_queue().enqueue(Text::from("payload"));

        conn.perform_write_cycle().unwrap();
        let written = script.take_written();
        let (frames, consumed) = try_decode_frames(&written, 1_000).unwrap();
        assert_eq!(consumed, written.len());
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].kind, FrameKind::HeartbeatResponse);
        assert_eq!(frames[0].payload, &77i32.to_le_bytes());
        assert_eq!(frames[1].kind, FrameKind::HeartbeatRequest);
        assert_eq!(frames[2].kind, FrameKind::Data(7));
        assert_eq!(frames[2].payload, b"payload");
    }

    #[test]
    fn partial_write_blocks_new_buffers_until_complete() {
        let (script, mut conn) = scripted_connection(ConnectionConfig::default());
        let sent_before = conn.last_sent();
        conn.outbound_queue().enqueue(Text::from("abcdef"));
        conn.outbound_queue().enqueue(Text::from("next"));

        script.set_write_budget(Some(3));
        conn.perform_write_cycle().unwrap();
        assert!(conn.is_write_in_flight());
        assert_eq!(conn.last_sent(), sent_before);

        // Still blocked: nothing new is started.
        conn.perform_write_cycle().unwrap();
        assert_eq!(conn.outbound_queue().count(), 1);

        std::thread::sleep(std::time::Duration::from_millis(1));
        script.set_write_budget(None);
        conn.perform_write_cycle().unwrap();
        assert!(!conn.is_write_in_flight());
        assert!(conn.last_sent() > sent_before);
        assert_eq!(script.take_written(), data_frame("abcdef"));
        assert_eq!(conn.outbound_queue().count(), 1);

        conn.perform_write_cycle().unwrap();
        assert_eq!(script.take_written(), data_frame("next"));
    }

    #[test]
    fn outbound_depth_over_limit_invalidates() {
        let cfg = ConnectionConfig {
            max_outbound_queue_size: 2,
            ..ConnectionConfig::default()
        };
        let (script, mut conn) = scripted_connection(cfg);
        conn.outbound_queue().enqueue(Text::from("a"));
        conn.outbound_queue().enqueue(Text::from("b"));
        conn.perform_write_cycle().unwrap();
        assert!(!conn.is_invalidated());

        for text in ["c", "d"] {
            conn.outbound_queue().enqueue(Text::from(text));
        }
        assert!(conn.perform_write_cycle().is_err());
        assert_eq!(
            conn.invalidation().unwrap().kind,
            ErrorKind::CapacityExceeded
        );
        assert!(conn.outbound_queue().is_invalidated());

        script.take_written();
        conn.perform_write_cycle().unwrap();
        assert!(script.take_written().is_empty());
    }

    #[test]
    fn empty_encoding_invalidates() {
        let (_, mut conn) = scripted_connection(ConnectionConfig::default());
        conn.outbound_queue().enqueue(Text::from(""));
        assert!(conn.perform_write_cycle().is_err());
        assert_eq!(
            conn.invalidation().unwrap().kind,
            ErrorKind::ProtocolViolation
        );
    }

    #[test]
    fn write_errors_are_transport_failures() {
        let (script, mut conn) = scripted_connection(ConnectionConfig::default());
        script.fail_writes(io::ErrorKind::BrokenPipe);
        conn.outbound_queue().enqueue(Text::from("x"));
        assert!(conn.perform_write_cycle().is_err());
        assert_eq!(
            conn.invalidation().unwrap().kind,
            ErrorKind::TransportFailure
        );
    }

    proptest! {
        #[test]
        fn peer_decodes_every_message_in_order(
            texts in prop::collection::vec("[a-z0-9]{1,32}", 0..40),
            budget in 1usize..64,
        ) {
            let (script, mut conn) = scripted_connection(ConnectionConfig::default());
            for text in &texts {
                conn.outbound_queue().enqueue(Text::from(text.as_str()));
            }

            let mut written = Vec::new();
            for _ in 0..(texts.len() * 64 + 1) {
                script.set_write_budget(Some(budget));
                conn.perform_write_cycle().unwrap();
                written.extend(script.take_written());
            }

            let (frames, consumed) = try_decode_frames(&written, 1_000).unwrap();
            prop_assert_eq!(consumed, written.len());
            let decoded: Vec<String> = frames
                .iter()
                .map(|f| String::from_utf8(f.payload.to_vec()).unwrap())
                .collect();
            prop_assert_eq!(decoded, texts);
        }
    }
}
