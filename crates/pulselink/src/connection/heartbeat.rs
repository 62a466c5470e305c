use std::time::Instant;

use pulselink_proto::Message;
use tracing::trace;

use super::Connection;
use crate::error::ConnectionError;

/// In-band liveness state.
///
/// At most one request is outstanding at a time. Only the most recent request id received
/// from the peer is echoed back.
#[derive(Debug, Default)]
pub(super) struct HeartbeatState {
    /// Id and send time of the request waiting for a response.
    pub(super) awaiting: Option<(i32, Instant)>,
    /// Id to echo on the next write.
    pub(super) response_due: Option<i32>,
    /// A new request goes out on the next write.
    pub(super) request_due: bool,
}

impl<M: Message> Connection<M> {
    /// Decide whether a heartbeat is due and enforce the response timeout.
    ///
    /// Does nothing when invalidated, when heartbeats are disabled, or while a request is
    /// already waiting to be written.
    pub fn perform_heartbeat_check(&mut self) -> Result<(), ConnectionError> {
        if self.is_invalidated() || !self.config.heartbeat_enabled || self.heartbeat.request_due {
            return Ok(());
        }

        if let Some((id, sent_at)) = self.heartbeat.awaiting {
            if sent_at.elapsed() > self.config.heartbeat_response_timeout {
                trace!(conn_id = self.id, id, "Heartbeat response overdue");
                let err = ConnectionError::HeartbeatTimeout(self.config.heartbeat_response_timeout);
                return Err(self.fail(err));
            }
            return Ok(());
        }

        if self.last_received.elapsed() > self.config.heartbeat_inactivity_interval {
            trace!(conn_id = self.id, "Connection idle, heartbeat due");
            self.heartbeat.request_due = true;
        }
        Ok(())
    }

    /// True while a heartbeat request has been sent and not yet answered.
    pub fn is_awaiting_heartbeat(&self) -> bool {
        self.heartbeat.awaiting.is_some()
    }
}
