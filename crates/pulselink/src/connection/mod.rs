//! One framed, heartbeat-checked connection over a non-blocking transport.
//!
//! A connection is driven by its owner once per tick: a read cycle, a heartbeat check and a
//! write cycle. None of them block. Any failure invalidates the connection; invalidation is
//! terminal and the owner is expected to dispose of the connection afterwards.

mod heartbeat;
mod read;
mod write;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use pulselink_proto::{Message, MessageCodec};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, DisposeError, ErrorKind};
use crate::queue::MessageQueue;
use crate::transport::Transport;

use heartbeat::HeartbeatState;
use read::ReadState;
use write::WriteState;

/// Process-unique connection identifier.
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Why a connection stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub kind: ErrorKind,
    pub reason: String,
}

type InvalidationObserver = Box<dyn FnOnce(&Invalidation) + Send>;

pub struct Connection<M: Message> {
    id: ConnId,
    peer: SocketAddr,
    config: ConnectionConfig,
    transport: Box<dyn Transport>,
    codec: Arc<dyn MessageCodec<M>>,

    read: ReadState,
    write: WriteState,
    heartbeat: HeartbeatState,

    inbound: MessageQueue<M>,
    outbound: MessageQueue<M>,

    invalidation: Option<Invalidation>,
    observers: Vec<InvalidationObserver>,

    last_received: Instant,
    last_sent: Instant,
}

impl<M: Message> Connection<M> {
    pub fn new(
        transport: Box<dyn Transport>,
        peer: SocketAddr,
        codec: Arc<dyn MessageCodec<M>>,
        config: ConnectionConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: next_conn_id(),
            peer,
            config,
            transport,
            codec,
            read: ReadState::default(),
            write: WriteState::default(),
            heartbeat: HeartbeatState::default(),
            inbound: MessageQueue::new(),
            outbound: MessageQueue::new(),
            invalidation: None,
            observers: Vec::new(),
            last_received: now,
            last_sent: now,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Queue of messages waiting to be sent. Clone it to send from other threads.
    pub fn outbound_queue(&self) -> &MessageQueue<M> {
        &self.outbound
    }

    /// Number of decoded messages waiting for [`Self::dequeue_received_message`].
    pub fn inbound_count(&self) -> usize {
        self.inbound.count()
    }

    pub fn last_received(&self) -> Instant {
        self.last_received
    }

    pub fn last_sent(&self) -> Instant {
        self.last_sent
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidation.is_some()
    }

    pub fn invalidation(&self) -> Option<&Invalidation> {
        self.invalidation.as_ref()
    }

    /// Pop the oldest decoded message. Always `None` once invalidated.
    pub fn dequeue_received_message(&mut self) -> Option<M> {
        if self.is_invalidated() {
            return None;
        }
        self.inbound.dequeue()
    }

    /// Run `observer` when the connection is invalidated.
    ///
    /// Registering on an already invalidated connection runs the observer immediately.
    pub fn on_invalidated<F>(&mut self, observer: F)
    where
        F: FnOnce(&Invalidation) + Send + 'static,
    {
        match &self.invalidation {
            Some(invalidation) => observer(invalidation),
            None => self.observers.push(Box::new(observer)),
        }
    }

    /// Invalidate at the application's request.
    pub fn invalidate(&mut self, reason: impl Into<String>) {
        self.invalidate_with(&ConnectionError::Requested(reason.into()));
    }

    pub fn invalidate_with(&mut self, err: &ConnectionError) {
        self.invalidate_as(err.kind(), err.to_string());
    }

    fn invalidate_as(&mut self, kind: ErrorKind, reason: String) {
        if self.invalidation.is_some() {
            return;
        }
        warn!(
            conn_id = self.id,
            peer = %self.peer,
            ?kind,
            %reason,
            "Connection invalidated"
        );
        self.outbound.invalidate(&reason);
        let invalidation = Invalidation { kind, reason };
        for observer in self.observers.drain(..) {
            observer(&invalidation);
        }
        self.invalidation = Some(invalidation);
    }

    /// Invalidate with `err` and hand it back for the caller to return.
    fn fail(&mut self, err: ConnectionError) -> ConnectionError {
        self.invalidate_with(&err);
        err
    }

    /// Release buffers and shut the transport down.
    ///
    /// Every teardown step runs even if an earlier one fails; all failures are reported.
    pub fn dispose(mut self) -> Result<(), DisposeError> {
        self.read = ReadState::default();
        self.write = WriteState::default();
        let errors = self.transport.shutdown();
        debug!(
            conn_id = self.id,
            peer = %self.peer,
            errors = errors.len(),
            "Connection disposed"
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DisposeError(errors))
        }
    }
}

impl<M: Message> std::fmt::Debug for Connection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("invalidation", &self.invalidation)
            .finish_non_exhaustive()
    }
}
