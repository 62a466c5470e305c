//! Error types for connections, clients and servers.

use std::io;

use pulselink_proto::ProtoError;
use thiserror::Error;

/// Broad category of a connection failure.
///
/// Every failure that reaches a connection invalidates it; the kind is kept alongside the
/// human-readable reason so callers can tell a timeout from a protocol violation without
/// parsing strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed frame, bad heartbeat, undecodable payload.
    ProtocolViolation,
    /// An outstanding heartbeat request was not answered in time.
    HeartbeatTimeout,
    /// Inbound or outbound queue grew past its configured depth.
    CapacityExceeded,
    /// Socket I/O failed or the peer closed the stream.
    TransportFailure,
    /// TLS handshake failed.
    HandshakeFailure,
    /// No handler is registered for a received message kind.
    UnknownMessageType,
    /// The server's message filter refused a received message.
    MessageRejected,
    /// A message handler returned an error or panicked.
    HandlerFailure,
    /// Invalidated explicitly by the application.
    Requested,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("frame error: {0}")]
    Frame(ProtoError),

    #[error("failed to decode message: {0}")]
    Decode(ProtoError),

    #[error("failed to encode message: {0}")]
    Encode(ProtoError),

    #[error("received heartbeat request but heartbeat responses are disabled")]
    HeartbeatResponsesDisabled,

    #[error("received heartbeat response but heartbeats are disabled")]
    HeartbeatsDisabled,

    #[error("received heartbeat response without an outstanding request")]
    UnsolicitedHeartbeat,

    #[error("heartbeat response id {received} does not match outstanding request {expected}")]
    HeartbeatMismatch { expected: i32, received: i32 },

    #[error("no heartbeat response within {0:?}")]
    HeartbeatTimeout(std::time::Duration),

    #[error("inbound queue depth {depth} exceeds limit {limit}")]
    InboundQueueFull { depth: usize, limit: usize },

    #[error("outbound queue depth {depth} exceeds limit {limit}")]
    OutboundQueueFull { depth: usize, limit: usize },

    #[error("connection closed by peer")]
    PeerClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("unknown message type {0}")]
    UnknownMessage(String),

    #[error("message of type {0} rejected by filter")]
    Rejected(String),

    #[error("handler for {kind} failed: {reason}")]
    Handler { kind: String, reason: String },

    #[error("{0}")]
    Requested(String),
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::Frame(_)
            | ConnectionError::Decode(_)
            | ConnectionError::Encode(_)
            | ConnectionError::HeartbeatResponsesDisabled
            | ConnectionError::HeartbeatsDisabled
            | ConnectionError::UnsolicitedHeartbeat
            | ConnectionError::HeartbeatMismatch { .. } => ErrorKind::ProtocolViolation,
            ConnectionError::HeartbeatTimeout(_) => ErrorKind::HeartbeatTimeout,
            ConnectionError::InboundQueueFull { .. } | ConnectionError::OutboundQueueFull { .. } => {
                ErrorKind::CapacityExceeded
            }
            ConnectionError::PeerClosed | ConnectionError::Io(_) => ErrorKind::TransportFailure,
            ConnectionError::Handshake(_) => ErrorKind::HandshakeFailure,
            ConnectionError::UnknownMessage(_) => ErrorKind::UnknownMessageType,
            ConnectionError::Rejected(_) => ErrorKind::MessageRejected,
            ConnectionError::Handler { .. } => ErrorKind::HandlerFailure,
            ConnectionError::Requested(_) => ErrorKind::Requested,
        }
    }
}

/// Failures collected while tearing a connection down.
///
/// Teardown keeps going after a failed step, so several errors may be reported at once.
#[derive(Debug, Error)]
#[error("connection teardown failed: {}", join_errors(.0))]
pub struct DisposeError(pub Vec<io::Error>);

fn join_errors(errors: &[io::Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("failed to load certificates from {path}: {source}")]
    Pem {
        path: String,
        #[source]
        source: rustls::pki_types::pem::Error,
    },

    #[error("no private key found in {0}")]
    MissingKey(String),

    #[error("no certificates found in {0}")]
    MissingCertificates(String),

    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("verifier error: {0}")]
    Verifier(#[from] rustls::client::VerifierBuilderError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to server")]
    NotConnected,

    #[error("TLS configuration error: {0}")]
    Tls(#[from] TlsError),

    #[error("failed to spawn client thread: {0}")]
    Spawn(io::Error),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("TLS configuration error: {0}")]
    Tls(#[from] TlsError),

    #[error("failed to spawn server thread: {0}")]
    Spawn(io::Error),
}
