//! Message transport over TCP and TLS.
//!
//! A [`Client`] keeps one connection to a server alive and reconnects after failures; a
//! [`Server`] accepts many connections and hands their messages to a pool of handler
//! threads. Both sides speak the frame format defined in `pulselink-proto`, exchange
//! in-band heartbeats to detect dead peers, and drop any connection that breaks the
//! protocol or lets its queues grow past the configured limits.
//!
//! Neither side blocks on the network while servicing connections: every socket is
//! non-blocking and each connection is driven once per tick by its owning thread.

pub mod client;
pub mod config;
pub mod connection;
mod dispatch;
pub mod error;
pub mod events;
pub mod handler;
pub mod queue;
pub mod server;
pub mod tls;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{Client, ClientBuilder};
pub use config::ConnectionConfig;
pub use connection::{ConnId, Connection, Invalidation};
pub use error::{ClientError, ConnectionError, DisposeError, ErrorKind, ServerError, TlsError};
pub use events::{ClientEvent, EventBus, ServerEvent};
pub use handler::{Handler, HandlerRegistry};
pub use queue::MessageQueue;
pub use server::{ConnectionInfo, MessageFilter, Server, ServerBuilder};
pub use tls::{ClientTlsConfig, ServerTlsConfig};
pub use transport::{TcpTransport, TlsTransport, Transport};

pub use pulselink_proto::{Message, MessageCodec, PostcardCodec, ProtoError};
