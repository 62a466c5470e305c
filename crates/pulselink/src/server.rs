//! Multi-connection server.
//!
//! One service thread accepts sockets and drives every connection once per tick. Decoded
//! messages are handed to a dispatch pool, so a slow handler never stalls the service loop.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use pulselink_proto::{Message, MessageCodec};
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::connection::{ConnId, Connection};
use crate::dispatch::{DispatchPool, Job};
use crate::error::{ConnectionError, ServerError};
use crate::events::{EventBus, ServerEvent};
use crate::handler::HandlerRegistry;
use crate::queue::MessageQueue;
use crate::tls::{ServerTls, ServerTlsConfig};
use crate::transport::{TcpTransport, Transport};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_DISPATCH_WORKERS: usize = 4;
/// Upper bound on one server-side TLS handshake, and so on how long it stalls the service loop.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity of the connection a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub conn_id: ConnId,
    pub peer: SocketAddr,
}

/// Decides whether a received message kind may be dispatched on a connection.
pub type MessageFilter<M> =
    Arc<dyn Fn(&ConnectionInfo, <M as Message>::Kind) -> bool + Send + Sync>;

pub struct ServerBuilder<M: Message> {
    bind: SocketAddr,
    codec: Arc<dyn MessageCodec<M>>,
    config: ConnectionConfig,
    tls: Option<ServerTlsConfig>,
    handlers: HandlerRegistry<M>,
    filter: Option<MessageFilter<M>>,
    tick_interval: Duration,
    dispatch_workers: usize,
    handshake_timeout: Duration,
    events: Arc<EventBus<ServerEvent>>,
}

impl<M: Message> ServerBuilder<M> {
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tls(mut self, tls: ServerTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry<M>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn handler<F>(mut self, kind: M::Kind, handler: F) -> Self
    where
        F: Fn(M, &MessageQueue<M>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.register(kind, handler);
        self
    }

    /// Only dispatch messages for which `filter` returns true; others invalidate the
    /// connection they arrived on.
    pub fn message_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ConnectionInfo, M::Kind) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn dispatch_workers(mut self, workers: usize) -> Self {
        self.dispatch_workers = workers;
        self
    }

    /// Handshakes run on the service thread. While one is in progress no other connection is
    /// read, written or heartbeat-checked, so this also bounds how long they all stall.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Subscribe before starting so no event is missed.
    pub fn subscribe(&self) -> Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Bind the listener and spawn the service thread.
    pub fn start(self) -> Result<Server, ServerError> {
        let tls = self.tls.as_ref().map(ServerTlsConfig::build).transpose()?;

        let bind_err = |source| ServerError::Bind {
            addr: self.bind,
            source,
        };
        let listener = TcpListener::bind(self.bind).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let dispatch = DispatchPool::new("pulselink-server", self.dispatch_workers)
            .map_err(ServerError::Spawn)?;
        let shared = Arc::new(ServerShared {
            running: AtomicBool::new(true),
            connection_count: AtomicUsize::new(0),
        });

        let worker = ServerWorker {
            listener,
            tls,
            codec: self.codec,
            config: self.config,
            handlers: self.handlers,
            filter: self.filter,
            dispatch,
            tick_interval: self.tick_interval,
            handshake_timeout: self.handshake_timeout,
            shared: Arc::clone(&shared),
            events: Arc::clone(&self.events),
            connections: Vec::new(),
        };
        let join = thread::Builder::new()
            .name("pulselink-server".to_string())
            .spawn(move || worker.run())
            .map_err(ServerError::Spawn)?;

        info!(%local_addr, tls = self.tls.is_some(), "Server listening");
        Ok(Server {
            local_addr,
            shared,
            events: self.events,
            join: Some(join),
        })
    }
}

struct ServerShared {
    running: AtomicBool,
    connection_count: AtomicUsize,
}

/// Handle to a running server. Dropping it stops the server.
pub struct Server {
    local_addr: SocketAddr,
    shared: Arc<ServerShared>,
    events: Arc<EventBus<ServerEvent>>,
    join: Option<JoinHandle<()>>,
}

impl Server {
    pub fn builder<M, C>(bind: SocketAddr, codec: C) -> ServerBuilder<M>
    where
        M: Message,
        C: MessageCodec<M>,
    {
        ServerBuilder {
            bind,
            codec: Arc::new(codec),
            config: ConnectionConfig::default(),
            tls: None,
            handlers: HandlerRegistry::new(),
            filter: None,
            tick_interval: DEFAULT_TICK_INTERVAL,
            dispatch_workers: DEFAULT_DISPATCH_WORKERS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            events: Arc::new(EventBus::new()),
        }
    }

    /// Address the listener is bound to (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently being serviced.
    pub fn connection_count(&self) -> usize {
        self.shared.connection_count.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Stop accepting, close every connection and wait for queued handlers to finish.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ServerWorker<M: Message> {
    listener: TcpListener,
    tls: Option<ServerTls>,
    codec: Arc<dyn MessageCodec<M>>,
    config: ConnectionConfig,
    handlers: HandlerRegistry<M>,
    filter: Option<MessageFilter<M>>,
    dispatch: DispatchPool<M>,
    tick_interval: Duration,
    handshake_timeout: Duration,
    shared: Arc<ServerShared>,
    events: Arc<EventBus<ServerEvent>>,
    connections: Vec<Connection<M>>,
}

impl<M: Message> ServerWorker<M> {
    fn run(mut self) {
        while self.shared.running.load(Ordering::Acquire) {
            self.accept_pending();
            self.service_connections();
            self.reap_invalidated();
            thread::sleep(self.tick_interval);
        }
        self.shutdown();
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((sock, peer)) => self.admit(sock, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, sock: TcpStream, peer: SocketAddr) {
        let (transport, handshake_error) = match self.open_transport(sock) {
            Ok(opened) => opened,
            Err(e) => {
                error!(%peer, error = %e, "Failed to set up accepted socket");
                return;
            }
        };

        let mut conn = Connection::new(transport, peer, Arc::clone(&self.codec), self.config);
        let conn_id = conn.id();
        let events = Arc::clone(&self.events);
        conn.on_invalidated(move |inv| {
            events.publish(ServerEvent::Invalidated {
                conn_id,
                reason: inv.reason.clone(),
            });
        });

        info!(conn_id, %peer, "Connection accepted");
        self.events.publish(ServerEvent::Connected { conn_id, peer });

        if let Some(e) = handshake_error {
            warn!(conn_id, %peer, error = %e, "TLS handshake failed");
            conn.invalidate_with(&ConnectionError::Handshake(e.to_string()));
        }

        self.connections.push(conn);
        self.publish_count();
    }

    /// Wrap an accepted socket. A failed TLS handshake still yields a plain transport over
    /// the socket so the connection can be torn down like any other.
    fn open_transport(
        &self,
        sock: TcpStream,
    ) -> io::Result<(Box<dyn Transport>, Option<io::Error>)> {
        let Some(tls) = &self.tls else {
            return Ok((Box::new(TcpTransport::new(sock)?), None));
        };
        let raw = sock.try_clone()?;
        match tls.handshake(sock, self.handshake_timeout) {
            Ok(transport) => Ok((Box::new(transport), None)),
            Err(e) => Ok((Box::new(TcpTransport::new(raw)?), Some(e))),
        }
    }

    fn service_connections(&mut self) {
        for conn in &mut self.connections {
            if let Err(err) =
                read_and_dispatch(conn, &self.handlers, self.filter.as_ref(), &self.dispatch)
            {
                conn.invalidate_with(&err);
            }
        }

        for conn in &mut self.connections {
            check_and_flush(conn);
        }
    }

    fn reap_invalidated(&mut self) {
        if !self.connections.iter().any(Connection::is_invalidated) {
            return;
        }
        let (dead, alive): (Vec<_>, Vec<_>) = std::mem::take(&mut self.connections)
            .into_iter()
            .partition(Connection::is_invalidated);
        self.connections = alive;
        for conn in dead {
            self.close(conn);
        }
        self.publish_count();
    }

    fn close(&self, conn: Connection<M>) {
        let conn_id = conn.id();
        let peer = conn.peer();
        let reason = conn
            .invalidation()
            .map(|inv| inv.reason.clone())
            .unwrap_or_default();
        if let Err(e) = conn.dispose() {
            warn!(conn_id, %peer, error = %e, "Error while disposing connection");
        }
        info!(conn_id, %peer, %reason, "Connection closed");
        self.events.publish(ServerEvent::Disconnected { conn_id, reason });
    }

    fn publish_count(&self) {
        self.shared
            .connection_count
            .store(self.connections.len(), Ordering::Release);
    }

    fn shutdown(mut self) {
        debug!(connections = self.connections.len(), "Server shutting down");
        for mut conn in std::mem::take(&mut self.connections) {
            conn.invalidate("server stopped");
            self.close(conn);
        }
        self.publish_count();

        let ServerWorker {
            listener, dispatch, ..
        } = self;
        drop(listener);
        dispatch.shutdown();
        info!("Server stopped");
    }
}

/// Heartbeat check then write cycle. Both invalidate the connection on failure.
fn check_and_flush<M: Message>(conn: &mut Connection<M>) {
    if let Err(err) = conn.perform_heartbeat_check() {
        debug!(conn_id = conn.id(), error = %err, "Heartbeat check failed");
        return;
    }
    if let Err(err) = conn.perform_write_cycle() {
        debug!(conn_id = conn.id(), error = %err, "Write cycle failed");
    }
}

/// Read one unit and hand at most one decoded message to the dispatch pool.
fn read_and_dispatch<M: Message>(
    conn: &mut Connection<M>,
    handlers: &HandlerRegistry<M>,
    filter: Option<&MessageFilter<M>>,
    dispatch: &DispatchPool<M>,
) -> Result<(), ConnectionError> {
    conn.perform_read_cycle()?;

    let Some(message) = conn.dequeue_received_message() else {
        return Ok(());
    };
    let kind = message.kind();
    let Some(handler) = handlers.get(kind) else {
        return Err(ConnectionError::UnknownMessage(format!("{kind:?}")));
    };
    let info = ConnectionInfo {
        conn_id: conn.id(),
        peer: conn.peer(),
    };
    if let Some(filter) = filter
        && !filter(&info, kind)
    {
        return Err(ConnectionError::Rejected(format!("{kind:?}")));
    }

    dispatch.dispatch(Job {
        conn_id: info.conn_id,
        peer: info.peer,
        message,
        handler,
        replies: conn.outbound_queue().clone(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::register_handlers;
    use crate::test_support::{Text, TextKind, data_frame, scripted_connection};

    fn reverse_registry() -> HandlerRegistry<Text> {
        register_handlers! {
            TextKind::Plain => |msg: Text, replies: &MessageQueue<Text>| {
                replies.enqueue(Text(msg.0.chars().rev().collect()));
                Ok(())
            },
        }
    }

    #[test]
    fn dispatched_handler_replies_on_the_connection_queue() {
        let (script, mut conn) = scripted_connection(ConnectionConfig::default());
        let pool = DispatchPool::new("test", 2).unwrap();
        script.push_bytes(&data_frame("abc"));

        read_and_dispatch(&mut conn, &reverse_registry(), None, &pool).unwrap();
        pool.shutdown();

        conn.perform_write_cycle().unwrap();
        assert_eq!(script.take_written(), data_frame("cba"));
    }

    #[test]
    fn missing_handler_and_filter_refusal_are_distinct() {
        let pool = DispatchPool::new("test", 1).unwrap();

        let (script, mut conn) = scripted_connection(ConnectionConfig::default());
        script.push_bytes(&data_frame("!cmd"));
        let err = read_and_dispatch(&mut conn, &reverse_registry(), None, &pool).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownMessageType);

        let deny_all: MessageFilter<Text> = Arc::new(|_: &ConnectionInfo, _: TextKind| false);
        let (script, mut conn) = scripted_connection(ConnectionConfig::default());
        script.push_bytes(&data_frame("abc"));
        let err =
            read_and_dispatch(&mut conn, &reverse_registry(), Some(&deny_all), &pool).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MessageRejected);
    }

    #[test]
    fn failed_flush_leaves_connection_invalidated() {
        let (script, mut conn) = scripted_connection(ConnectionConfig::default());
        script.fail_writes(io::ErrorKind::BrokenPipe);
        conn.outbound_queue().enqueue(Text::from("lost"));

        check_and_flush(&mut conn);
        assert_eq!(
            conn.invalidation().unwrap().kind,
            ErrorKind::TransportFailure
        );

        // Later ticks are no-ops on an invalidated connection.
        check_and_flush(&mut conn);
        assert!(script.take_written().is_empty());
    }

    #[test]
    fn overdue_heartbeat_skips_the_flush() {
        let config = ConnectionConfig {
            heartbeat_inactivity_interval: Duration::ZERO,
            heartbeat_response_timeout: Duration::from_millis(1),
            ..ConnectionConfig::default()
        };
        let (script, mut conn) = scripted_connection(config);

        std::thread::sleep(Duration::from_millis(2));
        check_and_flush(&mut conn);
        assert!(conn.is_awaiting_heartbeat());
        assert!(!script.take_written().is_empty());

        conn.outbound_queue().enqueue(Text::from("late"));
        std::thread::sleep(Duration::from_millis(5));
        check_and_flush(&mut conn);
        assert_eq!(
            conn.invalidation().unwrap().kind,
            ErrorKind::HeartbeatTimeout
        );
        assert!(script.take_written().is_empty());
    }

    #[test]
    fn filter_sees_connection_identity() {
        let pool = DispatchPool::new("test", 1).unwrap();
        let (script, mut conn) = scripted_connection(ConnectionConfig::default());
        let expected = conn.id();
        let only_this: MessageFilter<Text> = Arc::new(move |info: &ConnectionInfo, kind: TextKind| {
            info.conn_id == expected && kind == TextKind::Plain
        });
        script.push_bytes(&data_frame("ok"));
        read_and_dispatch(&mut conn, &reverse_registry(), Some(&only_this), &pool).unwrap();
        assert!(!conn.is_invalidated());
    }
}
