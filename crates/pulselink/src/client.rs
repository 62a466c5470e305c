//! Long-lived client that keeps one connection to a server alive.
//!
//! The client runs on a dedicated thread. Each tick it services the current connection,
//! and when there is none it connects, backing off for a fixed window after a failure.
//! Messages received from the server are handled inline on the client thread.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use pulselink_proto::{Message, MessageCodec};
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::dispatch::panic_message;
use crate::error::{ClientError, ConnectionError};
use crate::events::{ClientEvent, EventBus};
use crate::handler::HandlerRegistry;
use crate::queue::MessageQueue;
use crate::tls::{ClientTls, ClientTlsConfig};
use crate::transport::{TcpTransport, Transport};

pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Granularity at which the backoff wait notices `stop()`.
const BACKOFF_POLL: Duration = Duration::from_millis(50);

pub struct ClientBuilder<M: Message> {
    addr: SocketAddr,
    codec: Arc<dyn MessageCodec<M>>,
    config: ConnectionConfig,
    tls: Option<ClientTlsConfig>,
    handlers: HandlerRegistry<M>,
    reconnect_backoff: Duration,
    tick_interval: Duration,
    connect_timeout: Duration,
    events: Arc<EventBus<ClientEvent>>,
}

impl<M: Message> ClientBuilder<M> {
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tls(mut self, tls: ClientTlsConfig) -> Self {
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

    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Subscribe before starting so no event is missed.
    pub fn subscribe(&self) -> Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Spawn the client thread. The first connection attempt happens on that thread.
    pub fn start(self) -> Result<Client<M>, ClientError> {
        let tls = self.tls.as_ref().map(ClientTlsConfig::build).transpose()?;
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            outbound: Mutex::new(None),
        });

        let worker = ClientWorker {
            addr: self.addr,
            codec: self.codec,
            config: self.config,
            tls,
            handlers: self.handlers,
            reconnect_backoff: self.reconnect_backoff,
            tick_interval: self.tick_interval,
            connect_timeout: self.connect_timeout,
            shared: Arc::clone(&shared),
            events: Arc::clone(&self.events),
            connection: None,
        };
        let join = thread::Builder::new()
            .name("pulselink-client".to_string())
            .spawn(move || worker.run())
            .map_err(ClientError::Spawn)?;

        Ok(Client {
            shared,
            events: self.events,
            join: Some(join),
        })
    }
}

struct Shared<M> {
    running: AtomicBool,
    /// Outbound queue of the current connection, if any.
    outbound: Mutex<Option<MessageQueue<M>>>,
}

/// Handle to a running client. Dropping it stops the client.
pub struct Client<M: Message> {
    shared: Arc<Shared<M>>,
    events: Arc<EventBus<ClientEvent>>,
    join: Option<JoinHandle<()>>,
}

impl<M: Message> Client<M> {
    pub fn builder<C>(addr: SocketAddr, codec: C) -> ClientBuilder<M>
    where
        C: MessageCodec<M>,
    {
        ClientBuilder {
            addr,
            codec: Arc::new(codec),
            config: ConnectionConfig::default(),
            tls: None,
            handlers: HandlerRegistry::new(),
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            tick_interval: DEFAULT_TICK_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            events: Arc::new(EventBus::new()),
        }
    }

    /// True while a connection exists and has not been invalidated.
    pub fn is_connected(&self) -> bool {
        self.shared
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|queue| !queue.is_invalidated())
    }

    /// Queue `message` on the current connection.
    pub fn send(&self, message: M) -> Result<(), ClientError> {
        match self.shared.outbound.lock().as_ref() {
            Some(queue) if !queue.is_invalidated() => {
                queue.enqueue(message);
                Ok(())
            }
            _ => Err(ClientError::NotConnected),
        }
    }

    /// Outbound queue of the current connection.
    ///
    /// The queue belongs to one connection; after a reconnect a new queue is in use.
    pub fn outbound_queue(&self) -> Option<MessageQueue<M>> {
        self.shared.outbound.lock().clone()
    }

    pub fn subscribe(&self) -> Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Stop the client thread and wait for it to close its connection.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl<M: Message> Drop for Client<M> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ClientWorker<M: Message> {
    addr: SocketAddr,
    codec: Arc<dyn MessageCodec<M>>,
    config: ConnectionConfig,
    tls: Option<ClientTls>,
    handlers: HandlerRegistry<M>,
    reconnect_backoff: Duration,
    tick_interval: Duration,
    connect_timeout: Duration,
    shared: Arc<Shared<M>>,
    events: Arc<EventBus<ClientEvent>>,
    connection: Option<Connection<M>>,
}

impl<M: Message> ClientWorker<M> {
    fn run(mut self) {
        info!(addr = %self.addr, "Client started");
        while self.shared.running.load(Ordering::Acquire) {
            self.tick();
            thread::sleep(self.tick_interval);
        }

        if let Some(mut conn) = self.connection.take() {
            conn.invalidate("client stopped");
            self.close(conn);
        }
        info!(addr = %self.addr, "Client stopped");
    }

    fn tick(&mut self) {
        if self.connection.as_ref().is_some_and(Connection::is_invalidated) {
            if let Some(conn) = self.connection.take() {
                self.close(conn);
            }
        }

        let Some(conn) = self.connection.as_mut() else {
            match self.connect() {
                Ok(conn) => self.adopt(conn),
                Err(e) => {
                    error!(addr = %self.addr, error = %e, "Connect failed");
                    self.back_off();
                }
            }
            return;
        };

        if let Err(err) = service(conn, &self.handlers) {
            debug!(conn_id = conn.id(), error = %err, "Connection failed this tick");
            conn.invalidate_with(&err);
        }
    }

    fn connect(&self) -> io::Result<Connection<M>> {
        debug!(addr = %self.addr, "Connecting");
        let sock = TcpStream::connect_timeout(&self.addr, self.connect_timeout)?;
        let transport: Box<dyn Transport> = match &self.tls {
            Some(tls) => Box::new(tls.handshake(sock, self.connect_timeout).map_err(|e| {
                warn!(addr = %self.addr, error = %e, "TLS handshake failed");
                e
            })?),
            None => Box::new(TcpTransport::new(sock)?),
        };
        Ok(Connection::new(
            transport,
            self.addr,
            Arc::clone(&self.codec),
            self.config,
        ))
    }

    fn adopt(&mut self, mut conn: Connection<M>) {
        let events = Arc::clone(&self.events);
        conn.on_invalidated(move |inv| {
            events.publish(ClientEvent::Invalidated {
                reason: inv.reason.clone(),
            });
        });
        *self.shared.outbound.lock() = Some(conn.outbound_queue().clone());

        let peer = conn.peer();
        info!(conn_id = conn.id(), %peer, "Connected to server");
        self.connection = Some(conn);
        self.events.publish(ClientEvent::Connected { peer });
    }

    fn close(&mut self, conn: Connection<M>) {
        {
            let mut outbound = self.shared.outbound.lock();
            if outbound
                .as_ref()
                .is_some_and(|queue| queue.same_queue(conn.outbound_queue()))
            {
                *outbound = None;
            }
        }

        let conn_id = conn.id();
        let reason = conn
            .invalidation()
            .map(|inv| inv.reason.clone())
            .unwrap_or_default();
        if let Err(e) = conn.dispose() {
            warn!(conn_id, error = %e, "Error while disposing connection");
        }
        info!(conn_id, %reason, "Disconnected from server");
        self.events.publish(ClientEvent::Disconnected { reason });
    }

    /// Wait out the reconnect window, returning early if the client is stopped.
    fn back_off(&self) {
        let deadline = Instant::now() + self.reconnect_backoff;
        while self.shared.running.load(Ordering::Acquire) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(BACKOFF_POLL));
        }
    }
}

/// One tick of work on a live connection: read, handle one message, heartbeat, write.
fn service<M: Message>(
    conn: &mut Connection<M>,
    handlers: &HandlerRegistry<M>,
) -> Result<(), ConnectionError> {
    conn.perform_read_cycle()?;

    if let Some(message) = conn.dequeue_received_message() {
        let kind = message.kind();
        let Some(handler) = handlers.get(kind) else {
            return Err(ConnectionError::UnknownMessage(format!("{kind:?}")));
        };
        let replies = conn.outbound_queue();
        match panic::catch_unwind(AssertUnwindSafe(|| handler(message, replies))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ConnectionError::Handler {
                    kind: format!("{kind:?}"),
                    reason: format!("{e:#}"),
                });
            }
            Err(payload) => {
                return Err(ConnectionError::Handler {
                    kind: format!("{kind:?}"),
                    reason: format!("panicked: {}", panic_message(payload.as_ref())),
                });
            }
        }
    }

    conn.perform_heartbeat_check()?;
    conn.perform_write_cycle()
}
