use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::Parser;
use pulselink::{Client, ClientEvent, ClientTlsConfig, MessageQueue, PostcardCodec};
use pulselink_demo::cli::{ConnectionArgs, init_tracing};
use pulselink_demo::{DEFAULT_PORT, DEFAULT_SERVER_NAME, TestKind, TestMessage};
use tracing::{Level, info, warn};

/// Demo client sending a numbered request every interval
#[derive(Parser, Debug)]
#[command(name = "demo-client")]
#[command(about = "pulselink demo client", long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    server: SocketAddr,

    /// Connect over TLS.
    #[arg(long)]
    tls: bool,

    /// Name the server certificate must be valid for
    #[arg(long, default_value = DEFAULT_SERVER_NAME)]
    server_name: String,

    /// Accept certificates from an untrusted issuer (self-signed demo server).
    #[arg(long)]
    allow_chain_errors: bool,

    /// Milliseconds between requests
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Seconds to wait after a failed connect before trying again
    #[arg(long, default_value = "5")]
    reconnect_secs: u64,

    /// Stop after sending this many requests (runs until killed when omitted)
    #[arg(long)]
    count: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    #[command(flatten)]
    connection: ConnectionArgs,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level)?;

    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);
    let mut builder = Client::builder(args.server, PostcardCodec::<TestMessage>::new())
        .config((&args.connection).into())
        .reconnect_backoff(Duration::from_secs(args.reconnect_secs))
        .handler(
            TestKind::TestResponse,
            move |msg: TestMessage, _: &MessageQueue<TestMessage>| -> anyhow::Result<()> {
                if let TestMessage::TestResponse(text) = msg {
                    let total = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(total, "In:  {text}");
                }
                Ok(())
            },
        );
    if args.tls {
        builder = builder.tls(
            ClientTlsConfig::new(args.server_name.clone())
                .allow_chain_errors(args.allow_chain_errors),
        );
    }

    let events = builder.subscribe();
    let client = builder.start()?;
    info!("Demo client started for {}", args.server);

    let interval = Duration::from_millis(args.interval_ms);
    let mut sent = 0u64;
    while args.count.is_none_or(|count| sent < count) {
        // Waiting on events doubles as the request timer.
        match events.recv_timeout(interval) {
            Ok(ClientEvent::Connected { peer }) => info!(%peer, "Connected"),
            Ok(ClientEvent::Invalidated { reason }) => warn!(%reason, "Connection invalidated"),
            Ok(ClientEvent::Disconnected { reason }) => info!(%reason, "Disconnected"),
            Err(_) => {}
        }

        if !client.is_connected() {
            continue;
        }
        let text = format!("Req {}", sent + 1);
        match client.send(TestMessage::TestRequest(text.clone())) {
            Ok(()) => {
                sent += 1;
                info!(total = sent, "Out: {text}");
            }
            Err(e) => warn!("Could not send {text}: {e}"),
        }
    }

    // Give the last replies a moment to arrive.
    std::thread::sleep(interval);
    info!(
        sent,
        received = received.load(Ordering::Relaxed),
        "Demo client finished"
    );
    drop(client);
    Ok(())
}
