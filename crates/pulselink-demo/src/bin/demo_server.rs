use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use pulselink::{MessageQueue, PostcardCodec, Server, ServerEvent, ServerTlsConfig};
use pulselink_demo::cli::{ConnectionArgs, init_tracing};
use pulselink_demo::protocol::reverse;
use pulselink_demo::{DEFAULT_PORT, DEFAULT_SERVER_NAME, TestKind, TestMessage, certs};
use tracing::{Level, info, warn};

/// Demo server answering every request with its reversed text
#[derive(Parser, Debug)]
#[command(name = "demo-server")]
#[command(about = "pulselink demo server", long_about = None)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    bind: SocketAddr,

    /// Serve TLS instead of plain TCP.
    #[arg(long)]
    tls: bool,

    /// TLS certificate chain (PEM)
    #[arg(long, requires = "tls")]
    cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, requires = "tls")]
    key: Option<PathBuf>,

    /// Directory used to store an auto-generated certificate when `--cert/--key` are omitted
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// Threads running message handlers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Stop after this many seconds (runs until killed when omitted)
    #[arg(long)]
    run_for_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    #[command(flatten)]
    connection: ConnectionArgs,
}

fn tls_config(args: &Args) -> anyhow::Result<ServerTlsConfig> {
    let (cert, key) = match (&args.cert, &args.key) {
        (Some(cert), Some(key)) => (cert.clone(), key.clone()),
        (None, None) => {
            let dir = args
                .cert_dir
                .clone()
                .unwrap_or_else(|| certs::default_cert_dir("pulselink-demo"));
            let names = vec![DEFAULT_SERVER_NAME.to_string(), "127.0.0.1".to_string()];
            let (cert, key) = certs::ensure_cert_pair(&dir, &names)?;
            info!(
                "TLS cert/key at {} and {}",
                cert.display(),
                key.display()
            );
            (cert, key)
        }
        _ => anyhow::bail!("Must provide both --cert and --key, or neither (auto-generate)"),
    };

    match certs::sha256_fingerprint_from_pem(&cert) {
        Ok(fp) => info!("TLS cert SHA-256 fingerprint: {}", fp),
        Err(e) => warn!("Could not fingerprint {}: {e:#}", cert.display()),
    }
    Ok(ServerTlsConfig::from_pem_files(&cert, &key)?)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level)?;

    let mut builder = Server::builder(args.bind, PostcardCodec::<TestMessage>::new())
        .config((&args.connection).into())
        .dispatch_workers(args.workers)
        .handler(
            TestKind::TestRequest,
            |msg: TestMessage, replies: &MessageQueue<TestMessage>| -> anyhow::Result<()> {
                let TestMessage::TestRequest(text) = msg else {
                    anyhow::bail!("handler registered for requests only");
                };
                replies.enqueue(TestMessage::TestResponse(reverse(&text)));
                Ok(())
            },
        );
    if args.tls {
        builder = builder.tls(tls_config(&args)?);
    }

    let events = builder.subscribe();
    let server = builder.start()?;
    info!("Demo server started on {}", server.local_addr());
    info!("Log level: {}", args.log_level);

    let deadline = args
        .run_for_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        let Ok(event) = events.recv_timeout(Duration::from_millis(500)) else {
            continue;
        };
        match event {
            ServerEvent::Connected { conn_id, peer } => {
                info!(conn_id, %peer, connections = server.connection_count(), "Client connected");
            }
            ServerEvent::Invalidated { conn_id, reason } => {
                info!(conn_id, %reason, "Client connection invalidated");
            }
            ServerEvent::Disconnected { conn_id, reason } => {
                info!(conn_id, %reason, "Client disconnected");
            }
        }
    }

    drop(server);
    Ok(())
}
