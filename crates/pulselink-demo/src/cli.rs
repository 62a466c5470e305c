use std::time::Duration;

use clap::Args;
use pulselink::ConnectionConfig;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Per-connection tuning shared by both demo binaries.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Send heartbeat requests on idle connections.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub heartbeats: bool,

    /// Answer heartbeat requests from the peer.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub heartbeat_responses: bool,

    /// Milliseconds to wait for a heartbeat response
    #[arg(long, default_value = "5000")]
    pub heartbeat_timeout_ms: u64,

    /// Milliseconds without inbound data before a heartbeat is sent
    #[arg(long, default_value = "10000")]
    pub heartbeat_interval_ms: u64,

    /// Maximum inbound frame payload in bytes
    #[arg(long, default_value = "1000000")]
    pub max_payload: usize,

    /// Maximum decoded messages waiting for a handler
    #[arg(long, default_value = "10")]
    pub max_inbound_queue: usize,

    /// Maximum messages waiting to be sent
    #[arg(long, default_value = "100")]
    pub max_outbound_queue: usize,
}

impl From<&ConnectionArgs> for ConnectionConfig {
    fn from(args: &ConnectionArgs) -> Self {
        ConnectionConfig {
            heartbeat_enabled: args.heartbeats,
            heartbeat_responses_enabled: args.heartbeat_responses,
            heartbeat_response_timeout: Duration::from_millis(args.heartbeat_timeout_ms),
            heartbeat_inactivity_interval: Duration::from_millis(args.heartbeat_interval_ms),
            max_inbound_packet_size: args.max_payload,
            max_inbound_queue_size: args.max_inbound_queue,
            max_outbound_queue_size: args.max_outbound_queue,
        }
    }
}

/// `RUST_LOG` directives win over `--log-level`; unparsable directives fall back to it.
pub fn log_filter(directives: Option<&str>, level: Level) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| {
            EnvFilter::default().add_directive(LevelFilter::from_level(level).into())
        })
}

pub fn init_tracing(level: Level) -> anyhow::Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(directives.as_deref(), level))
        .with_target(false)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
