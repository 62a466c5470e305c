#![allow(dead_code)]

use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use pulselink::{Message, MessageQueue, PostcardCodec, Server, ServerBuilder, ServerTlsConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde::{Deserialize, Serialize};
use strum::EnumDiscriminants;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(derive(Hash), name(TestKind))]
pub enum TestMessage {
    TestRequest(String),
    TestResponse(String),
}

impl Message for TestMessage {
    type Kind = TestKind;

    fn kind(&self) -> TestKind {
        self.into()
    }
}

pub fn codec() -> PostcardCodec<TestMessage> {
    PostcardCodec::new()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// A server that answers every request with the reversed string.
pub fn reverse_server() -> ServerBuilder<TestMessage> {
    reverse_server_at(loopback())
}

pub fn reverse_server_at(addr: SocketAddr) -> ServerBuilder<TestMessage> {
    Server::builder(addr, codec()).handler(
        TestKind::TestRequest,
        |msg: TestMessage, replies: &MessageQueue<TestMessage>| -> anyhow::Result<()> {
            let text = match msg {
                TestMessage::TestRequest(text) => text,
                other => anyhow::bail!("unexpected message {other:?}"),
            };
            replies.enqueue(TestMessage::TestResponse(text.chars().rev().collect()));
            Ok(())
        },
    )
}

/// Self-signed identity for `names`, returned with the certificate to trust on the client.
pub fn self_signed(names: &[&str]) -> anyhow::Result<(CertificateDer<'static>, ServerTlsConfig)> {
    let subject_alt_names = names.iter().map(|name| name.to_string()).collect::<Vec<_>>();
    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(subject_alt_names)?;
    let der = cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(signing_key.serialize_der()));
    Ok((der.clone(), ServerTlsConfig::new(vec![der], key)))
}

/// Wait for the first event matching `pred`, skipping others.
pub fn expect_event<E: Debug>(
    rx: &Receiver<E>,
    mut pred: impl FnMut(&E) -> bool,
) -> anyhow::Result<E> {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = rx
            .recv_timeout(remaining)
            .map_err(|e| anyhow::anyhow!("no matching event: {e}"))?;
        if pred(&event) {
            return Ok(event);
        }
    }
}

/// Collect every event published within `window`.
pub fn drain_events<E>(rx: &Receiver<E>, window: Duration) -> Vec<E> {
    let deadline = Instant::now() + window;
    let mut events = Vec::new();
    while let Ok(event) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        events.push(event);
    }
    events
}

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
