//! Demo request/response protocol and the helpers shared by `demo-server` and
//! `demo-client`.

pub mod certs;
pub mod cli;
pub mod protocol;

pub use protocol::{TestKind, TestMessage};

/// Port both demo binaries default to.
pub const DEFAULT_PORT: u16 = 7357;

/// Name the demo server's certificate is issued for.
pub const DEFAULT_SERVER_NAME: &str = "localhost";
