//! Shared fixtures for unit tests.

use std::net::SocketAddr;
use std::sync::Arc;

use pulselink_proto::{Message, MessageCodec, ProtoError};

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::transport::scripted::ScriptHandle;

/// A message whose wire form is its UTF-8 text, so frames are easy to build by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text(pub String);

impl From<&str> for Text {
    fn from(value: &str) -> Self {
        Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKind {
    Plain,
    /// Text starting with `!`.
    Command,
}

impl Message for Text {
    type Kind = TextKind;

    fn kind(&self) -> TextKind {
        if self.0.starts_with('!') {
            TextKind::Command
        } else {
            TextKind::Plain
        }
    }
}

pub struct TextCodec;

impl MessageCodec<Text> for TextCodec {
    fn encode(&self, message: &Text) -> Result<Vec<u8>, ProtoError> {
        Ok(message.0.as_bytes().to_vec())
    }

    fn decode(&self, payload: &[u8]) -> Result<Text, ProtoError> {
        String::from_utf8(payload.to_vec())
            .map(Text)
            .map_err(|e| ProtoError::Codec(e.to_string()))
    }
}

/// `[len][utf8]` frame for `text`.
pub fn data_frame(text: &str) -> Vec<u8> {
    let mut frame = (text.len() as i32).to_le_bytes().to_vec();
    frame.extend_from_slice(text.as_bytes());
    frame
}

pub fn test_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4000))
}

pub fn scripted_connection(config: ConnectionConfig) -> (ScriptHandle, Connection<Text>) {
    let (script, transport) = ScriptHandle::new();
    let conn = Connection::new(Box::new(transport), test_peer(), Arc::new(TextCodec), config);
    (script, conn)
}
