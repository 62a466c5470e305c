//! Wire format for pulselink connections.
//!
//! A connection carries a stream of frames, each a 4-byte signed little-endian length prefix
//! followed by that many payload bytes. Positive lengths are application data; two reserved
//! negative lengths carry the in-band heartbeat channel.

pub mod codec;
pub mod constants;
pub mod error;
pub mod frame;
pub mod limits;
pub mod messages;

pub use codec::{MessageCodec, PostcardCodec};
pub use error::ProtoError;
pub use frame::FrameKind;
pub use messages::Message;
