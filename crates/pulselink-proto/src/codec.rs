use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};

use crate::error::ProtoError;

/// Converts application messages to and from frame payloads.
///
/// Implementations must be stateless: the same codec instance is shared by every
/// connection of a client or server and may be called from several threads.
pub trait MessageCodec<M>: Send + Sync + 'static {
    /// Serialize `message` into the bytes of one data frame.
    fn encode(&self, message: &M) -> Result<Vec<u8>, ProtoError>;

    /// Deserialize the payload of one data frame.
    fn decode(&self, payload: &[u8]) -> Result<M, ProtoError>;
}

/// Postcard encoding for any serde message type.
pub struct PostcardCodec<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M> PostcardCodec<M> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M> Default for PostcardCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> MessageCodec<M> for PostcardCodec<M>
where
    M: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, message: &M) -> Result<Vec<u8>, ProtoError> {
        Ok(postcard::to_stdvec(message)?)
    }

    fn decode(&self, payload: &[u8]) -> Result<M, ProtoError> {
        Ok(postcard::from_bytes(payload)?)
    }
}
