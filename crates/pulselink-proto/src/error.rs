use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("frame length {0} is outside the valid range")]
    MalformedLength(i32),
    #[error("payload too large: {0}")]
    PayloadTooLarge(usize),
    #[error("refusing to frame an empty payload")]
    EmptyPayload,
    #[error("buffer too short")]
    TooShort,
    #[error("codec error: {0}")]
    Codec(String),
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}
