use crate::encoder::errors::EncoderError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum StreamingErrorValue {
    #[error("request is not an HTTP GET")]
    NotGet,
    #[error("request headers exceed limit ({0} bytes)")]
    RequestTooLarge(usize),
    #[error("encoder failed: {0}")]
    Encoder(#[source] EncoderError),
    #[error("session is closed")]
    SessionClosed,
    #[error("connection write failed: {0}")]
    ConnectionWrite(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct StreamingError {
    pub value: StreamingErrorValue,
}

impl From<StreamingErrorValue> for StreamingError {
    fn from(val: StreamingErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<EncoderError> for StreamingError {
    fn from(error: EncoderError) -> Self {
        Self {
            value: StreamingErrorValue::Encoder(error),
        }
    }
}

impl From<io::Error> for StreamingError {
    fn from(error: io::Error) -> Self {
        Self {
            value: StreamingErrorValue::ConnectionWrite(error),
        }
    }
}
