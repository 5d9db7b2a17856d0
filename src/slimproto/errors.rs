use std::io;

#[derive(Debug, thiserror::Error)]
pub enum SlimProtoErrorValue {
    #[error("handshake message is not HELO")]
    BadHandshake,
    #[error("frame payload length {length} exceeds limit {max}")]
    FrameTooLarge { length: usize, max: usize },
    #[error("HELO payload truncated ({0} bytes)")]
    ShortHelo(usize),
    #[error("command sent before handshake completed")]
    NotReady,
    #[error("session is closed")]
    SessionClosed,
    #[error("connection write failed: {0}")]
    ConnectionWrite(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct SlimProtoError {
    pub value: SlimProtoErrorValue,
}

impl From<SlimProtoErrorValue> for SlimProtoError {
    fn from(val: SlimProtoErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<io::Error> for SlimProtoError {
    fn from(error: io::Error) -> Self {
        Self {
            value: SlimProtoErrorValue::ConnectionWrite(error),
        }
    }
}
