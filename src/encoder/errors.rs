use std::io;

#[derive(Debug, thiserror::Error)]
pub enum EncoderErrorValue {
    #[error("sink io error: {0}")]
    SinkIo(#[source] io::Error),
    #[error("codec failure: {0}")]
    Codec(String),
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct EncoderError {
    pub value: EncoderErrorValue,
}

impl From<EncoderErrorValue> for EncoderError {
    fn from(val: EncoderErrorValue) -> Self {
        Self { value: val }
    }
}

impl From<io::Error> for EncoderError {
    fn from(error: io::Error) -> Self {
        Self {
            value: EncoderErrorValue::SinkIo(error),
        }
    }
}
