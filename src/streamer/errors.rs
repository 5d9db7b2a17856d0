#[derive(Debug, thiserror::Error)]
pub enum StreamerErrorValue {
    #[error("streamer event channel closed")]
    ChannelClosed,
}

#[derive(Debug, thiserror::Error)]
#[error("{value}")]
pub struct StreamerError {
    pub value: StreamerErrorValue,
}

impl From<StreamerErrorValue> for StreamerError {
    fn from(val: StreamerErrorValue) -> Self {
        Self { value: val }
    }
}
