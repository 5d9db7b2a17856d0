pub mod errors;
pub mod pcm;

use errors::EncoderError;
use std::io;

/// Receives encoded bytes synchronously from within `encode`. The slice
/// must not be retained beyond the call. An `Err` is fatal to the owning
/// session.
pub type EncodedSink = Box<dyn FnMut(&[u8]) -> Result<(), io::Error> + Send>;

/// Immutable parameters of one encoder instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderParams {
    pub channels: u32,
    /// Storage width of one sample in bits.
    pub bits_per_sample: u32,
    /// Significant width of one sample in bits.
    pub bits_per_value: u32,
    pub sampling_rate: u32,
}

impl EncoderParams {
    /// Bytes occupied by one multi-channel sample frame.
    #[must_use]
    pub fn frame_bytes(&self) -> usize {
        (self.channels * self.bits_per_sample / 8) as usize
    }
}

/// Stateful transform from raw PCM bytes into a wire-format byte stream.
///
/// Variants are lossless (PCM passthrough) or lossy; runtime dispatch at
/// this seam keeps the streaming sessions codec-agnostic. An encoder that
/// returns an error is done: no further `encode` calls are made and the
/// owning session closes.
pub trait Encoder: Send {
    /// Consume a PCM byte run, emitting encoded bytes into the sink zero
    /// or more times.
    fn encode(&mut self, data: &[u8]) -> Result<(), EncoderError>;

    /// Monotonic count of input sample frames consumed so far.
    fn samples_encoded(&self) -> u64;

    fn params(&self) -> EncoderParams;

    /// File extension advertised in stream URLs.
    fn extension(&self) -> &str;

    /// MIME type for the HTTP response.
    fn mime(&self) -> &str;
}
