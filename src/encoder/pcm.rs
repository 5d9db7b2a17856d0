use super::errors::EncoderError;
use super::{EncodedSink, Encoder, EncoderParams};

pub const PCM_EXTENSION: &str = "pcm";
pub const PCM_MIME: &str = "audio/x-pcm";

/// Lossless passthrough encoder: PCM bytes go to the sink unchanged.
pub struct PcmEncoder {
    params: EncoderParams,
    sink: EncodedSink,
    bytes_encoded: u64,
}

impl PcmEncoder {
    #[must_use]
    pub fn new(params: EncoderParams, sink: EncodedSink) -> Self {
        Self {
            params,
            sink,
            bytes_encoded: 0,
        }
    }
}

impl Encoder for PcmEncoder {
    fn encode(&mut self, data: &[u8]) -> Result<(), EncoderError> {
        if data.is_empty() {
            return Ok(());
        }

        (self.sink)(data)?;
        self.bytes_encoded += data.len() as u64;
        Ok(())
    }

    fn samples_encoded(&self) -> u64 {
        self.bytes_encoded / self.params.frame_bytes() as u64
    }

    fn params(&self) -> EncoderParams {
        self.params
    }

    fn extension(&self) -> &str {
        PCM_EXTENSION
    }

    fn mime(&self) -> &str {
        PCM_MIME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    fn params() -> EncoderParams {
        EncoderParams {
            channels: 2,
            bits_per_sample: 32,
            bits_per_value: 24,
            sampling_rate: 44100,
        }
    }

    #[test]
    fn test_passthrough_emits_input_unchanged() {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let sink_target = emitted.clone();
        let sink: EncodedSink = Box::new(move |data| {
            sink_target.lock().unwrap().extend_from_slice(data);
            Ok(())
        });

        let mut encoder = PcmEncoder::new(params(), sink);
        encoder.encode(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        encoder.encode(&[9, 10]).unwrap();

        assert_eq!(
            *emitted.lock().unwrap(),
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]
        );
    }

    #[test]
    fn test_samples_encoded_counts_whole_frames() {
        let sink: EncodedSink = Box::new(|_| Ok(()));
        let mut encoder = PcmEncoder::new(params(), sink);

        // 2 channels x 32 bits = 8 bytes per frame
        encoder.encode(&[0; 8]).unwrap();
        assert_eq!(encoder.samples_encoded(), 1);

        // partial frame does not bump the counter until completed
        encoder.encode(&[0; 4]).unwrap();
        assert_eq!(encoder.samples_encoded(), 1);
        encoder.encode(&[0; 4]).unwrap();
        assert_eq!(encoder.samples_encoded(), 2);
    }

    #[test]
    fn test_sink_error_is_fatal() {
        let sink: EncodedSink =
            Box::new(|_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));
        let mut encoder = PcmEncoder::new(params(), sink);

        assert!(encoder.encode(&[0; 8]).is_err());
        assert_eq!(encoder.samples_encoded(), 0);
    }
}
