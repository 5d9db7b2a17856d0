use super::errors::{SlimProtoError, SlimProtoErrorValue};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

/// Upper bound on one client frame payload, to prevent unbounded memory
/// growth from malformed or malicious length headers.
pub const MAX_FRAME_PAYLOAD: usize = 64 * 1024;

/// Client frame header: 4-char opcode + u32 BE payload length.
const CLIENT_HEADER_LEN: usize = 8;

pub const OPCODE_HELO: [u8; 4] = *b"HELO";
pub const OPCODE_PONG: [u8; 4] = *b"PONG";
pub const OPCODE_STRM: [u8; 4] = *b"strm";
pub const OPCODE_PING: [u8; 4] = *b"ping";

/// Client handshake payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Helo {
    pub device_id: u8,
    pub revision: u8,
    pub mac: [u8; 6],
    pub capabilities: String,
}

/// One framed message received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Helo(Helo),
    Pong { timestamp_ms: u32 },
    Other { opcode: [u8; 4], payload: Bytes },
}

/// Accumulates raw byte runs off the wire and yields complete SlimProto
/// client messages. Partial frames stay buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: BytesMut,
}

impl FrameReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete message, or `None` when more bytes are
    /// needed. A length header beyond the payload limit is a protocol
    /// error; the caller must tear the connection down.
    pub fn next_message(&mut self) -> Result<Option<ClientMessage>, SlimProtoError> {
        if self.buffer.len() < CLIENT_HEADER_LEN {
            return Ok(None);
        }

        let length = BigEndian::read_u32(&self.buffer[4..8]) as usize;
        if length > MAX_FRAME_PAYLOAD {
            return Err(SlimProtoErrorValue::FrameTooLarge {
                length,
                max: MAX_FRAME_PAYLOAD,
            }
            .into());
        }

        if self.buffer.len() < CLIENT_HEADER_LEN + length {
            return Ok(None);
        }

        let header = self.buffer.split_to(CLIENT_HEADER_LEN);
        let payload = self.buffer.split_to(length).freeze();

        let mut opcode = [0u8; 4];
        opcode.copy_from_slice(&header[..4]);

        match opcode {
            OPCODE_HELO => Ok(Some(ClientMessage::Helo(parse_helo(&payload)?))),
            OPCODE_PONG => {
                if payload.len() < 4 {
                    // tolerated: a pong without a timestamp is just ignored
                    Ok(Some(ClientMessage::Other { opcode, payload }))
                } else {
                    Ok(Some(ClientMessage::Pong {
                        timestamp_ms: BigEndian::read_u32(&payload[..4]),
                    }))
                }
            }
            _ => Ok(Some(ClientMessage::Other { opcode, payload })),
        }
    }
}

fn parse_helo(payload: &[u8]) -> Result<Helo, SlimProtoError> {
    if payload.len() < 8 {
        return Err(SlimProtoErrorValue::ShortHelo(payload.len()).into());
    }

    let mut mac = [0u8; 6];
    mac.copy_from_slice(&payload[2..8]);

    let capabilities = String::from_utf8_lossy(&payload[8..])
        .trim_matches(char::from(0))
        .to_string();

    Ok(Helo {
        device_id: payload[0],
        revision: payload[1],
        mac,
        capabilities,
    })
}

/// Selection byte of the `strm` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSelection {
    Start,
    Stop,
    Pause,
    Unpause,
}

impl StreamSelection {
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Start => b's',
            Self::Stop => b'q',
            Self::Pause => b'p',
            Self::Unpause => b'u',
        }
    }
}

/// Server frame: u16 BE length + 4-char opcode + payload.
fn build_frame(opcode: &[u8; 4], payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(2 + 4 + payload.len());
    frame.put_u16((4 + payload.len()) as u16);
    frame.put_slice(opcode);
    frame.put_slice(payload);
    frame.freeze()
}

/// Build a `strm` command. For `Start` the tail carries the literal HTTP
/// request the client replays on the data port; the other selections
/// carry no request.
#[must_use]
pub fn build_strm(selection: StreamSelection, sampling_rate: u32, http_request: &str) -> Bytes {
    let mut payload = BytesMut::with_capacity(6 + http_request.len());
    payload.put_u8(selection.as_byte());
    // format byte: uncompressed PCM
    payload.put_u8(b'p');
    payload.put_u32(sampling_rate);
    payload.put_slice(http_request.as_bytes());
    build_frame(&OPCODE_STRM, &payload)
}

/// Build a `ping` frame carrying a millisecond timestamp the client
/// echoes back in PONG.
#[must_use]
pub fn build_ping(timestamp_ms: u32) -> Bytes {
    let mut payload = BytesMut::with_capacity(4);
    payload.put_u32(timestamp_ms);
    build_frame(&OPCODE_PING, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helo_frame(capabilities: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8, 2u8, 0x00, 0x11, 0xaa, 0xbb, 0xcc, 0xdd];
        payload.extend_from_slice(capabilities);

        let mut frame = Vec::new();
        frame.extend_from_slice(b"HELO");
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    #[test]
    fn test_helo_parses_across_partial_delivery() {
        let frame = helo_frame(b"Model=squeezelite,pcm");
        let mut reader = FrameReader::new();

        // first half: no message yet
        reader.extend(&frame[..5]);
        assert_eq!(reader.next_message().unwrap(), None);

        reader.extend(&frame[5..]);
        match reader.next_message().unwrap() {
            Some(ClientMessage::Helo(helo)) => {
                assert_eq!(helo.device_id, 0);
                assert_eq!(helo.revision, 2);
                assert_eq!(helo.mac, [0x00, 0x11, 0xaa, 0xbb, 0xcc, 0xdd]);
                assert_eq!(helo.capabilities, "Model=squeezelite,pcm");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(reader.next_message().unwrap(), None);
    }

    #[test]
    fn test_two_messages_in_one_read() {
        let mut data = helo_frame(b"");
        data.extend_from_slice(b"PONG");
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(&1234u32.to_be_bytes());

        let mut reader = FrameReader::new();
        reader.extend(&data);

        assert!(matches!(
            reader.next_message().unwrap(),
            Some(ClientMessage::Helo(_))
        ));
        assert_eq!(
            reader.next_message().unwrap(),
            Some(ClientMessage::Pong { timestamp_ms: 1234 })
        );
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(b"HELO");
        data.extend_from_slice(&(MAX_FRAME_PAYLOAD as u32 + 1).to_be_bytes());

        let mut reader = FrameReader::new();
        reader.extend(&data);

        let err = reader.next_message().unwrap_err();
        assert!(matches!(
            err.value,
            SlimProtoErrorValue::FrameTooLarge { .. }
        ));
    }

    #[test]
    fn test_short_helo_is_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(b"HELO");
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(&[0, 2, 3, 4]);

        let mut reader = FrameReader::new();
        reader.extend(&data);

        let err = reader.next_message().unwrap_err();
        assert!(matches!(err.value, SlimProtoErrorValue::ShortHelo(4)));
    }

    #[test]
    fn test_strm_start_layout() {
        let request = "GET /stream.pcm?player=0011aabbccdd HTTP/1.0\r\n";
        let frame = build_strm(StreamSelection::Start, 44100, request);

        // u16 BE length covers opcode + payload
        let length = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(length, frame.len() - 2);
        assert_eq!(&frame[2..6], b"strm");
        assert_eq!(frame[6], b's');
        assert_eq!(frame[7], b'p');
        assert_eq!(BigEndian::read_u32(&frame[8..12]), 44100);
        assert_eq!(&frame[12..], request.as_bytes());
    }

    #[test]
    fn test_ping_layout() {
        let frame = build_ping(777);
        assert_eq!(&frame[2..6], b"ping");
        assert_eq!(BigEndian::read_u32(&frame[6..10]), 777);
    }
}
