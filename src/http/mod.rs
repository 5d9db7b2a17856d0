pub mod errors;

use crate::chunk::Chunk;
use crate::connection::Connection;
use crate::encoder::Encoder;
use crate::streamer::define::ClientId;
use bytes::{Bytes, BytesMut};
use errors::{StreamingError, StreamingErrorValue};
use tracing::{debug, info, warn};

/// Upper bound on buffered request bytes before the header terminator
/// arrives.
const MAX_REQUEST_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingSessionState {
    AwaitingRequest,
    Streaming,
    Closed,
}

/// Per-client HTTP audio-delivery actor over one data connection.
///
/// Answers exactly one GET with an endless streaming body: a response
/// header carrying the encoder's MIME type, then encoded audio until the
/// connection closes. The session is bound to the sampling rate it was
/// opened for; a rate change tears it down and the client reconnects.
pub struct StreamingSession {
    connection: Connection,
    client_id: ClientId,
    state: StreamingSessionState,
    request_buffer: BytesMut,
    encoder: Box<dyn Encoder>,
}

impl StreamingSession {
    #[must_use]
    pub fn new(connection: Connection, client_id: ClientId, encoder: Box<dyn Encoder>) -> Self {
        Self {
            connection,
            client_id,
            state: StreamingSessionState::AwaitingRequest,
            request_buffer: BytesMut::new(),
            encoder,
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamingSessionState {
        self.state
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The sampling rate this session was opened for.
    #[must_use]
    pub fn sampling_rate(&self) -> u32 {
        self.encoder.params().sampling_rate
    }

    #[must_use]
    pub fn samples_encoded(&self) -> u64 {
        self.encoder.samples_encoded()
    }

    /// Extract the ClientId from a request buffer: the `player` query
    /// parameter of the GET request line. Returns `None` when the request
    /// is malformed or the parameter is absent or empty.
    #[must_use]
    pub fn parse_client_id(buffer: &[u8]) -> Option<ClientId> {
        let text = std::str::from_utf8(buffer).ok()?;
        let request_line = text.lines().next()?;

        let mut parts = request_line.split(' ');
        if parts.next() != Some("GET") {
            return None;
        }
        let target = parts.next()?;

        let query = target.split_once('?')?.1;
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("player=") {
                if !value.is_empty() {
                    return Some(ClientId::from(value));
                }
            }
        }

        None
    }

    /// Feed request bytes as received on the wire. Once the header
    /// terminator arrives, the streaming response header goes out and the
    /// session starts accepting chunks.
    pub fn on_request(&mut self, data: &[u8]) -> Result<(), StreamingError> {
        match self.state {
            StreamingSessionState::AwaitingRequest => {
                if self.request_buffer.len() + data.len() > MAX_REQUEST_BYTES {
                    self.fail();
                    return Err(StreamingErrorValue::RequestTooLarge(
                        self.request_buffer.len() + data.len(),
                    )
                    .into());
                }

                self.request_buffer.extend_from_slice(data);
                let prefix_len = self.request_buffer.len().min(3);
                if self.request_buffer[..prefix_len] != b"GET"[..prefix_len] {
                    self.fail();
                    return Err(StreamingErrorValue::NotGet.into());
                }

                // headers complete?
                if find_header_end(&self.request_buffer).is_some() {
                    self.send_response_header()?;
                    self.state = StreamingSessionState::Streaming;
                    info!(client = %self.client_id, sampling_rate = self.sampling_rate(), "streaming started");
                }
                Ok(())
            }
            StreamingSessionState::Streaming => {
                debug!(
                    client = %self.client_id,
                    bytes = data.len(),
                    "ignoring data on streaming connection"
                );
                Ok(())
            }
            StreamingSessionState::Closed => Err(StreamingErrorValue::SessionClosed.into()),
        }
    }

    /// Push one chunk through the encoder onto the connection.
    pub fn on_chunk(&mut self, chunk: &Chunk, sampling_rate: u32) -> Result<(), StreamingError> {
        if self.state != StreamingSessionState::Streaming {
            return Err(StreamingErrorValue::SessionClosed.into());
        }

        if sampling_rate != self.sampling_rate() {
            warn!(
                client = %self.client_id,
                session_rate = self.sampling_rate(),
                chunk_rate = sampling_rate,
                "dropping chunk with mismatched sampling rate"
            );
            return Ok(());
        }

        if let Err(err) = self.encoder.encode(chunk.payload()) {
            self.fail();
            return Err(err.into());
        }
        Ok(())
    }

    /// Force the client to reconnect (sampling-rate change).
    pub fn stop(&self) {
        self.connection.stop();
    }

    fn send_response_header(&mut self) -> Result<(), StreamingError> {
        let header = format!(
            "HTTP/1.0 200 OK\r\n\
             Server: slimcast/{}\r\n\
             Content-Type: {}\r\n\
             Connection: close\r\n\
             \r\n",
            env!("CARGO_PKG_VERSION"),
            self.encoder.mime(),
        );

        match self.connection.try_write(Bytes::from(header)) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = StreamingSessionState::Closed;
                Err(err.into())
            }
        }
    }

    fn fail(&mut self) {
        self.state = StreamingSessionState::Closed;
        self.connection.stop();
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}
