pub mod errors;
pub mod packet;

use crate::connection::Connection;
use crate::encoder::pcm::PCM_EXTENSION;
use crate::streamer::define::ClientId;
use bytes::Bytes;
use errors::{SlimProtoError, SlimProtoErrorValue};
use packet::{build_ping, build_strm, ClientMessage, FrameReader, StreamSelection};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSessionState {
    AwaitingHandshake,
    Ready,
    Closed,
}

/// Per-client SlimProto protocol actor over one control connection.
///
/// Created on the first HELO bytes of a new control connection; lives
/// until that connection closes. Frames inbound byte runs, tracks the
/// handshake, and emits strm/ping commands. On a framing or protocol
/// error the session closes itself and requests connection teardown.
pub struct CommandSession {
    connection: Connection,
    state: CommandSessionState,
    reader: FrameReader,
    client_id: Option<ClientId>,
    capabilities: Option<String>,
    started_at: Instant,
    ping_sent: Option<(u32, Instant)>,
    round_trip: Option<Duration>,
}

impl CommandSession {
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            state: CommandSessionState::AwaitingHandshake,
            reader: FrameReader::new(),
            client_id: None,
            capabilities: None,
            started_at: Instant::now(),
            ping_sent: None,
            round_trip: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> CommandSessionState {
        self.state
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    #[must_use]
    pub fn capabilities(&self) -> Option<&str> {
        self.capabilities.as_deref()
    }

    /// Round-trip latency measured by the last answered ping.
    #[must_use]
    pub fn round_trip(&self) -> Option<Duration> {
        self.round_trip
    }

    /// Feed a raw byte run as received on the wire.
    pub fn on_data(&mut self, data: &[u8]) -> Result<(), SlimProtoError> {
        if self.state == CommandSessionState::Closed {
            return Err(SlimProtoErrorValue::SessionClosed.into());
        }

        self.reader.extend(data);
        match self.drain_messages() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = CommandSessionState::Closed;
                self.connection.stop();
                Err(err)
            }
        }
    }

    fn drain_messages(&mut self) -> Result<(), SlimProtoError> {
        while let Some(message) = self.reader.next_message()? {
            self.handle_message(message)?;
        }
        Ok(())
    }

    fn handle_message(&mut self, message: ClientMessage) -> Result<(), SlimProtoError> {
        match (self.state, message) {
            (CommandSessionState::AwaitingHandshake, ClientMessage::Helo(helo)) => {
                let client_id = ClientId::from_mac(&helo.mac);
                info!(
                    client = %client_id,
                    device_id = helo.device_id,
                    revision = helo.revision,
                    "client handshake complete"
                );
                self.client_id = Some(client_id);
                self.capabilities = (!helo.capabilities.is_empty()).then_some(helo.capabilities);
                self.state = CommandSessionState::Ready;
                Ok(())
            }
            (CommandSessionState::AwaitingHandshake, _) => {
                Err(SlimProtoErrorValue::BadHandshake.into())
            }
            (CommandSessionState::Ready, ClientMessage::Pong { timestamp_ms }) => {
                self.on_pong(timestamp_ms);
                Ok(())
            }
            (CommandSessionState::Ready, ClientMessage::Helo(_)) => {
                debug!("ignoring repeated HELO");
                Ok(())
            }
            (CommandSessionState::Ready, ClientMessage::Other { opcode, payload }) => {
                debug!(
                    opcode = %String::from_utf8_lossy(&opcode),
                    payload_len = payload.len(),
                    "unhandled client message"
                );
                Ok(())
            }
            (CommandSessionState::Closed, _) => Err(SlimProtoErrorValue::SessionClosed.into()),
        }
    }

    fn on_pong(&mut self, timestamp_ms: u32) {
        if let Some((sent_ms, sent_at)) = self.ping_sent.take() {
            if sent_ms == timestamp_ms {
                let round_trip = sent_at.elapsed();
                self.round_trip = Some(round_trip);
                debug!(
                    client = ?self.client_id,
                    round_trip_us = round_trip.as_micros() as u64,
                    "pong received"
                );
            } else {
                debug!(
                    expected = sent_ms,
                    received = timestamp_ms,
                    "stale pong timestamp"
                );
            }
        }
    }

    /// Tell the client to open an HTTP audio connection at the given
    /// sampling rate. The strm tail is the exact request line the client
    /// replays on the data port, carrying its own ClientId.
    pub fn start_stream(&mut self, sampling_rate: u32) -> Result<(), SlimProtoError> {
        let client_id = match (&self.state, &self.client_id) {
            (CommandSessionState::Ready, Some(client_id)) => client_id.clone(),
            _ => return Err(SlimProtoErrorValue::NotReady.into()),
        };

        info!(client = %client_id, sampling_rate, "requesting stream start");
        let request = format!("GET /stream.{PCM_EXTENSION}?player={client_id} HTTP/1.0\r\n");
        self.write(build_strm(StreamSelection::Start, sampling_rate, &request))
    }

    /// Tell the client to stop streaming (server shutdown).
    pub fn stop_stream(&mut self) -> Result<(), SlimProtoError> {
        if self.state != CommandSessionState::Ready {
            return Err(SlimProtoErrorValue::NotReady.into());
        }
        self.write(build_strm(StreamSelection::Stop, 0, ""))
    }

    /// Send a timestamped ping frame to measure round-trip latency.
    pub fn ping(&mut self) -> Result<(), SlimProtoError> {
        if self.state != CommandSessionState::Ready {
            return Err(SlimProtoErrorValue::NotReady.into());
        }

        let timestamp_ms = self.started_at.elapsed().as_millis() as u32;
        self.write(build_ping(timestamp_ms))?;
        self.ping_sent = Some((timestamp_ms, Instant::now()));
        Ok(())
    }

    fn write(&mut self, frame: Bytes) -> Result<(), SlimProtoError> {
        match self.connection.try_write(frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = CommandSessionState::Closed;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OutboundReceiver;

    fn helo_bytes(mac: [u8; 6]) -> Vec<u8> {
        let mut payload = vec![0u8, 2u8];
        payload.extend_from_slice(&mac);

        let mut frame = Vec::new();
        frame.extend_from_slice(b"HELO");
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    fn session() -> (CommandSession, OutboundReceiver) {
        let (connection, rx) = Connection::channel();
        (CommandSession::new(connection), rx)
    }

    #[tokio::test]
    async fn test_handshake_reaches_ready() {
        let (mut session, _rx) = session();
        assert_eq!(session.state(), CommandSessionState::AwaitingHandshake);

        session
            .on_data(&helo_bytes([0x00, 0x04, 0x20, 0xaa, 0xbb, 0xcc]))
            .unwrap();

        assert_eq!(session.state(), CommandSessionState::Ready);
        assert_eq!(session.client_id().unwrap().as_str(), "000420aabbcc");
    }

    #[tokio::test]
    async fn test_non_helo_handshake_closes_session() {
        let (mut session, mut rx) = session();

        let mut data = Vec::new();
        data.extend_from_slice(b"STAT");
        data.extend_from_slice(&0u32.to_be_bytes());

        let err = session.on_data(&data).unwrap_err();
        assert!(matches!(err.value, SlimProtoErrorValue::BadHandshake));
        assert_eq!(session.state(), CommandSessionState::Closed);

        // teardown was requested on the connection
        assert!(rx.recv().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_start_stream_embeds_client_id() {
        let (mut session, mut rx) = session();
        session
            .on_data(&helo_bytes([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]))
            .unwrap();

        session.start_stream(48000).unwrap();

        let frame = rx.recv().await.unwrap().unwrap();
        assert_eq!(&frame[2..6], b"strm");
        assert_eq!(frame[6], b's');
        let tail = String::from_utf8_lossy(&frame[12..]).to_string();
        assert!(tail.contains("player=001122334455"));
        assert!(tail.starts_with("GET /stream.pcm"));
    }

    #[tokio::test]
    async fn test_start_stream_requires_handshake() {
        let (mut session, _rx) = session();
        let err = session.start_stream(44100).unwrap_err();
        assert!(matches!(err.value, SlimProtoErrorValue::NotReady));
    }

    #[tokio::test]
    async fn test_ping_pong_measures_round_trip() {
        let (mut session, mut rx) = session();
        session
            .on_data(&helo_bytes([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]))
            .unwrap();

        session.ping().unwrap();
        let frame = rx.recv().await.unwrap().unwrap();
        assert_eq!(&frame[2..6], b"ping");
        let timestamp = u32::from_be_bytes([frame[6], frame[7], frame[8], frame[9]]);

        let mut pong = Vec::new();
        pong.extend_from_slice(b"PONG");
        pong.extend_from_slice(&4u32.to_be_bytes());
        pong.extend_from_slice(&timestamp.to_be_bytes());
        session.on_data(&pong).unwrap();

        assert!(session.round_trip().is_some());
    }
}
