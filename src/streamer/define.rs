use crate::chunk::Chunk;
use crate::connection::{Connection, ConnectionId};
use bytes::Bytes;
use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// Opaque textual identity shared between a client's control and data
/// connections. Derived from the MAC the client advertises in HELO.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    #[must_use]
    pub fn from_mac(mac: &[u8; 6]) -> Self {
        let mut id = String::with_capacity(12);
        for byte in mac {
            id.push_str(&format!("{byte:02x}"));
        }
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the streamer core reacts to. Network callbacks, the
/// scheduler pump, and the ping timer all submit events over one bounded
/// channel; the core processes them strictly in order, so no other
/// synchronization guards the session maps.
pub enum StreamerEvent {
    SlimProtoData {
        connection: Connection,
        data: Bytes,
    },
    SlimProtoClose {
        id: ConnectionId,
    },
    HttpData {
        connection: Connection,
        data: Bytes,
    },
    HttpClose {
        id: ConnectionId,
    },
    Chunk {
        chunk: Chunk,
        sampling_rate: u32,
        result_sender: ChunkResultSender,
    },
    Ping,
    Shutdown,
}

pub type StreamerEventSender = mpsc::Sender<StreamerEvent>;
pub type StreamerEventReceiver = mpsc::Receiver<StreamerEvent>;

/// Returns the chunk to the producer together with the done flag
/// (`true` = dispatched or intentionally dropped, `false` = redeliver).
pub type ChunkResultSender = oneshot::Sender<(Chunk, bool)>;

/// Capacity for the bounded streamer event channel.
pub const STREAMER_EVENT_CHANNEL_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::ClientId;

    #[test]
    fn test_client_id_from_mac() {
        let id = ClientId::from_mac(&[0x00, 0x11, 0xaa, 0xbb, 0xcc, 0x0f]);
        assert_eq!(id.as_str(), "0011aabbcc0f");
    }
}
