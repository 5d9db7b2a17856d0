use bytes::Bytes;
use std::fmt;
use std::io;
use tokio::sync::mpsc;
use tracing::warn;

/// Capacity for a connection's outbound byte channel (bounded to prevent
/// OOM with slow clients). At one PCM chunk per entry this is a few
/// seconds of audio per client.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 512;

/// Stable, hashable identity of one TCP connection. Sessions are keyed by
/// this token rather than by socket or address, so re-binding a socket
/// can never alias two sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type OutboundSender = mpsc::Sender<Result<Bytes, io::Error>>;
pub type OutboundReceiver = mpsc::Receiver<Result<Bytes, io::Error>>;

/// Handle to one accepted TCP connection, owned by the external acceptor.
///
/// The acceptor keeps the receiving half of the outbound channel and
/// copies everything it yields to the socket; an `Err` item is the
/// teardown signal and ends the connection. Cloning the handle is cheap,
/// all clones share the same identity.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: OutboundSender,
}

impl Connection {
    #[must_use]
    pub fn new(outbound: OutboundSender) -> Self {
        Self {
            id: ConnectionId::new(),
            outbound,
        }
    }

    /// Create a connection together with the acceptor's receiving half.
    #[must_use]
    pub fn channel() -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        (Self::new(tx), rx)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue bytes for the socket without blocking. A full channel drops
    /// the write and logs (slow client); a closed channel reports the
    /// connection gone so the caller can drop its session.
    pub fn try_write(&self, data: Bytes) -> Result<(), io::Error> {
        match self.outbound.try_send(Ok(data)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %self.id, "outbound channel full, dropping write (slow client)");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "outbound channel closed",
            )),
        }
    }

    /// Request connection teardown. The acceptor closes the socket when it
    /// receives the error sentinel and then reports the close back through
    /// the streamer's close callback. The sentinel is delivered even when
    /// the channel is backpressured by a slow client.
    pub fn stop(&self) {
        let sentinel = Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "connection stopped",
        ));
        match self.outbound.try_send(sentinel) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(sentinel)) => {
                // slow client already backpressured; hand the sentinel to
                // a task that waits for room so the teardown still lands
                warn!(connection = %self.id, "outbound channel full, queueing teardown");
                let outbound = self.outbound.clone();
                tokio::spawn(async move {
                    let _ = outbound.send(sentinel).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_write_delivers_bytes() {
        let (connection, mut rx) = Connection::channel();
        connection.try_write(Bytes::from_static(b"abc")).unwrap();

        let item = rx.recv().await.unwrap().unwrap();
        assert_eq!(&item[..], b"abc");
    }

    #[tokio::test]
    async fn test_stop_sends_error_sentinel() {
        let (connection, mut rx) = Connection::channel();
        connection.stop();

        let item = rx.recv().await.unwrap();
        assert!(item.is_err());
    }

    #[tokio::test]
    async fn test_stop_delivers_sentinel_when_channel_full() {
        let (connection, mut rx) = Connection::channel();
        for _ in 0..OUTBOUND_CHANNEL_CAPACITY {
            connection.try_write(Bytes::from_static(b"x")).unwrap();
        }

        // channel is full; the sentinel must still arrive once the
        // acceptor drains
        connection.stop();

        let mut saw_sentinel = false;
        while let Some(item) = rx.recv().await {
            if item.is_err() {
                saw_sentinel = true;
                break;
            }
        }
        assert!(saw_sentinel);
    }

    #[tokio::test]
    async fn test_write_after_close_reports_aborted() {
        let (connection, rx) = Connection::channel();
        drop(rx);

        let err = connection.try_write(Bytes::from_static(b"x")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionAborted);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _rx_a) = Connection::channel();
        let (b, _rx_b) = Connection::channel();
        assert_ne!(a.id(), b.id());
    }
}
