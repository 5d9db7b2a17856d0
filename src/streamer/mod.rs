pub mod define;
pub mod errors;

use crate::chunk::Chunk;
use crate::config::StreamConfig;
use crate::connection::{Connection, ConnectionId};
use crate::encoder::pcm::PcmEncoder;
use crate::encoder::{EncodedSink, Encoder, EncoderParams};
use crate::http::StreamingSession;
use crate::pipeline::define::{ChunkDelivery, Consumer};
use crate::slimproto::{CommandSession, CommandSessionState};
use async_trait::async_trait;
use bytes::Bytes;
use define::{
    StreamerEvent, StreamerEventReceiver, StreamerEventSender, STREAMER_EVENT_CHANNEL_CAPACITY,
};
use errors::{StreamerError, StreamerErrorValue};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// The streamer coordination engine.
///
/// Owns the two per-client session populations (SlimProto control, HTTP
/// audio) and correlates them by ClientId, fans PCM chunks out to all
/// sessions at the committed sampling rate, forces reconnects when the
/// source rate changes, and pings clients periodically for round-trip
/// latency. All state lives inside one event-loop task; network I/O
/// tasks, the scheduler pump and the ping timer only submit events, so
/// every mutation is serialized in arrival order.
pub struct Streamer {
    config: StreamConfig,
    event_sender: StreamerEventSender,
    event_receiver: StreamerEventReceiver,
}

impl Streamer {
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        let (event_sender, event_receiver) = mpsc::channel(STREAMER_EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            event_sender,
            event_receiver,
        }
    }

    /// Cloneable handle used by the acceptor callbacks and the scheduler.
    #[must_use]
    pub fn handle(&self) -> StreamerHandle {
        StreamerHandle {
            event_sender: self.event_sender.clone(),
        }
    }

    /// Run the event loop until a shutdown event arrives. Consumes the
    /// streamer; the ping timer lives and dies with this call.
    pub async fn run(mut self) {
        let (exit_sender, _) = broadcast::channel::<()>(1);
        let timer = start_ping_timer(
            exit_sender.subscribe(),
            self.event_sender.clone(),
            self.config.ping_tick(),
            self.config.ping_every_ticks,
        );

        let mut core = StreamerCore::new(self.config.clone());

        info!("streamer started");
        while let Some(event) = self.event_receiver.recv().await {
            match event {
                StreamerEvent::SlimProtoData { connection, data } => {
                    core.on_slim_proto_data(connection, &data);
                }
                StreamerEvent::SlimProtoClose { id } => {
                    core.on_slim_proto_close(id);
                }
                StreamerEvent::HttpData { connection, data } => {
                    core.on_http_data(connection, &data);
                }
                StreamerEvent::HttpClose { id } => {
                    core.on_http_close(id);
                }
                StreamerEvent::Chunk {
                    chunk,
                    sampling_rate,
                    result_sender,
                } => {
                    let outcome = core.on_chunk(chunk, sampling_rate).await;
                    if result_sender.send(outcome).is_err() {
                        warn!("chunk producer went away before receiving the result");
                    }
                }
                StreamerEvent::Ping => {
                    core.ping_sessions();
                }
                StreamerEvent::Shutdown => {
                    break;
                }
            }
        }

        let _ = exit_sender.send(());
        let _ = timer.await;
        core.shutdown();
        info!("streamer stopped");
    }
}

/// Wakes every tick and submits a ping event every `every_ticks` ticks.
fn start_ping_timer(
    mut exit: broadcast::Receiver<()>,
    event_sender: StreamerEventSender,
    tick: Duration,
    every_ticks: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        debug!("ping timer started");
        let mut interval = tokio::time::interval(tick);
        let mut counter = 0u32;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    counter += 1;
                    if counter >= every_ticks {
                        counter = 0;
                        match event_sender.try_send(StreamerEvent::Ping) {
                            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                }
                _ = exit.recv() => break,
            }
        }
        debug!("ping timer stopped");
    })
}

struct StreamerCore {
    config: StreamConfig,
    command_sessions: HashMap<ConnectionId, CommandSession>,
    streaming_sessions: HashMap<ConnectionId, StreamingSession>,
    /// Committed sampling rate; 0 while none is chosen or a change is
    /// being renegotiated.
    sampling_rate: u32,
    /// Start of the current deferred-delivery window.
    defer_started: Option<Instant>,
}

impl StreamerCore {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            command_sessions: HashMap::new(),
            streaming_sessions: HashMap::new(),
            sampling_rate: 0,
            defer_started: None,
        }
    }

    fn on_slim_proto_data(&mut self, connection: Connection, data: &[u8]) {
        let id = connection.id();

        if let Some(session) = self.command_sessions.get_mut(&id) {
            if let Err(err) = session.on_data(data) {
                info!(connection = %id, error = %err, "control session error");
            }
            return;
        }

        if data.starts_with(b"HELO") {
            info!(connection = %id, "HELO received on new control connection");
            let mut session = CommandSession::new(connection);
            if session.on_data(data).is_ok() {
                self.add_command_session(id, session);
            }
        } else {
            info!(connection = %id, "incorrect handshake message received");
            connection.stop();
        }
    }

    fn on_slim_proto_close(&mut self, id: ConnectionId) {
        debug!(
            connection = %id,
            sessions = self.command_sessions.len(),
            "removing control session"
        );
        if self.command_sessions.remove(&id).is_some() {
            debug!(
                connection = %id,
                sessions = self.command_sessions.len(),
                "control session removed"
            );
        }
    }

    fn on_http_data(&mut self, connection: Connection, data: &[u8]) {
        let id = connection.id();

        if let Some(session) = self.streaming_sessions.get_mut(&id) {
            if let Err(err) = session.on_request(data) {
                error!(connection = %id, error = %err, "streaming session error");
                self.streaming_sessions.remove(&id);
            }
            return;
        }

        if !data.starts_with(b"GET") {
            info!(connection = %id, "non-GET data on new HTTP connection");
            connection.stop();
            return;
        }

        let Some(client_id) = StreamingSession::parse_client_id(data) else {
            error!(connection = %id, "could not parse ClientId from HTTP request");
            connection.stop();
            return;
        };

        let correlated = self
            .command_sessions
            .values()
            .any(|session| session.client_id() == Some(&client_id));
        if !correlated {
            error!(
                connection = %id,
                client = %client_id,
                "could not correlate HTTP request with a control session"
            );
            connection.stop();
            return;
        }

        info!(connection = %id, client = %client_id, "HTTP request correlated");
        let encoder = self.new_encoder(connection.clone());
        let mut session = StreamingSession::new(connection, client_id, encoder);
        match session.on_request(data) {
            Ok(()) => {
                self.add_streaming_session(id, session);
            }
            Err(err) => {
                error!(connection = %id, error = %err, "rejecting HTTP request");
            }
        }
    }

    fn on_http_close(&mut self, id: ConnectionId) {
        debug!(
            connection = %id,
            sessions = self.streaming_sessions.len(),
            "removing streaming session"
        );
        if self.streaming_sessions.remove(&id).is_some() {
            debug!(
                connection = %id,
                sessions = self.streaming_sessions.len(),
                "streaming session removed"
            );
        }
    }

    /// Fan one chunk out; returns the chunk and the done flag (`false`
    /// asks the producer to redeliver the same chunk after a pause).
    async fn on_chunk(&mut self, chunk: Chunk, sampling_rate: u32) -> (Chunk, bool) {
        let mut done = true;

        if sampling_rate != 0 && self.sampling_rate != 0 && self.sampling_rate != sampling_rate {
            info!(
                old_rate = self.sampling_rate,
                new_rate = sampling_rate,
                "sampling rate changed, forcing clients to reconnect"
            );
            // zero means renegotiating; the commit branch below picks the
            // new rate up on this same call
            self.sampling_rate = 0;
            for session in self.streaming_sessions.values() {
                session.stop();
            }
        }

        if sampling_rate != 0 && self.sampling_rate == 0 {
            // defer this chunk: no HTTP session can be at the new rate yet
            done = false;
            self.sampling_rate = sampling_rate;

            for session in self.command_sessions.values_mut() {
                if let Err(err) = session.start_stream(sampling_rate) {
                    warn!(error = %err, "failed to send stream start command");
                }
            }
        }

        if sampling_rate != 0 && self.sampling_rate == sampling_rate && done {
            let finish = self.has_to_finish();

            if !finish {
                if self.streaming_sessions.len() != self.command_sessions.len() {
                    debug!("deferring chunk delivery, HTTP sessions missing");
                    done = false;
                    tokio::time::sleep(self.config.defer_pause()).await;
                } else if self
                    .streaming_sessions
                    .values()
                    .any(|session| session.sampling_rate() != self.sampling_rate)
                {
                    debug!("deferring chunk delivery, HTTP sessions reconnecting");
                    done = false;
                    tokio::time::sleep(self.config.defer_pause()).await;
                }
            } else {
                debug!("defer window elapsed, dispatching to ready sessions");
            }

            if done {
                self.defer_started = None;
                self.dispatch(&chunk);
            }
        }

        (chunk, done)
    }

    fn dispatch(&mut self, chunk: &Chunk) {
        let total_clients = self.command_sessions.len();
        let mut delivered = 0usize;
        let mut failed = Vec::new();

        for (id, session) in &mut self.streaming_sessions {
            if session.sampling_rate() == self.sampling_rate {
                match session.on_chunk(chunk, self.sampling_rate) {
                    Ok(()) => delivered += 1,
                    Err(err) => {
                        error!(connection = %id, error = %err, "streaming session failed");
                        failed.push(*id);
                    }
                }
            }
        }

        for id in failed {
            self.streaming_sessions.remove(&id);
        }

        let skipped = total_clients.saturating_sub(delivered);
        if skipped > 0 {
            warn!(skipped, "chunk delivery skipped for some clients");
        }
    }

    /// Whether the current defer streak has exhausted its budget and the
    /// chunk must go out to whoever is ready. Starts the window on the
    /// first call of a streak.
    fn has_to_finish(&mut self) -> bool {
        match self.defer_started {
            Some(started) => started.elapsed() > self.config.defer_window(),
            None => {
                self.defer_started = Some(Instant::now());
                false
            }
        }
    }

    fn ping_sessions(&mut self) {
        for session in self.command_sessions.values_mut() {
            if session.state() == CommandSessionState::Ready {
                if let Err(err) = session.ping() {
                    warn!(error = %err, "ping failed");
                }
            }
        }
    }

    fn add_command_session(&mut self, id: ConnectionId, session: CommandSession) {
        debug!(sessions = self.command_sessions.len(), "adding control session");
        match self.command_sessions.entry(id) {
            Entry::Occupied(_) => {
                info!(connection = %id, "control session already exists");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(session);
                debug!(
                    connection = %id,
                    sessions = self.command_sessions.len(),
                    "control session added"
                );
            }
        }
    }

    fn add_streaming_session(&mut self, id: ConnectionId, session: StreamingSession) {
        debug!(
            sessions = self.streaming_sessions.len(),
            "adding streaming session"
        );
        match self.streaming_sessions.entry(id) {
            Entry::Occupied(_) => {
                info!(connection = %id, "streaming session already exists");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(session);
                debug!(
                    connection = %id,
                    sessions = self.streaming_sessions.len(),
                    "streaming session added"
                );
            }
        }
    }

    fn new_encoder(&self, connection: Connection) -> Box<dyn Encoder> {
        let sink: EncodedSink =
            Box::new(move |data| connection.try_write(Bytes::copy_from_slice(data)));
        Box::new(PcmEncoder::new(
            EncoderParams {
                channels: self.config.channels,
                bits_per_sample: self.config.bits_per_sample,
                bits_per_value: self.config.bits_per_value,
                sampling_rate: self.sampling_rate,
            },
            sink,
        ))
    }

    /// Ask clients to stop cleanly and tear down all data connections.
    fn shutdown(&mut self) {
        for session in self.command_sessions.values_mut() {
            if session.state() == CommandSessionState::Ready {
                if let Err(err) = session.stop_stream() {
                    debug!(error = %err, "stream stop command not delivered");
                }
            }
        }
        for session in self.streaming_sessions.values() {
            session.stop();
        }
        self.command_sessions.clear();
        self.streaming_sessions.clear();
    }
}

/// Cloneable submission handle to the streamer event loop.
///
/// The acceptor invokes the callback methods from its I/O tasks; the
/// scheduler pump drives `on_chunk` through the `Consumer` impl.
#[derive(Clone)]
pub struct StreamerHandle {
    event_sender: StreamerEventSender,
}

impl StreamerHandle {
    pub fn on_slim_proto_open(&self, id: ConnectionId) {
        info!(connection = %id, "SlimProto open");
    }

    pub fn on_slim_proto_start(&self, id: ConnectionId) {
        info!(connection = %id, "SlimProto start");
    }

    pub fn on_slim_proto_stop(&self, id: ConnectionId) {
        info!(connection = %id, "SlimProto stop");
    }

    pub async fn on_slim_proto_data(
        &self,
        connection: Connection,
        data: Bytes,
    ) -> Result<(), StreamerError> {
        self.send(StreamerEvent::SlimProtoData { connection, data })
            .await
    }

    pub async fn on_slim_proto_close(&self, id: ConnectionId) -> Result<(), StreamerError> {
        self.send(StreamerEvent::SlimProtoClose { id }).await
    }

    pub fn on_http_open(&self, id: ConnectionId) {
        info!(connection = %id, "HTTP open");
    }

    pub fn on_http_start(&self, id: ConnectionId) {
        info!(connection = %id, "HTTP start");
    }

    pub fn on_http_stop(&self, id: ConnectionId) {
        info!(connection = %id, "HTTP stop");
    }

    pub async fn on_http_data(
        &self,
        connection: Connection,
        data: Bytes,
    ) -> Result<(), StreamerError> {
        self.send(StreamerEvent::HttpData { connection, data }).await
    }

    pub async fn on_http_close(&self, id: ConnectionId) -> Result<(), StreamerError> {
        self.send(StreamerEvent::HttpClose { id }).await
    }

    /// Stop the event loop; `Streamer::run` returns after processing
    /// everything already queued.
    pub async fn shutdown(&self) -> Result<(), StreamerError> {
        self.send(StreamerEvent::Shutdown).await
    }

    async fn send(&self, event: StreamerEvent) -> Result<(), StreamerError> {
        self.event_sender
            .send(event)
            .await
            .map_err(|_| StreamerErrorValue::ChannelClosed.into())
    }
}

#[async_trait]
impl Consumer for StreamerHandle {
    async fn on_chunk(&self, chunk: Chunk, sampling_rate: u32) -> ChunkDelivery {
        let (result_sender, result_receiver) = oneshot::channel();
        let event = StreamerEvent::Chunk {
            chunk,
            sampling_rate,
            result_sender,
        };

        if let Err(send_error) = self.event_sender.send(event).await {
            warn!("streamer stopped, dropping chunk");
            let StreamerEvent::Chunk { chunk, .. } = send_error.0 else {
                return ChunkDelivery::Lost;
            };
            return ChunkDelivery::Dispatched(chunk);
        }

        match result_receiver.await {
            Ok((chunk, true)) => ChunkDelivery::Dispatched(chunk),
            Ok((chunk, false)) => ChunkDelivery::Deferred(chunk),
            Err(_) => {
                warn!("streamer dropped an in-flight chunk during shutdown");
                ChunkDelivery::Lost
            }
        }
    }

    async fn stop(&self) {
        let _ = self.shutdown().await;
    }
}
