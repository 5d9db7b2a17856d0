use crate::chunk::Chunk;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of handing one chunk to the consumer. The chunk comes back so
/// the producer pool can reuse its buffer; `Deferred` means the same
/// chunk must be redelivered after a brief pause. `Lost` can only happen
/// while the consumer is shutting down: the chunk is unrecoverable and
/// the producer allocates a fresh buffer.
#[derive(Debug)]
pub enum ChunkDelivery {
    Dispatched(Chunk),
    Deferred(Chunk),
    Lost,
}

/// Sink for PCM chunks. The Streamer fills this role.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Accept one chunk at the given sampling rate.
    async fn on_chunk(&self, chunk: Chunk, sampling_rate: u32) -> ChunkDelivery;

    fn start(&self) {}

    async fn stop(&self) {}
}

/// Polled source of PCM chunks.
///
/// `pause` must be non-blocking: it marks the producer unavailable for at
/// most the given duration so the pump can move on to other producers.
#[async_trait]
pub trait Producer: Send {
    fn start(&mut self);

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    fn is_available(&self) -> bool;

    /// Deliver at most one chunk to the consumer. Returns `true` when the
    /// chunk was delivered and accepted, `false` when the consumer
    /// deferred it.
    async fn produce(&mut self, consumer: &dyn Consumer) -> bool;

    fn pause(&mut self, duration: Duration);
}

/// Ordered set of producers drained by one Scheduler.
#[derive(Default)]
pub struct ProducerSet {
    producers: Vec<Box<dyn Producer>>,
}

impl ProducerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, producer: Box<dyn Producer>) {
        self.producers.push(producer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.producers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Producer>> {
        self.producers.iter_mut()
    }

    pub fn start_all(&mut self) {
        for producer in &mut self.producers {
            producer.start();
        }
    }

    pub fn stop_all(&mut self) {
        for producer in &mut self.producers {
            producer.stop();
        }
    }
}
