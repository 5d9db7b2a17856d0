pub mod define;

use crate::config::StreamConfig;
use define::{Consumer, Producer, ProducerSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Owns one producer set and one consumer and pumps chunks between them.
///
/// The pump visits every producer per pass, draining a bounded batch from
/// each so one busy producer cannot starve the others, and backs off when
/// nothing has data or the consumer defers. It exits once no producer
/// reports running.
pub struct Scheduler {
    producers: Arc<Mutex<ProducerSet>>,
    consumer: Arc<dyn Consumer>,
    produce_batch: u32,
    pause: Duration,
    pump: Option<JoinHandle<()>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(producers: ProducerSet, consumer: Arc<dyn Consumer>, config: &StreamConfig) -> Self {
        Self {
            producers: Arc::new(Mutex::new(producers)),
            consumer,
            produce_batch: config.produce_batch,
            pause: config.idle_pause(),
            pump: None,
        }
    }

    /// Start all producers and the consumer, then launch the pump task.
    pub async fn start(&mut self) {
        {
            let mut producers = self.producers.lock().await;
            producers.start_all();
        }
        self.consumer.start();

        let producers = self.producers.clone();
        let consumer = self.consumer.clone();
        let produce_batch = self.produce_batch;
        let pause = self.pause;

        self.pump = Some(tokio::spawn(async move {
            debug!("pump task started");
            pump_loop(&producers, consumer.as_ref(), produce_batch, pause).await;
            debug!("pump task stopped");
        }));
    }

    /// Stop producers and consumer, then wait for the pump to drain its
    /// current pass and exit.
    pub async fn stop(&mut self) {
        {
            let mut producers = self.producers.lock().await;
            producers.stop_all();
        }
        self.consumer.stop().await;

        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }
}

async fn pump_loop(
    producers: &Mutex<ProducerSet>,
    consumer: &dyn Consumer,
    produce_batch: u32,
    pause: Duration,
) {
    loop {
        let mut running = false;
        let mut available = false;

        {
            let mut producers = producers.lock().await;
            for producer in producers.iter_mut() {
                let r = producer.is_running();
                let a = producer.is_available();

                if r && a {
                    let accepted = run_batch(producer.as_mut(), consumer, produce_batch).await;
                    if !accepted {
                        producer.pause(pause);
                    }
                }

                running |= r;
                available |= a;
            }
        }

        if !running {
            break;
        }
        if !available {
            tokio::time::sleep(pause).await;
        }
    }
}

/// Drain up to `produce_batch` chunks from one producer, stopping at the
/// first deferral or once the producer runs dry. Returns `false` when the
/// batch ended with a deferral.
async fn run_batch(producer: &mut dyn Producer, consumer: &dyn Consumer, produce_batch: u32) -> bool {
    let mut accepted = true;
    let mut count = produce_batch;

    while accepted && count > 0 && producer.is_available() {
        accepted = producer.produce(consumer).await;
        count -= 1;
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::define::{ChunkDelivery, Consumer, Producer, ProducerSet};
    use super::*;
    use crate::chunk::Chunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingProducer {
        running: bool,
        chunks_left: u32,
        produce_calls: Arc<AtomicU32>,
    }

    impl CountingProducer {
        fn new(chunks: u32, produce_calls: Arc<AtomicU32>) -> Self {
            Self {
                running: false,
                chunks_left: chunks,
                produce_calls,
            }
        }
    }

    #[async_trait]
    impl Producer for CountingProducer {
        fn start(&mut self) {
            self.running = true;
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn is_running(&self) -> bool {
            self.running && self.chunks_left > 0
        }

        fn is_available(&self) -> bool {
            self.chunks_left > 0
        }

        async fn produce(&mut self, consumer: &dyn Consumer) -> bool {
            self.produce_calls.fetch_add(1, Ordering::SeqCst);
            match consumer.on_chunk(Chunk::with_capacity(8), 44100).await {
                ChunkDelivery::Dispatched(_) | ChunkDelivery::Lost => {
                    self.chunks_left -= 1;
                    true
                }
                ChunkDelivery::Deferred(_) => false,
            }
        }

        fn pause(&mut self, _duration: Duration) {}
    }

    struct AcceptingConsumer {
        received: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Consumer for AcceptingConsumer {
        async fn on_chunk(&self, chunk: Chunk, _sampling_rate: u32) -> ChunkDelivery {
            self.received.fetch_add(1, Ordering::SeqCst);
            ChunkDelivery::Dispatched(chunk)
        }
    }

    struct DeferringConsumer;

    #[async_trait]
    impl Consumer for DeferringConsumer {
        async fn on_chunk(&self, chunk: Chunk, _sampling_rate: u32) -> ChunkDelivery {
            ChunkDelivery::Deferred(chunk)
        }
    }

    #[tokio::test]
    async fn test_batch_is_capped() {
        let produce_calls = Arc::new(AtomicU32::new(0));
        let mut producer = CountingProducer::new(100, produce_calls.clone());
        producer.start();
        let consumer = AcceptingConsumer {
            received: Arc::new(AtomicU32::new(0)),
        };

        let accepted = run_batch(&mut producer, &consumer, 5).await;

        assert!(accepted);
        assert_eq!(produce_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_deferral() {
        let produce_calls = Arc::new(AtomicU32::new(0));
        let mut producer = CountingProducer::new(100, produce_calls.clone());
        producer.start();

        let accepted = run_batch(&mut producer, &DeferringConsumer, 5).await;

        assert!(!accepted);
        assert_eq!(produce_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_stops_when_producer_runs_dry() {
        let produce_calls = Arc::new(AtomicU32::new(0));
        let mut producer = CountingProducer::new(3, produce_calls.clone());
        producer.start();
        let consumer = AcceptingConsumer {
            received: Arc::new(AtomicU32::new(0)),
        };

        let accepted = run_batch(&mut producer, &consumer, 5).await;

        assert!(accepted);
        assert_eq!(produce_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_scheduler_drains_producer_and_pump_exits() {
        let produce_calls = Arc::new(AtomicU32::new(0));
        let received = Arc::new(AtomicU32::new(0));
        let stopped = Arc::new(AtomicBool::new(false));

        struct StopTrackingConsumer {
            received: Arc<AtomicU32>,
            stopped: Arc<AtomicBool>,
        }

        #[async_trait]
        impl Consumer for StopTrackingConsumer {
            async fn on_chunk(&self, chunk: Chunk, _sampling_rate: u32) -> ChunkDelivery {
                self.received.fetch_add(1, Ordering::SeqCst);
                ChunkDelivery::Dispatched(chunk)
            }

            async fn stop(&self) {
                self.stopped.store(true, Ordering::SeqCst);
            }
        }

        let mut producers = ProducerSet::new();
        producers.add(Box::new(CountingProducer::new(7, produce_calls.clone())));

        let consumer = Arc::new(StopTrackingConsumer {
            received: received.clone(),
            stopped: stopped.clone(),
        });

        let mut scheduler = Scheduler::new(producers, consumer, &StreamConfig::default());
        scheduler.start().await;

        // the producer drains and stops reporting running, so the pump
        // exits on its own; stop() then just joins
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;

        assert_eq!(received.load(Ordering::SeqCst), 7);
        assert!(stopped.load(Ordering::SeqCst));
    }
}
