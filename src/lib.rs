// slimcast - multi-room PCM audio streaming server
//
// Architecture:
// - connection/  - opaque connection identity + outbound byte channel
// - slimproto/   - SlimProto control sessions (HELO handshake, strm, ping)
// - http/        - HTTP audio-delivery sessions (GET parse, chunked body)
// - streamer/    - session correlation, chunk fan-out, rate transitions
// - pipeline/    - producer/consumer contracts and the pump scheduler
// - encoder/     - PCM wire-format encoders
//
// A capture driver fills Chunks, the Scheduler pumps them into the
// Streamer, and the Streamer fans every chunk out to all HTTP sessions
// whose sampling rate matches the committed one. Control and data
// connections of one client are correlated by ClientId.

pub mod chunk;
pub mod config;
pub mod connection;
pub mod encoder;
pub mod http;
pub mod logging;
pub mod pipeline;
pub mod slimproto;
pub mod streamer;

// Re-exports for convenience
pub use chunk::Chunk;
pub use config::Config;
pub use connection::{Connection, ConnectionId};
pub use pipeline::define::{ChunkDelivery, Consumer, Producer, ProducerSet};
pub use pipeline::Scheduler;
pub use streamer::define::ClientId;
pub use streamer::{Streamer, StreamerHandle};
