// chatstats-core/src/sink/mod.rs

use async_trait::async_trait;

use crate::models::EventRow;
use crate::Error;

pub mod clickhouse;
pub mod writer;

pub use clickhouse::ClickHouseSink;
pub use writer::spawn_event_writer;

/// Capacity of the shared event queue. A full queue blocks dispatchers;
/// this is the only backpressure mechanism between ingestion and the sink.
pub const EVENT_QUEUE_CAPACITY: usize = 1000;

/// Seconds between batch flushes.
pub const FLUSH_INTERVAL_SECS: u64 = 5;

/// Destination of event batches.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn insert_batch(&self, rows: &[EventRow]) -> Result<(), Error>;
}
