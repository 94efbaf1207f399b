// chatstats-core/src/sink/writer.rs
//
// Single consumer of the event queue. Buffers events from every bot, writes
// the batch on a timer tick, drains the queue on shutdown and does a final
// flush. A failed flush is logged and the batch dropped; the writer keeps
// going with a fresh one.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::models::EventRow;
use crate::sink::EventSink;

pub fn spawn_event_writer<S>(
    mut rx: mpsc::Receiver<EventRow>,
    sink: S,
    flush_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    S: EventSink,
{
    tokio::spawn(async move {
        let mut buffer: Vec<EventRow> = Vec::new();

        info!(interval_secs = flush_interval.as_secs(), "event writer started");

        loop {
            tokio::select! {
                biased;
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => buffer.push(event),
                        None => {
                            info!("event queue closed");
                            break;
                        }
                    }
                },
                _ = cancel.cancelled() => {
                    info!("event writer shutting down");
                    break;
                },
                _ = sleep(flush_interval) => {
                    flush(&sink, &mut buffer).await;
                }
            }
        }

        // Drain whatever producers managed to enqueue before cancellation.
        while let Ok(event) = rx.try_recv() {
            buffer.push(event);
        }

        if !buffer.is_empty() {
            info!(remaining = buffer.len(), "event writer final flush");
        }
        flush(&sink, &mut buffer).await;

        info!("event writer exited");
    })
}

async fn flush<S: EventSink>(sink: &S, buffer: &mut Vec<EventRow>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    if let Err(e) = sink.insert_batch(&batch).await {
        error!(dropped = batch.len(), "event batch flush failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CollectingSink, FlakySink};

    fn event(subtype: &str) -> EventRow {
        let mut row = EventRow::raw("testapp", 1, 1_700_000_000_000);
        row.event_subtype = subtype.to_string();
        row
    }

    #[tokio::test]
    async fn tick_flushes_the_batch() {
        let (tx, rx) = mpsc::channel(16);
        let sink = CollectingSink::default();
        let cancel = CancellationToken::new();
        let handle = spawn_event_writer(rx, sink.clone(), Duration::from_millis(50), cancel.clone());

        tx.send(event("NewMessage")).await.unwrap();
        tx.send(event("EditMessage")).await.unwrap();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(sink.batches().await.len(), 1);
        assert_eq!(sink.rows().await.len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_performs_a_final_flush() {
        let (tx, rx) = mpsc::channel(16);
        let sink = CollectingSink::default();
        let cancel = CancellationToken::new();
        let handle = spawn_event_writer(rx, sink.clone(), Duration::from_secs(3600), cancel.clone());

        tx.send(event("NewMessage")).await.unwrap();
        // give the writer a beat to pull the event into its buffer
        sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        let rows = sink.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_subtype, "NewMessage");
    }

    #[tokio::test]
    async fn failed_flush_drops_the_batch_and_continues() {
        let (tx, rx) = mpsc::channel(16);
        let sink = FlakySink::failing_first(1);
        let cancel = CancellationToken::new();
        let handle = spawn_event_writer(rx, sink.clone(), Duration::from_millis(50), cancel.clone());

        tx.send(event("Lost")).await.unwrap();
        sleep(Duration::from_millis(120)).await;
        tx.send(event("Kept")).await.unwrap();
        sleep(Duration::from_millis(120)).await;

        cancel.cancel();
        handle.await.unwrap();

        let rows = sink.rows().await;
        assert_eq!(rows.len(), 1, "failed batch must not be requeued");
        assert_eq!(rows[0].event_subtype, "Kept");
    }
}
