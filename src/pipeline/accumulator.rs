//! Groups ring buffer items into batches bounded by size and time.

use crate::buffer::RingBuffer;
use crate::core::{Batch, TelemetryItem};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Consumer side of the ring buffer.
///
/// `poll` is the only place below the scheduler that suspends: when the
/// buffer runs dry it parks on the arrival signal until producers raise it or
/// the deadline passes. Items come out in dequeue order, which preserves each
/// producer's enqueue order.
#[derive(Debug)]
pub struct BatchAccumulator {
    buffer: Arc<RingBuffer<TelemetryItem>>,
    arrival: Arc<Notify>,
}

impl BatchAccumulator {
    pub fn new(buffer: Arc<RingBuffer<TelemetryItem>>, arrival: Arc<Notify>) -> Self {
        Self { buffer, arrival }
    }

    pub fn buffer(&self) -> &Arc<RingBuffer<TelemetryItem>> {
        &self.buffer
    }

    /// Dequeue whatever is available right now, up to `max_batch_size`
    pub fn take(&self, max_batch_size: usize) -> Batch {
        let mut items = Vec::with_capacity(max_batch_size.min(self.buffer.len()));
        self.fill(&mut items, max_batch_size);
        Batch::new(items)
    }

    /// Collect until `max_batch_size` items or `max_wait` elapses, whichever
    /// comes first. The result may be partial or empty.
    pub async fn poll(&self, max_batch_size: usize, max_wait: Duration) -> Batch {
        self.poll_until(max_batch_size, max_wait, || false).await
    }

    /// Like [`poll`](Self::poll), but returns early as soon as `interrupted`
    /// reports true after a wake-up.
    pub async fn poll_until<F>(&self, max_batch_size: usize, max_wait: Duration, interrupted: F) -> Batch
    where
        F: Fn() -> bool,
    {
        let deadline = Instant::now()
            .checked_add(max_wait)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(60 * 60 * 24));
        let mut items = Vec::with_capacity(max_batch_size.min(self.buffer.len()));

        loop {
            self.fill(&mut items, max_batch_size);
            if items.len() >= max_batch_size || interrupted() {
                break;
            }

            let notified = self.arrival.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Re-check after registering so a signal raised in between is not lost
            let before = items.len();
            self.fill(&mut items, max_batch_size);
            if items.len() != before || interrupted() {
                continue;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.fill(&mut items, max_batch_size);
                break;
            }
        }

        Batch::new(items)
    }

    #[inline]
    fn fill(&self, items: &mut Vec<TelemetryItem>, max_batch_size: usize) {
        while items.len() < max_batch_size {
            match self.buffer.try_dequeue() {
                Some(item) => items.push(item),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{LogRecord, LogSeverity};

    fn log(n: u64) -> TelemetryItem {
        LogRecord::new(n, LogSeverity::Info, format!("item {}", n)).into()
    }

    fn accumulator(capacity: usize) -> BatchAccumulator {
        BatchAccumulator::new(
            Arc::new(RingBuffer::new(capacity).unwrap()),
            Arc::new(Notify::new()),
        )
    }

    #[tokio::test]
    async fn test_returns_full_batch_without_waiting() {
        let acc = accumulator(16);
        for n in 0..10 {
            acc.buffer().try_enqueue(log(n));
        }

        let batch = acc.poll(4, Duration::from_secs(3600)).await;
        assert_eq!(batch.len(), 4);
        let stamps: Vec<_> = batch.iter().map(TelemetryItem::timestamp).collect();
        assert_eq!(stamps, vec![0, 1, 2, 3]);
        assert_eq!(acc.buffer().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_partial_batch_at_deadline() {
        let acc = accumulator(16);
        acc.buffer().try_enqueue(log(1));

        let batch = acc.poll(8, Duration::from_millis(200)).await;
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_buffer_yields_empty_batch() {
        let acc = accumulator(4);
        let batch = acc.poll(4, Duration::from_millis(50)).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_wakes_on_arrival_signal() {
        let acc = Arc::new(accumulator(16));
        let producer = {
            let acc = Arc::clone(&acc);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                for n in 0..3 {
                    acc.buffer().try_enqueue(log(n));
                }
                acc.arrival.notify_one();
            })
        };

        let batch = acc.poll(3, Duration::from_secs(3600)).await;
        assert_eq!(batch.len(), 3);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_returns_early() {
        let acc = accumulator(16);
        acc.buffer().try_enqueue(log(1));
        let batch = acc
            .poll_until(8, Duration::from_secs(3600), || true)
            .await;
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_take_does_not_wait() {
        let acc = accumulator(4);
        acc.buffer().try_enqueue(log(1));
        acc.buffer().try_enqueue(log(2));
        assert_eq!(acc.take(1).len(), 1);
        assert_eq!(acc.take(10).len(), 1);
        assert!(acc.take(10).is_empty());
    }
}
