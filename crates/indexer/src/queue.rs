//! Bounded FIFO queues between pipeline stages.
//!
//! A queue is a tokio `mpsc` channel whose receiver is shared behind an async
//! mutex, so several workers can pull from the same queue. The mutex is fair,
//! which keeps delivery FIFO across consumers. The queue closes once every
//! sender is dropped and the buffered items are drained.

use crate::error::{IndexerError, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct QueueShared {
    name: String,
    capacity: usize,
    put: AtomicU64,
    got: AtomicU64,
}

/// Create a queue holding at most `capacity` items (at least one).
pub fn bounded<T>(name: impl Into<String>, capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let shared = Arc::new(QueueShared {
        name: name.into(),
        capacity,
        put: AtomicU64::new(0),
        got: AtomicU64::new(0),
    });
    (
        QueueSender {
            tx,
            shared: Arc::clone(&shared),
        },
        QueueReceiver {
            rx: Arc::new(TokioMutex::new(rx)),
            shared,
        },
    )
}

pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    shared: Arc<QueueShared>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> QueueSender<T> {
    /// Wait for room and enqueue `item`.
    ///
    /// Fails with `Cancelled` if `cancel` fires first, or `QueueClosed` when
    /// every receiver is gone. Either way the item is dropped.
    pub async fn send(&self, item: T, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(IndexerError::Cancelled),
            sent = self.tx.send(item) => {
                sent.map_err(|_| IndexerError::QueueClosed(self.shared.name.clone()))?;
                self.shared.put.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn metrics(&self) -> QueueMetricsHandle {
        QueueMetricsHandle(Arc::clone(&self.shared))
    }
}

pub struct QueueReceiver<T> {
    rx: Arc<TokioMutex<mpsc::Receiver<T>>>,
    shared: Arc<QueueShared>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> QueueReceiver<T> {
    /// Next item in FIFO order; `None` once the queue is closed and empty.
    pub async fn recv(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        let item = rx.recv().await;
        if item.is_some() {
            self.shared.got.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Like [`recv`](Self::recv) but gives up when `cancel` fires.
    pub async fn recv_cancellable(&self, cancel: &CancellationToken) -> Result<Option<T>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(IndexerError::Cancelled),
            item = self.recv() => Ok(item),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn metrics(&self) -> QueueMetricsHandle {
        QueueMetricsHandle(Arc::clone(&self.shared))
    }
}

/// Read-only view of a queue's counters. Does not keep the queue open.
#[derive(Debug, Clone)]
pub struct QueueMetricsHandle(Arc<QueueShared>);

impl QueueMetricsHandle {
    #[must_use]
    pub fn snapshot(&self) -> QueueMetrics {
        let put = self.0.put.load(Ordering::Relaxed);
        let got = self.0.got.load(Ordering::Relaxed);
        QueueMetrics {
            name: self.0.name.clone(),
            capacity: self.0.capacity,
            depth: put.saturating_sub(got),
            put_count: put,
            get_count: got,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    pub name: String,
    pub capacity: usize,
    pub depth: u64,
    pub put_count: u64,
    pub get_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_and_close_on_sender_drop() {
        let cancel = CancellationToken::new();
        let (tx, rx) = bounded("q", 8);
        for i in 0..5 {
            tx.send(i, &cancel).await.unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(item) = rx.recv().await {
            seen.push(item);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        let metrics = rx.metrics().snapshot();
        assert_eq!(metrics.put_count, 5);
        assert_eq!(metrics.get_count, 5);
        assert_eq!(metrics.depth, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_applies_backpressure() {
        let cancel = CancellationToken::new();
        let (tx, rx) = bounded("q", 1);
        tx.send(1, &cancel).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(2, &cancel)).await;
        assert!(blocked.is_err(), "send must wait while the queue is full");

        assert_eq!(rx.recv().await, Some(1));
        tx.send(3, &cancel).await.unwrap();
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn cancellation_unblocks_send_and_recv() {
        let cancel = CancellationToken::new();
        let (tx, rx) = bounded::<u32>("q", 1);
        tx.send(1, &cancel).await.unwrap();

        let pending = {
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { tx.send(2, &cancel).await })
        };
        cancel.cancel();
        assert!(matches!(pending.await.unwrap(), Err(IndexerError::Cancelled)));

        let (_keep_open, empty_rx) = bounded::<u32>("empty", 1);
        assert!(matches!(
            empty_rx.recv_cancellable(&cancel).await,
            Err(IndexerError::Cancelled)
        ));
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn send_to_closed_queue_fails() {
        let (tx, rx) = bounded::<u32>("closed", 1);
        drop(rx);
        let err = tx.send(1, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, IndexerError::QueueClosed(name) if name == "closed"));
    }

    #[tokio::test]
    async fn multiple_consumers_share_items() {
        let cancel = CancellationToken::new();
        let (tx, rx) = bounded("q", 64);
        for i in 0..40u32 {
            tx.send(i, &cancel).await.unwrap();
        }
        drop(tx);

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    let mut got = Vec::new();
                    while let Some(item) = rx.recv().await {
                        got.push(item);
                    }
                    got
                })
            })
            .collect();

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..40).collect::<Vec<_>>());
    }
}
