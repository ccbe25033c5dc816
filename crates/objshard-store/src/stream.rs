//! Lazy, bounded object sequences produced by listings.
//!
//! An [`ObjectStream`] is the receiving half of a bounded channel. The
//! producing half, [`ObjectSender`], blocks while the channel is full, so a
//! slow consumer throttles the producer instead of growing a buffer. Dropping
//! the stream cancels its token, which every producer observes at each of its
//! suspension points.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{StoreError, StoreResult};
use crate::object::ObjectInfo;

/// Item carried by listing streams. An `Err` item is always the last one.
pub type ListItem = StoreResult<ObjectInfo>;

/// Sending half of an [`ObjectStream`].
#[derive(Clone)]
pub struct ObjectSender {
    tx: mpsc::Sender<ListItem>,
    cancel: CancellationToken,
}

impl ObjectSender {
    /// Push one item, waiting while the channel is full.
    ///
    /// Returns `false` once the consumer is gone or the listing was cancelled;
    /// the producer should stop.
    pub async fn send(&self, item: ListItem) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            res = self.tx.send(item) => res.is_ok(),
        }
    }

    /// End the stream with `Err(Cancelled)` so the consumer can tell a
    /// cut-short listing from a complete one.
    ///
    /// Waits for room in the channel; does nothing once the stream is dropped.
    pub async fn finish_cancelled(&self) {
        if !self.tx.is_closed() {
            let _ = self.tx.send(Err(StoreError::Cancelled)).await;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Receiving half: an ordered sequence of objects, possibly ending in an error.
pub struct ObjectStream {
    rx: mpsc::Receiver<ListItem>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl ObjectStream {
    /// Create a bounded stream whose producers observe `cancel`.
    pub fn channel(capacity: usize, cancel: CancellationToken) -> (ObjectSender, ObjectStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let guard = cancel.clone().drop_guard();
        let sender = ObjectSender {
            tx,
            cancel: cancel.clone(),
        };
        let stream = ObjectStream {
            rx,
            cancel,
            _guard: guard,
        };
        (sender, stream)
    }

    /// A finished stream over already-listed objects.
    pub fn from_vec(items: Vec<ObjectInfo>) -> ObjectStream {
        Self::from_items(items.into_iter().map(Ok).collect())
    }

    /// A finished stream over arbitrary items, errors included.
    pub fn from_items(items: Vec<ListItem>) -> ObjectStream {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            // Capacity equals the item count, so this never fails.
            let _ = tx.try_send(item);
        }
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        ObjectStream {
            rx,
            cancel,
            _guard: guard,
        }
    }

    /// Receive the next item, or `None` once the producer has finished.
    pub async fn next(&mut self) -> Option<ListItem> {
        self.rx.recv().await
    }

    /// Drain the stream, stopping at the first error.
    pub async fn try_collect(mut self) -> StoreResult<Vec<ObjectInfo>> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            out.push(item?);
        }
        Ok(out)
    }

    /// Abandon the listing. Producers stop at their next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Stream for ObjectStream {
    type Item = ListItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
