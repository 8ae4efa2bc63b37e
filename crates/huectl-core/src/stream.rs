// ── Cache subscriptions ──
//
// A subscriber sees the whole collection of one resource type after each
// cache mutation (snapshot, event partial, optimistic write or rollback).
// Intermediate states may be skipped; the last one is always delivered.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// All cached resources of one type, as last published by the cache.
pub type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// Change feed for one resource collection of a [`ResourceCache`](crate::ResourceCache).
pub struct ResourceStream<T> {
    receiver: watch::Receiver<Snapshot<T>>,
}

impl<T: Send + Sync + 'static> ResourceStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot<T>>) -> Self {
        Self { receiver }
    }

    /// The collection as it is now. Does not count as seen for
    /// [`changed`](Self::changed).
    pub fn snapshot(&self) -> Snapshot<T> {
        Arc::clone(&self.receiver.borrow())
    }

    /// Wait until the collection changes after the last call. `None` once
    /// the cache is gone.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.receiver.changed().await.ok()?;
        Some(Arc::clone(&self.receiver.borrow_and_update()))
    }

    /// Every future snapshot as a `Stream`, starting with the current one.
    pub fn into_stream(self) -> WatchStream<Snapshot<T>> {
        WatchStream::new(self.receiver)
    }
}

impl<T> std::fmt::Debug for ResourceStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStream")
            .field("resources", &self.receiver.borrow().len())
            .finish()
    }
}
