//! Insert notifications.
//!
//! Stores publish every successfully inserted [`Record`] on an
//! [`InsertFeed`]. Consumers call [`RecordStore::subscribe`] to get a
//! [`Subscription`] scoped to one collection and end it explicitly with
//! [`Subscription::unsubscribe`].
//!
//! [`RecordStore::subscribe`]: crate::store::RecordStore::subscribe

use futures::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

use crate::models::Collection;
use crate::store::Record;

pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Broadcast channel of inserted records, shared by a store and its subscribers.
#[derive(Clone)]
pub struct InsertFeed {
    sender: broadcast::Sender<Record>,
}

impl InsertFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an inserted record. Having no subscribers is not an error.
    pub fn publish(&self, record: &Record) {
        let _ = self.sender.send(record.clone());
    }

    pub fn subscribe(&self, collection: Collection) -> Subscription {
        Subscription {
            collection,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InsertFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// Live view of inserts into one collection.
pub struct Subscription {
    collection: Collection,
    receiver: broadcast::Receiver<Record>,
}

impl Subscription {
    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Wait for the next insert into this collection.
    ///
    /// Returns `None` once the feed is closed. A subscriber that falls
    /// behind skips the inserts it missed.
    pub async fn recv(&mut self) -> Option<Record> {
        loop {
            match self.receiver.recv().await {
                Ok(record) if record.collection == self.collection => return Some(record),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(collection = %self.collection, skipped, "subscription lagged behind insert feed");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Record> {
        loop {
            match self.receiver.try_recv() {
                Ok(record) if record.collection == self.collection => return Some(record),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(collection = %self.collection, skipped, "subscription lagged behind insert feed");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Turn the subscription into a stream of inserted records.
    pub fn into_stream(self) -> impl Stream<Item = Record> + Send {
        stream::unfold(self, |mut sub| async move {
            let record = sub.recv().await?;
            Some((record, sub))
        })
    }

    /// Stop receiving inserts.
    pub fn unsubscribe(self) {}
}
