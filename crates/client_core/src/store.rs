//! Seam between the item list and the remote store.

use async_trait::async_trait;
use shared::{
    domain::{FileRef, Item, ItemId, NewItem},
    protocol::FeedEvent,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{attachment::FileAttachment, error::StoreError};

/// Capacity of the channel between a feed task and its consumer.
pub const FEED_CHANNEL_CAPACITY: usize = 256;

pub type FeedMessage = Result<FeedEvent, StoreError>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn find_all(&self) -> Result<Vec<Item>, StoreError>;
    async fn save_item(&self, item: NewItem) -> Result<Item, StoreError>;
    async fn destroy_item(&self, id: &ItemId) -> Result<(), StoreError>;
    async fn upload_file(&self, file: &FileAttachment) -> Result<FileRef, StoreError>;
    async fn subscribe(&self) -> Result<LiveSubscription, StoreError>;
}

/// Handle to a running change feed.
///
/// Dropping the handle or calling [`LiveSubscription::cancel`] stops the
/// background task feeding it. A task started with a shutdown signal is asked
/// to release the subscription on the server and exits on its own.
pub struct LiveSubscription {
    events: mpsc::Receiver<FeedMessage>,
    task: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
    cancelled: bool,
}

impl LiveSubscription {
    pub fn new(
        events: mpsc::Receiver<FeedMessage>,
        task: JoinHandle<()>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            task: Some(task),
            shutdown: Some(shutdown),
            cancelled: false,
        }
    }

    /// Feed driven directly by the sender side, with no task to own.
    pub fn from_channel(events: mpsc::Receiver<FeedMessage>) -> Self {
        Self {
            events,
            task: None,
            shutdown: None,
            cancelled: false,
        }
    }

    /// Next feed message; `None` once the feed has ended or was cancelled.
    pub async fn next(&mut self) -> Option<FeedMessage> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) {
        let signalled = self
            .shutdown
            .take()
            .is_some_and(|shutdown| shutdown.send(()).is_ok());
        if let Some(task) = self.task.take() {
            if !signalled {
                task.abort();
            }
        }
        self.events.close();
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
