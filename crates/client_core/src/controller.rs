use std::{
    collections::HashSet,
    path::Path,
    sync::{Arc, Weak},
};

use shared::{
    domain::{Item, ItemId, NewItem},
    protocol::FeedEvent,
};
use tokio::{
    sync::{broadcast, Mutex, MutexGuard},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    attachment::FileAttachment,
    error::{ErrorKind, StoreError},
    reconciler::ItemList,
    store::{FeedMessage, LiveSubscription, RemoteStore},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// User input that has not been submitted yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingInput {
    pub name: String,
    pub file: Option<FileAttachment>,
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// Snapshot of the list after a change.
    ListChanged(Vec<Item>),
    Alert { kind: ErrorKind, message: String },
    FeedClosed,
}

struct ControllerState {
    items: ItemList,
    pending: PendingInput,
    disposed: bool,
    saves_in_flight: usize,
    /// Ids the feed removed while a save was outstanding.
    removed_during_save: HashSet<ItemId>,
}

impl ControllerState {
    fn note_feed_event(&mut self, event: &FeedEvent) {
        if self.saves_in_flight == 0 {
            return;
        }
        match event {
            FeedEvent::Delete(item) | FeedEvent::Leave(item) => {
                self.removed_during_save.insert(item.id.clone());
            }
            FeedEvent::Create(item) | FeedEvent::Enter(item) => {
                self.removed_during_save.remove(&item.id);
            }
            FeedEvent::Update(_) => {}
        }
    }

    /// Ends one outstanding save; reports whether `id` was removed meanwhile.
    fn finish_save(&mut self, id: Option<&ItemId>) -> bool {
        let removed = id.is_some_and(|id| self.removed_during_save.contains(id));
        self.saves_in_flight = self.saves_in_flight.saturating_sub(1);
        if self.saves_in_flight == 0 {
            self.removed_during_save.clear();
        }
        removed
    }
}

/// Keeps an [`ItemList`] in step with the remote store and mirrors user
/// mutations back to it.
pub struct ItemListController<S: RemoteStore + 'static> {
    store: Arc<S>,
    inner: Mutex<ControllerState>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ControllerEvent>,
}

impl<S: RemoteStore + 'static> ItemListController<S> {
    pub fn new(store: Arc<S>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            store,
            inner: Mutex::new(ControllerState {
                items: ItemList::new(),
                pending: PendingInput::default(),
                disposed: false,
                saves_in_flight: 0,
                removed_during_save: HashSet::new(),
            }),
            feed_task: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn items(&self) -> Vec<Item> {
        self.inner.lock().await.items.items().to_vec()
    }

    pub async fn pending(&self) -> PendingInput {
        self.inner.lock().await.pending.clone()
    }

    pub async fn is_disposed(&self) -> bool {
        self.inner.lock().await.disposed
    }

    pub async fn set_pending_name(&self, name: impl Into<String>) -> Result<(), StoreError> {
        let mut guard = self.live_state().await?;
        guard.pending.name = name.into();
        Ok(())
    }

    pub async fn clear_attachment(&self) -> Result<(), StoreError> {
        let mut guard = self.live_state().await?;
        guard.pending.file = None;
        Ok(())
    }

    /// Fetches every item and replaces the local list. On failure the list
    /// is left as it was.
    pub async fn load_initial(&self) -> Result<usize, StoreError> {
        drop(self.live_state().await?);
        let items = match self.store.find_all().await {
            Ok(items) => items,
            Err(err) => {
                self.alert(ErrorKind::Fetch, format!("Error: {err}")).await;
                return Err(err);
            }
        };

        let mut guard = self.inner.lock().await;
        if guard.disposed {
            debug!("fetch result arrived after dispose; dropped");
            return Err(StoreError::Disposed);
        }
        guard.items.replace_all(items);
        let count = guard.items.len();
        info!(count, "successfully retrieved items");
        self.emit_list(&guard);
        Ok(count)
    }

    /// Opens the change feed and applies its events until cancelled.
    /// A previous feed, if any, is cancelled.
    pub async fn subscribe(self: &Arc<Self>) -> Result<(), StoreError> {
        drop(self.live_state().await?);
        let subscription = match self.store.subscribe().await {
            Ok(subscription) => subscription,
            Err(err) => {
                self.alert(ErrorKind::Feed, format!("live updates unavailable: {err}"))
                    .await;
                return Err(err);
            }
        };

        let mut slot = self.feed_task.lock().await;
        if self.inner.lock().await.disposed {
            debug!("subscription opened after dispose; cancelled");
            return Err(StoreError::Disposed);
        }
        let task = tokio::spawn(run_feed(Arc::downgrade(self), subscription));
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Saves the pending input as a new item.
    pub async fn submit_add(&self) -> Result<Item, StoreError> {
        let pending = self.live_state().await?.pending.clone();
        self.persist(pending).await
    }

    pub async fn submit_add_with(
        &self,
        name: impl Into<String>,
        file: Option<FileAttachment>,
    ) -> Result<Item, StoreError> {
        let pending = {
            let mut guard = self.live_state().await?;
            guard.pending = PendingInput {
                name: name.into(),
                file,
            };
            guard.pending.clone()
        };
        self.persist(pending).await
    }

    /// Destroys the item remotely and drops it locally once confirmed.
    /// On failure the local list is not touched.
    pub async fn submit_delete(&self, id: &ItemId) -> Result<(), StoreError> {
        drop(self.live_state().await?);
        if let Err(err) = self.store.destroy_item(id).await {
            warn!(%id, %err, "failed deleting object");
            self.alert(
                ErrorKind::Mutation,
                format!("Failed deleting object {id}: {err}"),
            )
            .await;
            return Err(err);
        }

        let mut guard = self.inner.lock().await;
        if guard.disposed {
            debug!(%id, "delete confirmed after dispose; dropped");
            return Ok(());
        }
        info!(%id, "deleted object");
        if guard.items.remove(id).is_change() {
            self.emit_list(&guard);
        }
        Ok(())
    }

    /// Encodes `bytes` and keeps them as the pending attachment.
    pub async fn attach_file(
        &self,
        name: impl Into<String>,
        bytes: &[u8],
    ) -> Result<FileAttachment, StoreError> {
        let attachment = FileAttachment::from_bytes(name, bytes);
        let mut guard = self.live_state().await?;
        guard.pending.file = Some(attachment.clone());
        Ok(attachment)
    }

    pub async fn attach_path(&self, path: &Path) -> Result<FileAttachment, StoreError> {
        let attachment = match FileAttachment::read_from_path(path).await {
            Ok(attachment) => attachment,
            Err(err) => {
                error!(path = %path.display(), %err, "file attach aborted");
                return Err(err);
            }
        };
        info!(path = %path.display(), name = %attachment.name, "user selected file");
        let mut guard = self.live_state().await?;
        guard.pending.file = Some(attachment.clone());
        Ok(attachment)
    }

    /// Cancels the feed; later results never reach the list.
    pub async fn dispose(&self) {
        let mut slot = self.feed_task.lock().await;
        self.inner.lock().await.disposed = true;
        if let Some(task) = slot.take() {
            task.abort();
        }
        debug!("item list disposed");
    }

    async fn persist(&self, pending: PendingInput) -> Result<Item, StoreError> {
        self.inner.lock().await.saves_in_flight += 1;
        let saved = self.save(&pending).await;

        let mut guard = self.inner.lock().await;
        let removed_remotely = guard.finish_save(saved.as_ref().ok().map(|item| &item.id));
        let item = match saved {
            Ok(item) => item,
            Err(err) => {
                drop(guard);
                self.alert(
                    ErrorKind::Mutation,
                    format!("Failed to create new object, with error code: {err}"),
                )
                .await;
                return Err(err);
            }
        };

        if guard.disposed {
            debug!(id = %item.id, "add confirmed after dispose; dropped");
            return Ok(item);
        }
        if guard.pending == pending {
            guard.pending = PendingInput::default();
        }
        if removed_remotely {
            debug!(id = %item.id, "item deleted remotely before save confirmed; not re-added");
            return Ok(item);
        }
        info!(id = %item.id, "item added");
        guard.items.upsert(item.clone());
        self.emit_list(&guard);
        Ok(item)
    }

    async fn save(&self, pending: &PendingInput) -> Result<Item, StoreError> {
        let file = match &pending.file {
            Some(attachment) => Some(self.store.upload_file(attachment).await?),
            None => None,
        };
        self.store
            .save_item(NewItem {
                name: pending.name.clone(),
                file,
            })
            .await
    }

    async fn apply_feed_message(&self, message: FeedMessage) {
        let event = match message {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "live query error");
                self.alert(ErrorKind::Feed, err.to_string()).await;
                return;
            }
        };

        let mut guard = self.inner.lock().await;
        if guard.disposed {
            return;
        }
        guard.note_feed_event(&event);
        let kind = event.kind().as_str();
        let id = event.item().id.clone();
        let change = guard.items.apply(event);
        debug!(kind, %id, ?change, "applied feed event");
        if change.is_change() {
            self.emit_list(&guard);
        }
    }

    async fn live_state(&self) -> Result<MutexGuard<'_, ControllerState>, StoreError> {
        let guard = self.inner.lock().await;
        if guard.disposed {
            return Err(StoreError::Disposed);
        }
        Ok(guard)
    }

    fn emit_list(&self, state: &ControllerState) {
        let _ = self
            .events
            .send(ControllerEvent::ListChanged(state.items.items().to_vec()));
    }

    async fn alert(&self, kind: ErrorKind, message: String) {
        if self.inner.lock().await.disposed {
            debug!(kind = kind.as_str(), %message, "alert after dispose suppressed");
            return;
        }
        let _ = self.events.send(ControllerEvent::Alert { kind, message });
    }
}

impl<S: RemoteStore + 'static> Drop for ItemListController<S> {
    fn drop(&mut self) {
        if let Some(task) = self.feed_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn run_feed<S: RemoteStore + 'static>(
    controller: Weak<ItemListController<S>>,
    mut subscription: LiveSubscription,
) {
    while let Some(message) = subscription.next().await {
        let Some(controller) = controller.upgrade() else {
            break;
        };
        controller.apply_feed_message(message).await;
    }
    if let Some(controller) = controller.upgrade() {
        let _ = controller.events.send(ControllerEvent::FeedClosed);
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
