//! Local view of the remote item collection.
//!
//! Holds at most one entry per [`ItemId`]. Initial load keeps the store's
//! order, new items are appended, updates replace in place and deletes
//! remove by id.

use shared::{
    domain::{Item, ItemId},
    protocol::FeedEvent,
};
use tracing::debug;

/// Effect of applying one change to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    Inserted,
    Replaced,
    Removed(usize),
    Unchanged,
}

impl ListChange {
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Unchanged | Self::Removed(0))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemList {
    items: Vec<Item>,
}

impl ItemList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.get(id).is_some()
    }

    /// Replaces the whole list with a fetch result, in the store's order.
    pub fn replace_all(&mut self, items: Vec<Item>) {
        self.items.clear();
        for item in items {
            self.upsert(item);
        }
    }

    /// Inserts at the end when absent, replaces in place when present.
    pub fn upsert(&mut self, item: Item) -> ListChange {
        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => {
                *existing = item;
                ListChange::Replaced
            }
            None => {
                self.items.push(item);
                ListChange::Inserted
            }
        }
    }

    /// Replaces the entry with the same id; unknown ids are ignored.
    pub fn update(&mut self, item: Item) -> ListChange {
        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => {
                *existing = item;
                ListChange::Replaced
            }
            None => {
                debug!(id = %item.id, "update for unknown item ignored");
                ListChange::Unchanged
            }
        }
    }

    pub fn remove(&mut self, id: &ItemId) -> ListChange {
        let before = self.items.len();
        self.items.retain(|item| &item.id != id);
        let removed = before - self.items.len();
        if removed == 0 {
            debug!(%id, "delete for unknown item ignored");
        }
        ListChange::Removed(removed)
    }

    pub fn apply(&mut self, event: FeedEvent) -> ListChange {
        match event {
            FeedEvent::Create(item) | FeedEvent::Enter(item) => self.upsert(item),
            FeedEvent::Update(item) => self.update(item),
            FeedEvent::Delete(item) | FeedEvent::Leave(item) => self.remove(&item.id),
        }
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
