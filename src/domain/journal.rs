//! The journal aggregate: open metadata plus an ordered list of bundle
//! references.

use serde_json::Value;

use crate::error::Error;

use super::container::Container;
use super::event::{EntityKind, Event};
use super::manifest::{ContainerManifest, ItemRef};

#[derive(Debug, Clone)]
pub struct Journal {
    inner: Container,
}

impl Journal {
    pub fn create(id: &str, timestamp: &str) -> Result<Self, Error> {
        Ok(Journal {
            inner: Container::create(EntityKind::Journal, id, timestamp)?,
        })
    }

    pub fn from_history(events: Vec<Event>) -> Result<Self, Error> {
        Ok(Journal {
            inner: Container::from_history(EntityKind::Journal, events)?,
        })
    }

    pub(crate) fn from_record(manifest: ContainerManifest, history: Vec<Event>) -> Self {
        Journal {
            inner: Container::from_record(EntityKind::Journal, manifest, history),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.is_deleted()
    }

    pub fn manifest(&self) -> &ContainerManifest {
        self.inner.manifest()
    }

    pub fn history(&self) -> &[Event] {
        self.inner.history()
    }

    pub fn new_events(&self) -> &[Event] {
        self.inner.new_events()
    }

    pub fn mark_committed(&mut self) {
        self.inner.mark_committed()
    }

    /// Appends a bundle reference. Duplicate ids are refused.
    pub fn add_item(&mut self, item: ItemRef, timestamp: &str) -> Result<(), Error> {
        self.inner.add_item(item, timestamp)
    }

    pub fn insert_item(&mut self, index: usize, item: ItemRef, timestamp: &str) -> Result<(), Error> {
        self.inner.insert_item(index, item, timestamp)
    }

    pub fn remove_item(&mut self, id: &str, timestamp: &str) -> Result<(), Error> {
        self.inner.remove_item(id, timestamp)
    }

    pub fn set_metadata(&mut self, name: &str, value: Value, timestamp: &str) -> Result<(), Error> {
        self.inner.set_metadata(name, value, timestamp)
    }

    pub fn delete(&mut self, timestamp: &str) -> Result<(), Error> {
        self.inner.delete(timestamp)
    }
}
