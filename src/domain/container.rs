//! Shared replay core for the two reference containers (journal, bundle).
//!
//! A container is a manifest plus the ordered history that produced it. The
//! split between `history` and `committed` mirrors the persistence contract:
//! everything before `committed` is already stored, everything after is
//! awaiting the next store write.

use serde_json::Value;

use crate::error::Error;

use super::event::{EntityKind, Event, EventKind};
use super::manifest::{ContainerManifest, ItemRef};

#[derive(Debug, Clone)]
pub(crate) struct Container {
    kind: EntityKind,
    manifest: ContainerManifest,
    history: Vec<Event>,
    committed: usize,
}

impl Container {
    pub(crate) fn create(kind: EntityKind, id: &str, timestamp: &str) -> Result<Self, Error> {
        if id.trim().is_empty() {
            return Err(Error::Validation("entity id must not be empty".to_string()));
        }
        let created = Event {
            entity: kind,
            id: id.to_string(),
            timestamp: timestamp.to_string(),
            kind: EventKind::Created { pid_v3: None },
        };
        Ok(Container {
            kind,
            manifest: ContainerManifest::new(id, timestamp),
            history: vec![created],
            committed: 0,
        })
    }

    /// Rebuilds a container by replaying an ordered history. The first event
    /// must be the `Created` event for this kind.
    pub(crate) fn from_history(kind: EntityKind, events: Vec<Event>) -> Result<Self, Error> {
        let first = events.first().ok_or_else(|| {
            Error::Validation("cannot reconstruct an entity from an empty history".to_string())
        })?;
        if first.entity != kind || !matches!(first.kind, EventKind::Created { .. }) {
            return Err(Error::Validation(format!(
                "history of \"{}\" must start with a {} creation event",
                first.id, kind
            )));
        }

        let mut container = Container {
            kind,
            manifest: ContainerManifest::new(&first.id, &first.timestamp),
            history: Vec::new(),
            committed: 0,
        };
        for event in &events[1..] {
            container.apply(event)?;
        }
        container.history = events;
        container.committed = container.history.len();
        Ok(container)
    }

    /// Reconstruction from a stored record: the manifest is the materialised
    /// snapshot, the history rides along for diffing.
    pub(crate) fn from_record(
        kind: EntityKind,
        manifest: ContainerManifest,
        history: Vec<Event>,
    ) -> Self {
        let committed = history.len();
        Container {
            kind,
            manifest,
            history,
            committed,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.manifest.id
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.manifest.deleted
    }

    pub(crate) fn manifest(&self) -> &ContainerManifest {
        &self.manifest
    }

    pub(crate) fn history(&self) -> &[Event] {
        &self.history
    }

    /// Events appended since the last store write.
    pub(crate) fn new_events(&self) -> &[Event] {
        &self.history[self.committed..]
    }

    pub(crate) fn mark_committed(&mut self) {
        self.committed = self.history.len();
    }

    pub(crate) fn add_item(&mut self, item: ItemRef, timestamp: &str) -> Result<(), Error> {
        self.guard_live()?;
        if self.manifest.contains_item(&item.id) {
            return Err(Error::DuplicateReference { id: item.id });
        }
        self.digest(EventKind::ItemAdded { item }, timestamp)
    }

    pub(crate) fn insert_item(
        &mut self,
        index: usize,
        item: ItemRef,
        timestamp: &str,
    ) -> Result<(), Error> {
        self.guard_live()?;
        if self.manifest.contains_item(&item.id) {
            return Err(Error::DuplicateReference { id: item.id });
        }
        self.digest(EventKind::ItemInserted { index, item }, timestamp)
    }

    pub(crate) fn remove_item(&mut self, id: &str, timestamp: &str) -> Result<(), Error> {
        self.guard_live()?;
        if !self.manifest.contains_item(id) {
            return Err(Error::UnknownReference { id: id.to_string() });
        }
        self.digest(
            EventKind::ItemRemoved {
                item_id: id.to_string(),
            },
            timestamp,
        )
    }

    /// Sets a metadata field. Re-setting the current value appends nothing.
    pub(crate) fn set_metadata(
        &mut self,
        name: &str,
        value: Value,
        timestamp: &str,
    ) -> Result<(), Error> {
        self.guard_live()?;
        if self.manifest.metadata.get(name) == Some(&value) {
            return Ok(());
        }
        self.digest(
            EventKind::MetadataSet {
                name: name.to_string(),
                value,
            },
            timestamp,
        )
    }

    pub(crate) fn delete(&mut self, timestamp: &str) -> Result<(), Error> {
        self.guard_live()?;
        self.digest(EventKind::Deleted, timestamp)
    }

    fn guard_live(&self) -> Result<(), Error> {
        if self.manifest.deleted {
            Err(Error::AlreadyDeleted {
                id: self.manifest.id.clone(),
            })
        } else {
            Ok(())
        }
    }

    fn digest(&mut self, kind: EventKind, timestamp: &str) -> Result<(), Error> {
        let event = Event {
            entity: self.kind,
            id: self.manifest.id.clone(),
            timestamp: timestamp.to_string(),
            kind,
        };
        self.apply(&event)?;
        self.history.push(event);
        Ok(())
    }

    fn apply(&mut self, event: &Event) -> Result<(), Error> {
        if event.entity != self.kind || event.id != self.manifest.id {
            return Err(Error::Validation(format!(
                "event for {} \"{}\" does not belong to {} \"{}\"",
                event.entity, event.id, self.kind, self.manifest.id
            )));
        }
        match &event.kind {
            EventKind::MetadataSet { name, value } => {
                self.manifest.metadata.insert(name.clone(), value.clone());
            }
            EventKind::ItemAdded { item } => {
                self.manifest.items.push(item.clone());
            }
            EventKind::ItemInserted { index, item } => {
                let at = (*index).min(self.manifest.items.len());
                self.manifest.items.insert(at, item.clone());
            }
            EventKind::ItemRemoved { item_id } => {
                self.manifest.items.retain(|item| item.id != *item_id);
            }
            EventKind::Deleted => {
                self.manifest.deleted = true;
            }
            other => {
                return Err(Error::Validation(format!(
                    "event {:?} cannot be applied to a {}",
                    other, self.kind
                )));
            }
        }
        self.manifest.updated = event.timestamp.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: &str = "2018-08-05T22:33:49.795151Z";
    const T1: &str = "2018-08-05T23:02:29.392990Z";
    const T2: &str = "2018-08-05T23:30:29.392990Z";

    fn bundle() -> Container {
        Container::create(EntityKind::DocumentsBundle, "0034-8910-rsp-48-2", T0).unwrap()
    }

    #[test]
    fn create_seeds_history_with_created() {
        let container = bundle();
        assert_eq!(container.history().len(), 1);
        assert!(matches!(
            container.history()[0].kind,
            EventKind::Created { .. }
        ));
        assert_eq!(container.manifest().created, T0);
        assert_eq!(container.manifest().updated, T0);
        assert_eq!(container.new_events().len(), 1);
    }

    #[test]
    fn create_rejects_empty_id() {
        assert!(matches!(
            Container::create(EntityKind::Journal, "  ", T0),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn add_item_appends_in_order() {
        let mut container = bundle();
        container.add_item(ItemRef::new("/document/1"), T1).unwrap();
        container.add_item(ItemRef::new("/document/2"), T1).unwrap();
        let ids: Vec<&str> = container
            .manifest()
            .items
            .iter()
            .map(|item| item.id.as_str())
            .collect();
        assert_eq!(ids, vec!["/document/1", "/document/2"]);
        assert_eq!(container.manifest().updated, T1);
    }

    #[test]
    fn add_item_rejects_duplicates() {
        let mut container = bundle();
        container.add_item(ItemRef::new("/document/1"), T1).unwrap();
        let err = container
            .add_item(ItemRef::with_ns("/document/1", vec!["2019".into()]), T1)
            .unwrap_err();
        assert_eq!(
            err,
            Error::DuplicateReference {
                id: "/document/1".to_string()
            }
        );
        assert_eq!(container.manifest().items.len(), 1);
    }

    #[test]
    fn insert_item_clamps_out_of_range_indexes() {
        let mut container = bundle();
        container.add_item(ItemRef::new("/document/1"), T1).unwrap();
        container
            .insert_item(0, ItemRef::new("/document/0"), T1)
            .unwrap();
        container
            .insert_item(99, ItemRef::new("/document/9"), T1)
            .unwrap();
        let ids: Vec<&str> = container
            .manifest()
            .items
            .iter()
            .map(|item| item.id.as_str())
            .collect();
        assert_eq!(ids, vec!["/document/0", "/document/1", "/document/9"]);
    }

    #[test]
    fn remove_item_requires_presence() {
        let mut container = bundle();
        assert_eq!(
            container.remove_item("/document/1", T1).unwrap_err(),
            Error::UnknownReference {
                id: "/document/1".to_string()
            }
        );
        container.add_item(ItemRef::new("/document/1"), T1).unwrap();
        container.remove_item("/document/1", T2).unwrap();
        assert!(container.manifest().items.is_empty());
    }

    #[test]
    fn set_metadata_is_a_noop_for_equal_values() {
        let mut container = bundle();
        container
            .set_metadata("publication_year", serde_json::json!("2018"), T1)
            .unwrap();
        let before = container.history().len();
        container
            .set_metadata("publication_year", serde_json::json!("2018"), T2)
            .unwrap();
        assert_eq!(container.history().len(), before);
        assert_eq!(container.manifest().updated, T1);
    }

    #[test]
    fn delete_is_terminal() {
        let mut container = bundle();
        container.delete(T1).unwrap();
        assert!(container.is_deleted());
        assert!(matches!(
            container.delete(T2),
            Err(Error::AlreadyDeleted { .. })
        ));
        assert!(matches!(
            container.add_item(ItemRef::new("/document/1"), T2),
            Err(Error::AlreadyDeleted { .. })
        ));
    }

    #[test]
    fn replay_reproduces_the_manifest() {
        let mut container = bundle();
        container
            .set_metadata("volume", serde_json::json!("2"), T1)
            .unwrap();
        container.add_item(ItemRef::new("/document/1"), T1).unwrap();
        container
            .insert_item(0, ItemRef::new("/document/0"), T2)
            .unwrap();

        let replayed = Container::from_history(
            EntityKind::DocumentsBundle,
            container.history().to_vec(),
        )
        .unwrap();
        assert_eq!(replayed.manifest(), container.manifest());
        assert!(replayed.new_events().is_empty());
    }

    #[test]
    fn from_history_rejects_foreign_histories() {
        let container = bundle();
        assert!(Container::from_history(EntityKind::Journal, container.history().to_vec())
            .is_err());
        assert!(Container::from_history(EntityKind::DocumentsBundle, Vec::new()).is_err());
    }

    #[test]
    fn mark_committed_resets_new_events() {
        let mut container = bundle();
        container.add_item(ItemRef::new("/document/1"), T1).unwrap();
        assert_eq!(container.new_events().len(), 2);
        container.mark_committed();
        assert!(container.new_events().is_empty());
        container.add_item(ItemRef::new("/document/2"), T2).unwrap();
        assert_eq!(container.new_events().len(), 1);
    }
}
