//! In-memory adapters: the reference implementation of the persistence ports.
//!
//! Records are stored as serialised JSON bytes per collection, the same shape
//! a document-oriented backend would hold, so the serde round-trip is part of
//! every read and write. Tests substitute these adapters for the backend.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::{
    BundleRecord, ChangeRecord, ChangesDataStore, DataStore, DocumentRecord, JournalRecord,
    Observers, Record, Session, StoreError,
};

/// HashMap-backed store for one collection. Clone-friendly via `Arc`.
pub struct InMemoryDataStore<R> {
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    aliases: Arc<RwLock<HashMap<String, String>>>,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Clone for InMemoryDataStore<R> {
    fn clone(&self) -> Self {
        InMemoryDataStore {
            records: self.records.clone(),
            aliases: self.aliases.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R> Default for InMemoryDataStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> InMemoryDataStore<R> {
    pub fn new() -> Self {
        InMemoryDataStore {
            records: Arc::new(RwLock::new(HashMap::new())),
            aliases: Arc::new(RwLock::new(HashMap::new())),
            _marker: PhantomData,
        }
    }
}

impl<R: Record> InMemoryDataStore<R> {
    fn encode(record: &R) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(record).map_err(|err| StoreError::Serialization(err.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<R, StoreError> {
        serde_json::from_slice(bytes).map_err(|err| StoreError::Serialization(err.to_string()))
    }

    fn record_aliases(&self, record: &R) -> Result<(), StoreError> {
        let aliases = record.aliases();
        if aliases.is_empty() {
            return Ok(());
        }
        let mut map = self
            .aliases
            .write()
            .map_err(|_| StoreError::Storage("alias lock poisoned".to_string()))?;
        for alias in aliases {
            map.insert(alias, record.id().to_string());
        }
        Ok(())
    }

    fn resolve(&self, id: &str) -> Result<Option<String>, StoreError> {
        let map = self
            .aliases
            .read()
            .map_err(|_| StoreError::Storage("alias lock poisoned".to_string()))?;
        Ok(map.get(id).cloned())
    }
}

impl<R: Record> DataStore<R> for InMemoryDataStore<R> {
    fn add(&self, record: &R) -> Result<(), StoreError> {
        let bytes = Self::encode(record)?;
        {
            let mut records = self
                .records
                .write()
                .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
            if records.contains_key(record.id()) {
                return Err(StoreError::AlreadyExists {
                    collection: R::COLLECTION,
                    id: record.id().to_string(),
                });
            }
            records.insert(record.id().to_string(), bytes);
        }
        self.record_aliases(record)?;
        debug!(collection = R::COLLECTION, id = record.id(), "record added");
        Ok(())
    }

    fn update(&self, record: &R) -> Result<(), StoreError> {
        let bytes = Self::encode(record)?;
        {
            let mut records = self
                .records
                .write()
                .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
            if !records.contains_key(record.id()) {
                return Err(StoreError::NotFound {
                    collection: R::COLLECTION,
                    id: record.id().to_string(),
                });
            }
            records.insert(record.id().to_string(), bytes);
        }
        self.record_aliases(record)?;
        debug!(collection = R::COLLECTION, id = record.id(), "record replaced");
        Ok(())
    }

    fn fetch(&self, id: &str) -> Result<R, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        if let Some(bytes) = records.get(id) {
            return Self::decode(bytes);
        }
        drop(records);

        if let Some(primary) = self.resolve(id)? {
            let records = self
                .records
                .read()
                .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
            if let Some(bytes) = records.get(&primary) {
                return Self::decode(bytes);
            }
        }
        Err(StoreError::NotFound {
            collection: R::COLLECTION,
            id: id.to_string(),
        })
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        if records.remove(id).is_none() {
            return Err(StoreError::NotFound {
                collection: R::COLLECTION,
                id: id.to_string(),
            });
        }
        drop(records);
        let mut aliases = self
            .aliases
            .write()
            .map_err(|_| StoreError::Storage("alias lock poisoned".to_string()))?;
        aliases.retain(|_, primary| primary != id);
        Ok(())
    }
}

/// Ordered change log keyed by timestamp.
#[derive(Clone, Default)]
pub struct InMemoryChangesStore {
    changes: Arc<RwLock<BTreeMap<String, ChangeRecord>>>,
}

impl InMemoryChangesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChangesDataStore for InMemoryChangesStore {
    fn add(&self, change: ChangeRecord) -> Result<(), StoreError> {
        let mut changes = self
            .changes
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        if changes.contains_key(&change.timestamp) {
            return Err(StoreError::AlreadyExists {
                collection: "changes",
                id: change.timestamp,
            });
        }
        changes.insert(change.timestamp.clone(), change);
        Ok(())
    }

    fn filter(&self, since: Option<&str>, limit: usize) -> Result<Vec<ChangeRecord>, StoreError> {
        let changes = self
            .changes
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;
        let entries = match since {
            Some(since) => changes
                .range::<str, _>((Excluded(since), Unbounded))
                .map(|(_, change)| change.clone())
                .take(limit)
                .collect(),
            None => changes.values().cloned().take(limit).collect(),
        };
        Ok(entries)
    }
}

/// A session over the in-memory adapters.
pub struct InMemorySession {
    documents: InMemoryDataStore<DocumentRecord>,
    documents_bundles: InMemoryDataStore<BundleRecord>,
    journals: InMemoryDataStore<JournalRecord>,
    changes: InMemoryChangesStore,
    observers: Observers,
}

impl InMemorySession {
    pub fn new() -> Self {
        InMemorySession {
            documents: InMemoryDataStore::new(),
            documents_bundles: InMemoryDataStore::new(),
            journals: InMemoryDataStore::new(),
            changes: InMemoryChangesStore::new(),
            observers: Observers::new(),
        }
    }
}

impl Default for InMemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for InMemorySession {
    fn documents(&self) -> &dyn DataStore<DocumentRecord> {
        &self.documents
    }

    fn documents_bundles(&self) -> &dyn DataStore<BundleRecord> {
        &self.documents_bundles
    }

    fn journals(&self) -> &dyn DataStore<JournalRecord> {
        &self.journals
    }

    fn changes(&self) -> &dyn ChangesDataStore {
        &self.changes
    }

    fn observers(&self) -> &Observers {
        &self.observers
    }
}

#[cfg(test)]
mod tests {
    use super::super::DEFAULT_CHANGES_LIMIT;
    use super::*;
    use crate::domain::{Document, EntityKind};

    const T0: &str = "2018-08-05T22:33:49.795151Z";

    fn record(id: &str, pid: Option<&str>) -> DocumentRecord {
        let document = Document::create(id, pid.map(str::to_string), T0).unwrap();
        DocumentRecord::from_entity(&document)
    }

    fn change(timestamp: &str, id: &str) -> ChangeRecord {
        ChangeRecord {
            timestamp: timestamp.to_string(),
            entity: EntityKind::Document,
            id: id.to_string(),
            deleted: false,
        }
    }

    #[test]
    fn add_then_fetch_round_trips() {
        let store = InMemoryDataStore::<DocumentRecord>::new();
        let record = record("doc-1", None);
        store.add(&record).unwrap();
        assert_eq!(store.fetch("doc-1").unwrap(), record);
    }

    #[test]
    fn add_twice_is_already_exists() {
        let store = InMemoryDataStore::<DocumentRecord>::new();
        store.add(&record("doc-1", None)).unwrap();
        assert!(matches!(
            store.add(&record("doc-1", None)),
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn update_requires_existence() {
        let store = InMemoryDataStore::<DocumentRecord>::new();
        assert!(matches!(
            store.update(&record("doc-1", None)),
            Err(StoreError::NotFound { .. })
        ));
        store.add(&record("doc-1", None)).unwrap();
        store.update(&record("doc-1", None)).unwrap();
    }

    #[test]
    fn fetch_resolves_pid_aliases() {
        let store = InMemoryDataStore::<DocumentRecord>::new();
        store
            .add(&record("doc-1", Some("kpmwraDbRpj6hZbBGGW6rzb")))
            .unwrap();
        let by_id = store.fetch("doc-1").unwrap();
        let by_pid = store.fetch("kpmwraDbRpj6hZbBGGW6rzb").unwrap();
        assert_eq!(by_id, by_pid);
    }

    #[test]
    fn delete_removes_record_and_aliases() {
        let store = InMemoryDataStore::<DocumentRecord>::new();
        store
            .add(&record("doc-1", Some("kpmwraDbRpj6hZbBGGW6rzb")))
            .unwrap();
        store.delete("doc-1").unwrap();
        assert!(matches!(
            store.fetch("doc-1"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.fetch("kpmwraDbRpj6hZbBGGW6rzb"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete("doc-1"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn changes_are_ordered_by_timestamp() {
        let store = InMemoryChangesStore::new();
        store.add(change("2018-08-05T23:30:29.392990Z", "b")).unwrap();
        store.add(change("2018-08-05T23:02:29.392990Z", "a")).unwrap();
        store.add(change("2018-08-06T09:30:23.431397Z", "c")).unwrap();

        let all = store.filter(None, DEFAULT_CHANGES_LIMIT).unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn since_is_exclusive_and_limit_caps() {
        let store = InMemoryChangesStore::new();
        store.add(change("2018-08-05T23:02:29.392990Z", "a")).unwrap();
        store.add(change("2018-08-05T23:30:29.392990Z", "b")).unwrap();
        store.add(change("2018-08-06T09:30:23.431397Z", "c")).unwrap();

        let page = store
            .filter(Some("2018-08-05T23:02:29.392990Z"), 1)
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "b");

        // paginate by repeating with since = last returned timestamp
        let page = store.filter(Some(&page[0].timestamp), 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "c");
    }

    #[test]
    fn duplicate_timestamps_are_refused() {
        let store = InMemoryChangesStore::new();
        store.add(change("2018-08-05T23:02:29.392990Z", "a")).unwrap();
        assert!(matches!(
            store.add(change("2018-08-05T23:02:29.392990Z", "b")),
            Err(StoreError::AlreadyExists { .. })
        ));
    }
}
