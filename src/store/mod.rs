//! Persistence ports and the session that bundles them.
//!
//! Entities and services depend only on these traits; concrete adapters are
//! supplied at session construction. Records are single JSON documents keyed
//! by `_id`: the manifest fields at the top level plus the event history.

mod in_memory;
mod retry;

use std::fmt;
use std::sync::Mutex;

use event_emitter_rs::EventEmitter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{
    is_false, ContainerManifest, Document, DocumentManifest, DocumentsBundle, EntityKind, Event,
    Journal,
};

pub use in_memory::{InMemoryChangesStore, InMemoryDataStore, InMemorySession};
pub use retry::{Retrying, DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_RETRIES};

/// Default page size of the change feed.
pub const DEFAULT_CHANGES_LIMIT: usize = 500;

/// Errors raised by persistence adapters.
///
/// `Transient` marks failures worth retrying (timeouts, partitions);
/// everything else is permanent and bypasses the retry budget.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    AlreadyExists {
        collection: &'static str,
        id: String,
    },
    NotFound {
        collection: &'static str,
        id: String,
    },
    /// Recoverable backend failure; safe to retry without touching state.
    Transient(String),
    /// The retry budget ran out; `last` is the final transient failure.
    Exhausted {
        attempts: u32,
        last: String,
    },
    Serialization(String),
    Storage(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::AlreadyExists { collection, id } => write!(
                f,
                "cannot add data to {} with id \"{}\": the id is already in use",
                collection, id
            ),
            StoreError::NotFound { collection, id } => write!(
                f,
                "cannot find data in {} with id \"{}\"",
                collection, id
            ),
            StoreError::Transient(reason) => write!(f, "transient backend failure: {}", reason),
            StoreError::Exhausted { attempts, last } => write!(
                f,
                "backend still failing after {} attempts: {}",
                attempts, last
            ),
            StoreError::Serialization(reason) => write!(f, "serialization failure: {}", reason),
            StoreError::Storage(reason) => write!(f, "storage failure: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

/// A persistable record: one JSON document per entity, keyed by id.
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Backing collection name.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    /// Alternative identifiers that must resolve to this record. The adapter
    /// keeps them as a native secondary key.
    fn aliases(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Capability set of a per-entity store.
pub trait DataStore<R: Record>: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` when the id is taken.
    fn add(&self, record: &R) -> Result<(), StoreError>;

    /// Replace an existing record wholesale (last writer wins).
    fn update(&self, record: &R) -> Result<(), StoreError>;

    fn fetch(&self, id: &str) -> Result<R, StoreError>;

    /// Hard-remove a record. Domain deletion keeps the record and flips its
    /// `deleted` flag; this is for operator tooling only.
    fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// An append-only change entry: a latest-state pointer, not a full event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub timestamp: String,
    pub entity: EntityKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

/// Capability set of the change log.
pub trait ChangesDataStore: Send + Sync {
    /// Append one change. The timestamp is the primary key; duplicates are
    /// `AlreadyExists`.
    fn add(&self, change: ChangeRecord) -> Result<(), StoreError>;

    /// Entries with `timestamp > since`, ascending, at most `limit`.
    fn filter(&self, since: Option<&str>, limit: usize) -> Result<Vec<ChangeRecord>, StoreError>;
}

/// Stored form of a document: manifest snapshot plus event history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(flatten)]
    pub manifest: DocumentManifest,
    pub events: Vec<Event>,
}

impl DocumentRecord {
    pub fn from_entity(document: &Document) -> Self {
        DocumentRecord {
            manifest: document.manifest().clone(),
            events: document.history().to_vec(),
        }
    }

    pub fn into_entity(self) -> Document {
        Document::from_record(self.manifest, self.events)
    }
}

impl Record for DocumentRecord {
    const COLLECTION: &'static str = "documents";

    fn id(&self) -> &str {
        &self.manifest.id
    }

    fn aliases(&self) -> Vec<String> {
        match &self.manifest.pid_v3 {
            Some(pid) if pid != &self.manifest.id => vec![pid.clone()],
            _ => Vec::new(),
        }
    }
}

/// Stored form of a journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    #[serde(flatten)]
    pub manifest: ContainerManifest,
    pub events: Vec<Event>,
}

impl JournalRecord {
    pub fn from_entity(journal: &Journal) -> Self {
        JournalRecord {
            manifest: journal.manifest().clone(),
            events: journal.history().to_vec(),
        }
    }

    pub fn into_entity(self) -> Journal {
        Journal::from_record(self.manifest, self.events)
    }
}

impl Record for JournalRecord {
    const COLLECTION: &'static str = "journals";

    fn id(&self) -> &str {
        &self.manifest.id
    }
}

/// Stored form of a documents bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRecord {
    #[serde(flatten)]
    pub manifest: ContainerManifest,
    pub events: Vec<Event>,
}

impl BundleRecord {
    pub fn from_entity(bundle: &DocumentsBundle) -> Self {
        BundleRecord {
            manifest: bundle.manifest().clone(),
            events: bundle.history().to_vec(),
        }
    }

    pub fn into_entity(self) -> DocumentsBundle {
        DocumentsBundle::from_record(self.manifest, self.events)
    }
}

impl Record for BundleRecord {
    const COLLECTION: &'static str = "documents_bundles";

    fn id(&self) -> &str {
        &self.manifest.id
    }
}

/// Per-session observer registry, notified after every successful commit.
/// Topics are entity kind strings; payloads are serialised change records.
pub struct Observers {
    emitter: Mutex<EventEmitter>,
}

impl Observers {
    pub fn new() -> Self {
        Observers {
            emitter: Mutex::new(EventEmitter::new()),
        }
    }

    /// Register a handler for a topic.
    pub fn on<F>(&self, topic: &str, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        if let Ok(mut emitter) = self.emitter.lock() {
            emitter.on(topic, handler);
        }
    }

    /// Notify every handler registered for `topic`.
    pub fn notify(&self, topic: &str, payload: String) {
        if let Ok(mut emitter) = self.emitter.lock() {
            emitter.emit(topic, payload);
        }
    }
}

impl Default for Observers {
    fn default() -> Self {
        Self::new()
    }
}

/// Access points to the per-entity stores, the change log and the observer
/// registry. Services receive a session and never see adapter types.
pub trait Session {
    fn documents(&self) -> &dyn DataStore<DocumentRecord>;
    fn documents_bundles(&self) -> &dyn DataStore<BundleRecord>;
    fn journals(&self) -> &dyn DataStore<JournalRecord>;
    fn changes(&self) -> &dyn ChangesDataStore;
    fn observers(&self) -> &Observers;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_record_flattens_the_manifest() {
        let document = Document::create(
            "0034-8910-rsp-48-2-0347",
            Some("kpmwraDbRpj6hZbBGGW6rzb".to_string()),
            "2018-08-05T23:02:29.392990Z",
        )
        .unwrap();
        let record = DocumentRecord::from_entity(&document);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["_id"], "0034-8910-rsp-48-2-0347");
        assert_eq!(value["id"], "0034-8910-rsp-48-2-0347");
        assert_eq!(value["events"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn document_record_aliases_its_pid() {
        let document = Document::create(
            "0034-8910-rsp-48-2-0347",
            Some("kpmwraDbRpj6hZbBGGW6rzb".to_string()),
            "2018-08-05T23:02:29.392990Z",
        )
        .unwrap();
        let record = DocumentRecord::from_entity(&document);
        assert_eq!(record.aliases(), vec!["kpmwraDbRpj6hZbBGGW6rzb".to_string()]);
    }

    #[test]
    fn pid_equal_to_id_needs_no_alias() {
        let document = Document::create(
            "kpmwraDbRpj6hZbBGGW6rzb",
            Some("kpmwraDbRpj6hZbBGGW6rzb".to_string()),
            "2018-08-05T23:02:29.392990Z",
        )
        .unwrap();
        assert!(DocumentRecord::from_entity(&document).aliases().is_empty());
    }

    #[test]
    fn change_record_omits_deleted_when_false() {
        let change = ChangeRecord {
            timestamp: "2018-08-05T23:02:29.392990Z".to_string(),
            entity: EntityKind::Document,
            id: "doc-1".to_string(),
            deleted: false,
        };
        let value = serde_json::to_value(&change).unwrap();
        assert!(value.get("deleted").is_none());
        assert_eq!(value["entity"], "document");
    }

    #[test]
    fn observers_deliver_to_registered_handlers() {
        use std::sync::{Arc, Mutex};

        let observers = Observers::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        observers.on("document", move |payload: String| {
            sink.lock().unwrap().push(payload);
        });

        observers.notify("document", "{\"id\":\"doc-1\"}".to_string());
        observers.notify("journal", "{\"id\":\"j-1\"}".to_string());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), ["{\"id\":\"doc-1\"}"]);
    }
}
