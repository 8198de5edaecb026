//! Application services: the use-case facade over a session.
//!
//! Every write follows the same sequence: fetch the current record,
//! reconstruct the entity, apply mutators, write the record, append to the
//! change log, notify observers. The change-log append deliberately comes
//! after the entity write; when it fails the entity write stays in place and
//! the failure surfaces as `ChangeLogAppendFailed` for an operator to replay.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::{
    ContainerManifest, Document, DocumentManifest, DocumentsBundle, EntityKind, Event, ItemRef,
    Journal, ResolvedVersion,
};
use crate::error::Error;
use crate::pid;
use crate::store::{
    BundleRecord, ChangeRecord, DocumentRecord, JournalRecord, Session, StoreError,
    DEFAULT_CHANGES_LIMIT,
};
use crate::timestamp;

/// How often a change-log append is re-stamped when two commits land on the
/// same microsecond.
const CHANGE_STAMP_ATTEMPTS: u32 = 8;

/// An asset or rendition slot to declare, with an optional URI to bind.
/// An empty URI declares the slot and leaves it unbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub id: String,
    pub uri: String,
}

impl AssetSpec {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        AssetSpec {
            id: id.into(),
            uri: uri.into(),
        }
    }
}

/// The use-case facade. One instance per session.
pub struct Services<S: Session> {
    session: S,
}

impl<S: Session> Services<S> {
    pub fn new(session: S) -> Self {
        Services { session }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    // ------------------------------------------------------------------
    // documents
    // ------------------------------------------------------------------

    /// Registers a new document under `id`, with its first version and the
    /// declared asset/rendition slots. A fresh v3 PID is generated and kept
    /// as the document's second identifier.
    pub fn register_document(
        &self,
        id: &str,
        data_uri: &str,
        assets: &[AssetSpec],
        renditions: &[AssetSpec],
    ) -> Result<(), Error> {
        guard_uri(data_uri)?;
        let mut document = Document::create(id, Some(pid::generate()), &timestamp::utc_now())?;
        let asset_slots = slot_names(assets);
        let rendition_slots = slot_names(renditions);
        document.new_version(
            data_uri,
            &asset_slots,
            &rendition_slots,
            &timestamp::utc_now(),
        )?;
        bind_specs(&mut document, assets, renditions)?;

        self.session
            .documents()
            .add(&DocumentRecord::from_entity(&document))?;
        debug!(id, "document registered");
        self.append_change(EntityKind::Document, id, false)
    }

    /// Registers a new version of an already-registered document. Appending
    /// a version identical to the current latest one is a no-op.
    pub fn register_document_version(
        &self,
        id: &str,
        data_uri: &str,
        assets: &[AssetSpec],
        renditions: &[AssetSpec],
    ) -> Result<(), Error> {
        guard_uri(data_uri)?;
        let mut document = self.fetch_document(id)?;
        let asset_slots = slot_names(assets);
        let rendition_slots = slot_names(renditions);
        match document.new_version(
            data_uri,
            &asset_slots,
            &rendition_slots,
            &timestamp::utc_now(),
        ) {
            Err(Error::VersionAlreadyExists { .. }) => return Ok(()),
            result => result?,
        }
        bind_specs(&mut document, assets, renditions)?;

        self.session
            .documents()
            .update(&DocumentRecord::from_entity(&document))?;
        self.append_change(EntityKind::Document, id, false)
    }

    /// Binds `uri` into an asset slot of the document's latest version.
    /// Re-binding the URI the slot already resolves to is a no-op.
    pub fn register_asset_version(
        &self,
        doc_id: &str,
        slot: &str,
        uri: &str,
    ) -> Result<(), Error> {
        guard_uri(uri)?;
        let mut document = self.fetch_document(doc_id)?;
        match document.new_asset_version(slot, uri, &timestamp::utc_now()) {
            Err(Error::AssetAlreadyBound { .. }) => return Ok(()),
            result => result?,
        }
        self.session
            .documents()
            .update(&DocumentRecord::from_entity(&document))?;
        self.append_change(EntityKind::Document, doc_id, false)
    }

    /// Same as [`Self::register_asset_version`], for rendition slots.
    pub fn register_rendition_version(
        &self,
        doc_id: &str,
        slot: &str,
        uri: &str,
    ) -> Result<(), Error> {
        guard_uri(uri)?;
        let mut document = self.fetch_document(doc_id)?;
        match document.new_rendition_version(slot, uri, &timestamp::utc_now()) {
            Err(Error::AssetAlreadyBound { .. }) => return Ok(()),
            result => result?,
        }
        self.session
            .documents()
            .update(&DocumentRecord::from_entity(&document))?;
        self.append_change(EntityKind::Document, doc_id, false)
    }

    /// Marks a document as deleted. Its history stays readable and the id
    /// can never be reused.
    pub fn delete_document(&self, id: &str) -> Result<(), Error> {
        let mut document = self.fetch_document(id)?;
        document.delete(&timestamp::utc_now())?;
        self.session
            .documents()
            .update(&DocumentRecord::from_entity(&document))?;
        self.append_change(EntityKind::Document, id, true)
    }

    pub fn fetch_document_manifest(&self, id: &str) -> Result<DocumentManifest, Error> {
        Ok(self.session.documents().fetch(id)?.manifest)
    }

    /// The data URI of the requested version. `version_at` takes precedence
    /// over `version_index`.
    pub fn fetch_document_data(
        &self,
        id: &str,
        version_index: Option<usize>,
        version_at: Option<&str>,
    ) -> Result<String, Error> {
        let document = self.fetch_document(id)?;
        Ok(document.resolved_version(version_index, version_at)?.data)
    }

    /// The requested version with each slot collapsed to its current URI.
    pub fn fetch_assets_list(
        &self,
        id: &str,
        version_index: Option<usize>,
        version_at: Option<&str>,
    ) -> Result<ResolvedVersion, Error> {
        let document = self.fetch_document(id)?;
        document.resolved_version(version_index, version_at)
    }

    // ------------------------------------------------------------------
    // documents bundles
    // ------------------------------------------------------------------

    pub fn create_documents_bundle(
        &self,
        id: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Result<(), Error> {
        let now = timestamp::utc_now();
        let mut bundle = DocumentsBundle::create(id, &now)?;
        for (name, value) in metadata {
            bundle.set_metadata(&name, value, &now)?;
        }
        self.session
            .documents_bundles()
            .add(&BundleRecord::from_entity(&bundle))?;
        self.append_change(EntityKind::DocumentsBundle, id, false)
    }

    pub fn fetch_documents_bundle_manifest(&self, id: &str) -> Result<ContainerManifest, Error> {
        Ok(self.session.documents_bundles().fetch(id)?.manifest)
    }

    /// Sets metadata fields on a bundle. Unchanged values append nothing;
    /// when nothing changes, nothing is written.
    pub fn update_documents_bundle_metadata(
        &self,
        id: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Result<(), Error> {
        let mut bundle = self.fetch_documents_bundle(id)?;
        for (name, value) in metadata {
            bundle.set_metadata(&name, value, &timestamp::utc_now())?;
        }
        if bundle.new_events().is_empty() {
            return Ok(());
        }
        self.session
            .documents_bundles()
            .update(&BundleRecord::from_entity(&bundle))?;
        self.append_change(EntityKind::DocumentsBundle, id, false)
    }

    pub fn delete_documents_bundle(&self, id: &str) -> Result<(), Error> {
        let mut bundle = self.fetch_documents_bundle(id)?;
        bundle.delete(&timestamp::utc_now())?;
        self.session
            .documents_bundles()
            .update(&BundleRecord::from_entity(&bundle))?;
        self.append_change(EntityKind::DocumentsBundle, id, true)
    }

    /// Appends a document reference to a bundle. The document must currently
    /// exist; re-adding an id already present is a no-op.
    pub fn add_document_to_documents_bundle(
        &self,
        bundle_id: &str,
        doc_id: &str,
        ns: Option<Vec<String>>,
    ) -> Result<(), Error> {
        let mut bundle = self.fetch_documents_bundle(bundle_id)?;
        self.guard_document_reference(doc_id)?;
        match bundle.add_item(item(doc_id, ns), &timestamp::utc_now()) {
            Err(Error::DuplicateReference { .. }) => return Ok(()),
            result => result?,
        }
        self.session
            .documents_bundles()
            .update(&BundleRecord::from_entity(&bundle))?;
        self.append_change(EntityKind::DocumentsBundle, bundle_id, false)
    }

    /// Inserts a document reference at `index` (clamped to the list length).
    pub fn insert_document_to_documents_bundle(
        &self,
        bundle_id: &str,
        index: usize,
        doc_id: &str,
        ns: Option<Vec<String>>,
    ) -> Result<(), Error> {
        let mut bundle = self.fetch_documents_bundle(bundle_id)?;
        self.guard_document_reference(doc_id)?;
        match bundle.insert_item(index, item(doc_id, ns), &timestamp::utc_now()) {
            Err(Error::DuplicateReference { .. }) => return Ok(()),
            result => result?,
        }
        self.session
            .documents_bundles()
            .update(&BundleRecord::from_entity(&bundle))?;
        self.append_change(EntityKind::DocumentsBundle, bundle_id, false)
    }

    /// Event-list diff of a bundle's stored history: the slice `[from, to)`.
    pub fn diff_documents_bundle_versions(
        &self,
        id: &str,
        from: Option<usize>,
        to: Option<usize>,
    ) -> Result<Vec<Event>, Error> {
        let record = self.session.documents_bundles().fetch(id)?;
        diff_events(&record.events, from, to)
    }

    // ------------------------------------------------------------------
    // journals
    // ------------------------------------------------------------------

    pub fn create_journal(&self, id: &str, metadata: BTreeMap<String, Value>) -> Result<(), Error> {
        let now = timestamp::utc_now();
        let mut journal = Journal::create(id, &now)?;
        for (name, value) in metadata {
            journal.set_metadata(&name, value, &now)?;
        }
        self.session
            .journals()
            .add(&JournalRecord::from_entity(&journal))?;
        self.append_change(EntityKind::Journal, id, false)
    }

    pub fn fetch_journal_manifest(&self, id: &str) -> Result<ContainerManifest, Error> {
        Ok(self.session.journals().fetch(id)?.manifest)
    }

    pub fn update_journal_metadata(
        &self,
        id: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Result<(), Error> {
        let mut journal = self.fetch_journal(id)?;
        for (name, value) in metadata {
            journal.set_metadata(&name, value, &timestamp::utc_now())?;
        }
        if journal.new_events().is_empty() {
            return Ok(());
        }
        self.session
            .journals()
            .update(&JournalRecord::from_entity(&journal))?;
        self.append_change(EntityKind::Journal, id, false)
    }

    pub fn delete_journal(&self, id: &str) -> Result<(), Error> {
        let mut journal = self.fetch_journal(id)?;
        journal.delete(&timestamp::utc_now())?;
        self.session
            .journals()
            .update(&JournalRecord::from_entity(&journal))?;
        self.append_change(EntityKind::Journal, id, true)
    }

    /// Appends a bundle reference to a journal. The bundle must currently
    /// exist; re-adding an id already present is a no-op.
    pub fn add_documents_bundle_to_journal(
        &self,
        journal_id: &str,
        bundle_id: &str,
        ns: Option<Vec<String>>,
    ) -> Result<(), Error> {
        let mut journal = self.fetch_journal(journal_id)?;
        self.guard_bundle_reference(bundle_id)?;
        match journal.add_item(item(bundle_id, ns), &timestamp::utc_now()) {
            Err(Error::DuplicateReference { .. }) => return Ok(()),
            result => result?,
        }
        self.session
            .journals()
            .update(&JournalRecord::from_entity(&journal))?;
        self.append_change(EntityKind::Journal, journal_id, false)
    }

    /// Event-list diff of a journal's stored history: the slice `[from, to)`.
    pub fn diff_journal_versions(
        &self,
        id: &str,
        from: Option<usize>,
        to: Option<usize>,
    ) -> Result<Vec<Event>, Error> {
        let record = self.session.journals().fetch(id)?;
        diff_events(&record.events, from, to)
    }

    // ------------------------------------------------------------------
    // change feed
    // ------------------------------------------------------------------

    /// Entries with `timestamp > since`, ascending. Paginate by repeating
    /// with `since` set to the last returned timestamp.
    pub fn fetch_changes(
        &self,
        since: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ChangeRecord>, Error> {
        let limit = limit.unwrap_or(DEFAULT_CHANGES_LIMIT);
        Ok(self.session.changes().filter(since, limit)?)
    }

    // ------------------------------------------------------------------
    // plumbing
    // ------------------------------------------------------------------

    fn fetch_document(&self, id: &str) -> Result<Document, Error> {
        Ok(self.session.documents().fetch(id)?.into_entity())
    }

    fn fetch_documents_bundle(&self, id: &str) -> Result<DocumentsBundle, Error> {
        Ok(self.session.documents_bundles().fetch(id)?.into_entity())
    }

    fn fetch_journal(&self, id: &str) -> Result<Journal, Error> {
        Ok(self.session.journals().fetch(id)?.into_entity())
    }

    fn guard_document_reference(&self, doc_id: &str) -> Result<(), Error> {
        match self.session.documents().fetch(doc_id) {
            Ok(record) if !record.manifest.deleted => Ok(()),
            Ok(_) | Err(StoreError::NotFound { .. }) => Err(Error::UnknownReference {
                id: doc_id.to_string(),
            }),
            Err(other) => Err(other.into()),
        }
    }

    fn guard_bundle_reference(&self, bundle_id: &str) -> Result<(), Error> {
        match self.session.documents_bundles().fetch(bundle_id) {
            Ok(record) if !record.manifest.deleted => Ok(()),
            Ok(_) | Err(StoreError::NotFound { .. }) => Err(Error::UnknownReference {
                id: bundle_id.to_string(),
            }),
            Err(other) => Err(other.into()),
        }
    }

    /// Appends to the change log and notifies observers. Two commits landing
    /// on the same microsecond collide on the timestamp key; the append is
    /// re-stamped with a fresh instant a bounded number of times.
    fn append_change(&self, entity: EntityKind, id: &str, deleted: bool) -> Result<(), Error> {
        let mut last = None;
        for _ in 0..CHANGE_STAMP_ATTEMPTS {
            let change = ChangeRecord {
                timestamp: timestamp::utc_now(),
                entity,
                id: id.to_string(),
                deleted,
            };
            match self.session.changes().add(change.clone()) {
                Ok(()) => {
                    if let Ok(payload) = serde_json::to_string(&change) {
                        self.session.observers().notify(&entity.to_string(), payload);
                    }
                    return Ok(());
                }
                Err(err @ StoreError::AlreadyExists { .. }) => {
                    thread::sleep(Duration::from_micros(1));
                    last = Some(err);
                }
                Err(other) => return Err(Error::ChangeLogAppendFailed(other)),
            }
        }
        Err(Error::ChangeLogAppendFailed(last.unwrap_or_else(|| {
            StoreError::Storage("change log append never attempted".to_string())
        })))
    }
}

fn guard_uri(uri: &str) -> Result<(), Error> {
    if uri.trim().is_empty() {
        Err(Error::Validation("uri must not be empty".to_string()))
    } else {
        Ok(())
    }
}

fn slot_names(specs: &[AssetSpec]) -> Vec<String> {
    specs.iter().map(|spec| spec.id.clone()).collect()
}

fn item(id: &str, ns: Option<Vec<String>>) -> ItemRef {
    match ns {
        Some(ns) => ItemRef::with_ns(id, ns),
        None => ItemRef::new(id),
    }
}

/// Binds the URIs supplied alongside slot declarations. Empty URIs leave the
/// slot declared but unbound; duplicate specs for the same URI are harmless.
fn bind_specs(
    document: &mut Document,
    assets: &[AssetSpec],
    renditions: &[AssetSpec],
) -> Result<(), Error> {
    for spec in assets {
        if spec.uri.is_empty() {
            continue;
        }
        match document.new_asset_version(&spec.id, &spec.uri, &timestamp::utc_now()) {
            Err(Error::AssetAlreadyBound { .. }) => {}
            result => result?,
        }
    }
    for spec in renditions {
        if spec.uri.is_empty() {
            continue;
        }
        match document.new_rendition_version(&spec.id, &spec.uri, &timestamp::utc_now()) {
            Err(Error::AssetAlreadyBound { .. }) => {}
            result => result?,
        }
    }
    Ok(())
}

fn diff_events(events: &[Event], from: Option<usize>, to: Option<usize>) -> Result<Vec<Event>, Error> {
    let from = from.unwrap_or(0);
    let to = to.unwrap_or(events.len());
    if from > to || to > events.len() {
        return Err(Error::Validation(format!(
            "invalid diff range: {}..{} over {} events",
            from,
            to,
            events.len()
        )));
    }
    Ok(events[from..to].to_vec())
}
