//! docstore: authoritative store for collections of scientific periodicals.
//!
//! The crate keeps journals, documents bundles and the full versioned history
//! of scholarly documents together with references to their digital assets,
//! and feeds downstream readers through an append-only change log.
//!
//! Layout follows the hexagonal split: [`domain`] holds the pure entities,
//! [`store`] the persistence ports and adapters, and [`Services`] the
//! use-case facade that orchestrates entities, stores and the change log.
//! XML and asset payloads live in an external object store; this crate keeps
//! URIs and guarantees the referential bookkeeping only.

mod config;
mod error;
mod pid;
mod services;
mod timestamp;

pub mod domain;
pub mod store;

pub use config::{load_settings, Settings};
pub use error::Error;
pub use pid::{generate as generate_pid_v3, str2uuid, uuid2str, PID_V3_LEN};
pub use services::{AssetSpec, Services};
pub use timestamp::utc_now;

pub use domain::{
    ContainerManifest, Document, DocumentManifest, DocumentsBundle, EntityKind, Event, EventKind,
    ItemRef, Journal, ResolvedVersion, Version,
};
pub use store::{
    BundleRecord, ChangeRecord, ChangesDataStore, DataStore, DocumentRecord, InMemoryChangesStore,
    InMemoryDataStore, InMemorySession, JournalRecord, Observers, Record, Retrying, Session,
    StoreError, DEFAULT_CHANGES_LIMIT,
};
