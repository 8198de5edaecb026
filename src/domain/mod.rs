//! Domain entities: journals, documents bundles and versioned documents.
//!
//! Entities are pure state machines. Mutators validate against the current
//! manifest and append events to the in-memory history; nothing in this
//! module touches a store. Persistence is orchestrated by the services.

mod bundle;
mod container;
mod document;
mod event;
mod journal;
mod manifest;

pub use bundle::DocumentsBundle;
pub use document::Document;
pub use event::{EntityKind, Event, EventKind};
pub use journal::Journal;
pub use manifest::{
    ContainerManifest, DocumentManifest, ItemRef, ResolvedVersion, SlotHistory, Version,
};

pub(crate) use manifest::is_false;
