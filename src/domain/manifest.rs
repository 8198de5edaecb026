//! Manifest types: the canonical record shape of every entity.
//!
//! A manifest is only ever produced by replaying events; nothing mutates one
//! in place outside the replay path. The serialised form is the record stored
//! by the persistence adapters, keyed by `_id`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-slot URI history: `(timestamp, uri)` pairs, oldest first.
/// An empty history is a declared-but-unbound slot.
pub type SlotHistory = Vec<(String, String)>;

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}

/// A reference to another aggregate, by id only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<Vec<String>>,
}

impl ItemRef {
    pub fn new(id: impl Into<String>) -> Self {
        ItemRef {
            id: id.into(),
            ns: None,
        }
    }

    pub fn with_ns(id: impl Into<String>, ns: Vec<String>) -> Self {
        ItemRef {
            id: id.into(),
            ns: Some(ns),
        }
    }
}

/// One version of a document: the XML URI, its creation instant and the
/// declared slot set with per-slot URI histories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub data: String,
    pub timestamp: String,
    pub assets: BTreeMap<String, SlotHistory>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub renditions: BTreeMap<String, SlotHistory>,
}

impl Version {
    /// A fresh version with the given slots declared and nothing bound.
    pub(crate) fn new(
        data: &str,
        timestamp: &str,
        asset_slots: &[String],
        rendition_slots: &[String],
    ) -> Self {
        Version {
            data: data.to_string(),
            timestamp: timestamp.to_string(),
            assets: declare(asset_slots),
            renditions: declare(rendition_slots),
        }
    }

    /// True when `data` and both declared slot sets match this version.
    pub(crate) fn same_shape(
        &self,
        data: &str,
        asset_slots: &[String],
        rendition_slots: &[String],
    ) -> bool {
        self.data == data
            && same_slot_set(&self.assets, asset_slots)
            && same_slot_set(&self.renditions, rendition_slots)
    }

    /// Collapses each asset slot to its current URI; empty string when unbound.
    pub fn resolved_assets(&self) -> BTreeMap<String, String> {
        resolve(&self.assets)
    }

    /// Collapses each rendition slot to its current URI; empty string when unbound.
    pub fn resolved_renditions(&self) -> BTreeMap<String, String> {
        resolve(&self.renditions)
    }

    /// A copy of this version with every slot history truncated to entries
    /// recorded at or before `timestamp`. A slot whose entries all postdate
    /// the instant comes back empty: the asset was not yet bound.
    pub(crate) fn truncated_at(&self, timestamp: &str) -> Version {
        Version {
            data: self.data.clone(),
            timestamp: self.timestamp.clone(),
            assets: truncate(&self.assets, timestamp),
            renditions: truncate(&self.renditions, timestamp),
        }
    }
}

fn declare(slots: &[String]) -> BTreeMap<String, SlotHistory> {
    slots
        .iter()
        .map(|slot| (slot.clone(), SlotHistory::new()))
        .collect()
}

fn same_slot_set(declared: &BTreeMap<String, SlotHistory>, slots: &[String]) -> bool {
    declared.len() == slots.len() && slots.iter().all(|slot| declared.contains_key(slot))
}

fn resolve(slots: &BTreeMap<String, SlotHistory>) -> BTreeMap<String, String> {
    slots
        .iter()
        .map(|(slot, history)| {
            let current = history
                .last()
                .map(|(_, uri)| uri.clone())
                .unwrap_or_default();
            (slot.clone(), current)
        })
        .collect()
}

fn truncate(slots: &BTreeMap<String, SlotHistory>, timestamp: &str) -> BTreeMap<String, SlotHistory> {
    slots
        .iter()
        .map(|(slot, history)| {
            let kept = history
                .iter()
                .take_while(|(bound_at, _)| bound_at.as_str() <= timestamp)
                .cloned()
                .collect();
            (slot.clone(), kept)
        })
        .collect()
}

/// A version collapsed to its current URIs, for asset listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVersion {
    pub data: String,
    pub timestamp: String,
    pub assets: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub renditions: BTreeMap<String, String>,
}

impl From<&Version> for ResolvedVersion {
    fn from(version: &Version) -> Self {
        ResolvedVersion {
            data: version.data.clone(),
            timestamp: version.timestamp.clone(),
            assets: version.resolved_assets(),
            renditions: version.resolved_renditions(),
        }
    }
}

/// Manifest of a versioned document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentManifest {
    #[serde(rename = "_id")]
    pub record_id: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_v3: Option<String>,
    pub created: String,
    pub updated: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    pub versions: Vec<Version>,
}

impl DocumentManifest {
    pub(crate) fn new(id: &str, pid_v3: Option<String>, created: &str) -> Self {
        DocumentManifest {
            record_id: id.to_string(),
            id: id.to_string(),
            pid_v3,
            created: created.to_string(),
            updated: created.to_string(),
            deleted: false,
            versions: Vec::new(),
        }
    }
}

/// Manifest of a journal or documents bundle: an open metadata section plus
/// an ordered list of unique references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerManifest {
    #[serde(rename = "_id")]
    pub record_id: String,
    pub id: String,
    pub created: String,
    pub updated: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    pub items: Vec<ItemRef>,
}

impl ContainerManifest {
    pub(crate) fn new(id: &str, created: &str) -> Self {
        ContainerManifest {
            record_id: id.to_string(),
            id: id.to_string(),
            created: created.to_string(),
            updated: created.to_string(),
            deleted: false,
            metadata: BTreeMap::new(),
            items: Vec::new(),
        }
    }

    pub(crate) fn contains_item(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }
}
