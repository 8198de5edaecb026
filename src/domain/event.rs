//! Domain events: the unit of entity history.
//!
//! Every mutator on an entity appends exactly one event; replaying an ordered
//! history from its `Created` event reproduces the entity's manifest. Events
//! are never rewritten.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::manifest::ItemRef;

/// The three aggregate kinds managed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Journal,
    DocumentsBundle,
    Document,
}

impl EntityKind {
    /// Name of the backing collection for this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Journal => "journals",
            EntityKind::DocumentsBundle => "documents_bundles",
            EntityKind::Document => "documents",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Journal => write!(f, "journal"),
            EntityKind::DocumentsBundle => write!(f, "documents_bundle"),
            EntityKind::Document => write!(f, "document"),
        }
    }
}

/// A single entry in an entity's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub entity: EntityKind,
    pub id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// What happened, with the payload needed to replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Created {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pid_v3: Option<String>,
    },
    MetadataSet {
        name: String,
        value: Value,
    },
    ItemAdded {
        item: ItemRef,
    },
    ItemInserted {
        index: usize,
        item: ItemRef,
    },
    ItemRemoved {
        item_id: String,
    },
    VersionAdded {
        data: String,
        assets: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        renditions: Vec<String>,
    },
    AssetVersionAdded {
        slot: String,
        uri: String,
    },
    RenditionVersionAdded {
        slot: String,
        uri: String,
    },
    Deleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_a_flat_kind_tag() {
        let event = Event {
            entity: EntityKind::Document,
            id: "0034-8910-rsp-48-2-0347".to_string(),
            timestamp: "2018-08-05T23:02:29.392990Z".to_string(),
            kind: EventKind::AssetVersionAdded {
                slot: "0034-8910-rsp-48-2-0347-gf01.jpg".to_string(),
                uri: "/rawfiles/1234/gf01.jpg".to_string(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["entity"], "document");
        assert_eq!(value["kind"], "asset_version_added");
        assert_eq!(value["slot"], "0034-8910-rsp-48-2-0347-gf01.jpg");
    }

    #[test]
    fn events_round_trip_through_json() {
        let event = Event {
            entity: EntityKind::Journal,
            id: "1678-4596-cr".to_string(),
            timestamp: "2018-08-05T23:02:29.392990Z".to_string(),
            kind: EventKind::ItemAdded {
                item: ItemRef::with_ns("issue-42", vec!["2019".into(), "v21".into()]),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn item_removed_keeps_entity_and_item_ids_apart() {
        let event = Event {
            entity: EntityKind::DocumentsBundle,
            id: "0034-8910-rsp-48-2".to_string(),
            timestamp: "2018-08-05T23:30:29.392990Z".to_string(),
            kind: EventKind::ItemRemoved {
                item_id: "/document/1".to_string(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["id"], "0034-8910-rsp-48-2");
        assert_eq!(value["item_id"], "/document/1");
        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn created_omits_absent_pid() {
        let value = serde_json::to_value(EventKind::Created { pid_v3: None }).unwrap();
        assert!(value.get("pid_v3").is_none());
    }

    #[test]
    fn kind_collections() {
        assert_eq!(EntityKind::Document.collection(), "documents");
        assert_eq!(EntityKind::DocumentsBundle.collection(), "documents_bundles");
        assert_eq!(EntityKind::Journal.collection(), "journals");
    }
}
