//! The versioned document aggregate.
//!
//! A document is an append-only list of versions. Each version declares its
//! asset and rendition slots at creation time; binding URIs into slots only
//! ever touches the latest version, and appending a later version freezes
//! everything before it.

use crate::error::Error;

use super::event::{EntityKind, Event, EventKind};
use super::manifest::{DocumentManifest, ResolvedVersion, Version};

#[derive(Debug, Clone)]
pub struct Document {
    manifest: DocumentManifest,
    history: Vec<Event>,
    committed: usize,
}

impl Document {
    /// A brand-new document. `pid_v3` is the generated second identifier;
    /// documents migrated from legacy systems keep their natural key as `id`.
    pub fn create(id: &str, pid_v3: Option<String>, timestamp: &str) -> Result<Self, Error> {
        if id.trim().is_empty() {
            return Err(Error::Validation("document id must not be empty".to_string()));
        }
        let created = Event {
            entity: EntityKind::Document,
            id: id.to_string(),
            timestamp: timestamp.to_string(),
            kind: EventKind::Created {
                pid_v3: pid_v3.clone(),
            },
        };
        Ok(Document {
            manifest: DocumentManifest::new(id, pid_v3, timestamp),
            history: vec![created],
            committed: 0,
        })
    }

    /// Rebuilds a document by replaying an ordered history.
    pub fn from_history(events: Vec<Event>) -> Result<Self, Error> {
        let first = events.first().ok_or_else(|| {
            Error::Validation("cannot reconstruct a document from an empty history".to_string())
        })?;
        let pid_v3 = match (&first.entity, &first.kind) {
            (EntityKind::Document, EventKind::Created { pid_v3 }) => pid_v3.clone(),
            _ => {
                return Err(Error::Validation(format!(
                    "history of \"{}\" must start with a document creation event",
                    first.id
                )))
            }
        };

        let mut document = Document {
            manifest: DocumentManifest::new(&first.id, pid_v3, &first.timestamp),
            history: Vec::new(),
            committed: 0,
        };
        for event in &events[1..] {
            document.apply(event)?;
        }
        document.history = events;
        document.committed = document.history.len();
        Ok(document)
    }

    /// Reconstruction from a stored record: manifest snapshot plus history.
    pub(crate) fn from_record(manifest: DocumentManifest, history: Vec<Event>) -> Self {
        let committed = history.len();
        Document {
            manifest,
            history,
            committed,
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn pid_v3(&self) -> Option<&str> {
        self.manifest.pid_v3.as_deref()
    }

    pub fn is_deleted(&self) -> bool {
        self.manifest.deleted
    }

    pub fn manifest(&self) -> &DocumentManifest {
        &self.manifest
    }

    pub fn history(&self) -> &[Event] {
        &self.history
    }

    /// Events appended since the last store write.
    pub fn new_events(&self) -> &[Event] {
        &self.history[self.committed..]
    }

    pub fn mark_committed(&mut self) {
        self.committed = self.history.len();
    }

    /// Appends a version with the given slots declared and nothing bound.
    /// Appending a version identical in `data` and slot sets to the current
    /// latest one is refused.
    pub fn new_version(
        &mut self,
        data: &str,
        asset_slots: &[String],
        rendition_slots: &[String],
        timestamp: &str,
    ) -> Result<(), Error> {
        self.guard_live()?;
        if let Some(latest) = self.manifest.versions.last() {
            if latest.same_shape(data, asset_slots, rendition_slots) {
                return Err(Error::VersionAlreadyExists {
                    id: self.manifest.id.clone(),
                });
            }
        }
        self.digest(
            EventKind::VersionAdded {
                data: data.to_string(),
                assets: asset_slots.to_vec(),
                renditions: rendition_slots.to_vec(),
            },
            timestamp,
        )
    }

    /// Appends `uri` to `slot` in the latest version. Binding the URI the
    /// slot already resolves to is refused; older versions are frozen.
    pub fn new_asset_version(
        &mut self,
        slot: &str,
        uri: &str,
        timestamp: &str,
    ) -> Result<(), Error> {
        self.guard_live()?;
        self.guard_slot(slot, uri, false)?;
        self.digest(
            EventKind::AssetVersionAdded {
                slot: slot.to_string(),
                uri: uri.to_string(),
            },
            timestamp,
        )
    }

    /// Same as [`Self::new_asset_version`], for rendition slots.
    pub fn new_rendition_version(
        &mut self,
        slot: &str,
        uri: &str,
        timestamp: &str,
    ) -> Result<(), Error> {
        self.guard_live()?;
        self.guard_slot(slot, uri, true)?;
        self.digest(
            EventKind::RenditionVersionAdded {
                slot: slot.to_string(),
                uri: uri.to_string(),
            },
            timestamp,
        )
    }

    pub fn delete(&mut self, timestamp: &str) -> Result<(), Error> {
        self.guard_live()?;
        self.digest(EventKind::Deleted, timestamp)
    }

    /// The version at `index`, latest when `None`.
    pub fn version(&self, index: Option<usize>) -> Result<&Version, Error> {
        let versions = &self.manifest.versions;
        let at = index.unwrap_or(versions.len().saturating_sub(1));
        versions.get(at).ok_or_else(|| {
            Error::Validation(format!("missing version for index: {}", at))
        })
    }

    /// The version in effect at `timestamp`, with every slot history
    /// truncated to entries recorded at or before that instant.
    pub fn version_at(&self, timestamp: &str) -> Result<Version, Error> {
        let at = crate::timestamp::normalize(timestamp)?;
        self.manifest
            .versions
            .iter()
            .take_while(|version| version.timestamp <= at)
            .last()
            .map(|version| version.truncated_at(&at))
            .ok_or_else(|| {
                Error::Validation(format!("missing version for timestamp: {}", timestamp))
            })
    }

    /// Resolved view (current URI per slot) of a version, by index or as-of
    /// instant. `at` takes precedence over `index`.
    pub fn resolved_version(
        &self,
        index: Option<usize>,
        at: Option<&str>,
    ) -> Result<ResolvedVersion, Error> {
        match at {
            Some(at) => Ok(ResolvedVersion::from(&self.version_at(at)?)),
            None => Ok(ResolvedVersion::from(self.version(index)?)),
        }
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

    fn guard_slot(&self, slot: &str, uri: &str, rendition: bool) -> Result<(), Error> {
        let latest = self.manifest.versions.last().ok_or_else(|| {
            Error::AssetSlotUnknown {
                slot: slot.to_string(),
            }
        })?;
        let slots = if rendition {
            &latest.renditions
        } else {
            &latest.assets
        };
        let history = slots.get(slot).ok_or_else(|| Error::AssetSlotUnknown {
            slot: slot.to_string(),
        })?;
        if history.last().map(|(_, current)| current.as_str()) == Some(uri) {
            return Err(Error::AssetAlreadyBound {
                slot: slot.to_string(),
            });
        }
        Ok(())
    }

    fn digest(&mut self, kind: EventKind, timestamp: &str) -> Result<(), Error> {
        let event = Event {
            entity: EntityKind::Document,
            id: self.manifest.id.clone(),
            timestamp: timestamp.to_string(),
            kind,
        };
        self.apply(&event)?;
        self.history.push(event);
        Ok(())
    }

    fn apply(&mut self, event: &Event) -> Result<(), Error> {
        if event.entity != EntityKind::Document || event.id != self.manifest.id {
            return Err(Error::Validation(format!(
                "event for {} \"{}\" does not belong to document \"{}\"",
                event.entity, event.id, self.manifest.id
            )));
        }
        match &event.kind {
            EventKind::VersionAdded {
                data,
                assets,
                renditions,
            } => {
                self.manifest
                    .versions
                    .push(Version::new(data, &event.timestamp, assets, renditions));
            }
            EventKind::AssetVersionAdded { slot, uri } => {
                self.bind(slot, uri, &event.timestamp, false)?;
            }
            EventKind::RenditionVersionAdded { slot, uri } => {
                self.bind(slot, uri, &event.timestamp, true)?;
            }
            EventKind::Deleted => {
                self.manifest.deleted = true;
            }
            other => {
                return Err(Error::Validation(format!(
                    "event {:?} cannot be applied to a document",
                    other
                )));
            }
        }
        self.manifest.updated = event.timestamp.clone();
        Ok(())
    }

    fn bind(&mut self, slot: &str, uri: &str, timestamp: &str, rendition: bool) -> Result<(), Error> {
        let latest = self.manifest.versions.last_mut().ok_or_else(|| {
            Error::AssetSlotUnknown {
                slot: slot.to_string(),
            }
        })?;
        let slots = if rendition {
            &mut latest.renditions
        } else {
            &mut latest.assets
        };
        let history = slots.get_mut(slot).ok_or_else(|| Error::AssetSlotUnknown {
            slot: slot.to_string(),
        })?;
        history.push((timestamp.to_string(), uri.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: &str = "2018-08-05T22:33:49.795151Z";
    const T1: &str = "2018-08-05T23:02:29.392990Z";
    const T2: &str = "2018-08-05T23:03:44.971230Z";
    const T3: &str = "2018-08-05T23:08:41.590174Z";
    const T4: &str = "2018-08-05T23:30:29.392990Z";

    fn slots(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn sample() -> Document {
        let mut document = Document::create("0034-8910-rsp-48-2-0347", None, T0).unwrap();
        document
            .new_version(
                "/rawfiles/7ca9f9b2687cb/0347.xml",
                &slots(&["gf01.jpg"]),
                &[],
                T1,
            )
            .unwrap();
        document
            .new_asset_version("gf01.jpg", "/rawfiles/8e644999a8fa4/gf01.jpg", T2)
            .unwrap();
        document
    }

    #[test]
    fn new_version_declares_slots_unbound() {
        let mut document = Document::create("0034-8910-rsp-48-2-0347", None, T0).unwrap();
        document
            .new_version("/rawfiles/0347.xml", &slots(&["gf01.jpg"]), &[], T1)
            .unwrap();
        let version = document.version(None).unwrap();
        assert_eq!(version.data, "/rawfiles/0347.xml");
        assert_eq!(version.timestamp, T1);
        assert!(version.assets["gf01.jpg"].is_empty());
    }

    #[test]
    fn new_version_identical_to_latest_is_refused() {
        let mut document = sample();
        let err = document
            .new_version(
                "/rawfiles/7ca9f9b2687cb/0347.xml",
                &slots(&["gf01.jpg"]),
                &[],
                T3,
            )
            .unwrap_err();
        assert!(matches!(err, Error::VersionAlreadyExists { .. }));
        assert_eq!(document.manifest().versions.len(), 1);
    }

    #[test]
    fn same_data_with_different_slots_is_a_new_version() {
        let mut document = sample();
        document
            .new_version(
                "/rawfiles/7ca9f9b2687cb/0347.xml",
                &slots(&["gf01.jpg", "gf02.jpg"]),
                &[],
                T3,
            )
            .unwrap();
        assert_eq!(document.manifest().versions.len(), 2);
    }

    #[test]
    fn asset_binding_appends_to_the_slot_history() {
        let mut document = sample();
        document
            .new_asset_version("gf01.jpg", "/rawfiles/7a664999a8fb3/gf01.jpg", T3)
            .unwrap();
        let version = document.version(None).unwrap();
        assert_eq!(
            version.assets["gf01.jpg"],
            vec![
                (T2.to_string(), "/rawfiles/8e644999a8fa4/gf01.jpg".to_string()),
                (T3.to_string(), "/rawfiles/7a664999a8fb3/gf01.jpg".to_string()),
            ]
        );
    }

    #[test]
    fn rebinding_the_current_uri_is_refused() {
        let mut document = sample();
        let err = document
            .new_asset_version("gf01.jpg", "/rawfiles/8e644999a8fa4/gf01.jpg", T3)
            .unwrap_err();
        assert_eq!(
            err,
            Error::AssetAlreadyBound {
                slot: "gf01.jpg".to_string()
            }
        );
    }

    #[test]
    fn binding_an_undeclared_slot_is_refused() {
        let mut document = sample();
        let err = document
            .new_asset_version("gf99.jpg", "/rawfiles/gf99.jpg", T3)
            .unwrap_err();
        assert_eq!(
            err,
            Error::AssetSlotUnknown {
                slot: "gf99.jpg".to_string()
            }
        );
    }

    #[test]
    fn binding_before_any_version_is_refused() {
        let mut document = Document::create("doc", None, T0).unwrap();
        assert!(matches!(
            document.new_asset_version("gf01.jpg", "/rawfiles/gf01.jpg", T1),
            Err(Error::AssetSlotUnknown { .. })
        ));
    }

    #[test]
    fn a_later_version_freezes_earlier_ones() {
        let mut document = sample();
        let frozen = document.version(Some(0)).unwrap().clone();
        document
            .new_version("/rawfiles/new/0347.xml", &slots(&["gf01.jpg"]), &[], T3)
            .unwrap();
        document
            .new_asset_version("gf01.jpg", "/rawfiles/v9/gf01.jpg", T4)
            .unwrap();
        // the binding lands on the latest version only
        assert_eq!(document.version(Some(0)).unwrap(), &frozen);
        assert_eq!(
            document.version(Some(1)).unwrap().assets["gf01.jpg"].len(),
            1
        );
    }

    #[test]
    fn version_timestamps_are_non_decreasing() {
        let mut document = sample();
        document
            .new_version("/rawfiles/new/0347.xml", &slots(&[]), &[], T4)
            .unwrap();
        let versions = &document.manifest().versions;
        for pair in versions.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn version_at_resolves_the_state_at_an_instant() {
        let mut document = sample();
        document
            .new_asset_version("gf01.jpg", "/rawfiles/7a664999a8fb3/gf01.jpg", T3)
            .unwrap();

        // between data registration and the first asset binding
        let target = document.version_at("2018-08-05T23:03:43Z").unwrap();
        assert!(target.assets["gf01.jpg"].is_empty());

        // right at the first binding
        let target = document.version_at("2018-08-05T23:04:00Z").unwrap();
        assert_eq!(target.assets["gf01.jpg"].len(), 1);

        // well after everything
        let target = document.version_at("2018-12-31").unwrap();
        assert_eq!(target.assets["gf01.jpg"].len(), 2);
        assert_eq!(target.timestamp, T1);
    }

    #[test]
    fn version_at_before_the_first_version_is_an_error() {
        let document = sample();
        assert!(document.version_at("2018-07-01").is_err());
    }

    #[test]
    fn version_at_rejects_non_utc_input() {
        let document = sample();
        assert!(matches!(
            document.version_at("2018-08-05 23:03:44"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn rendition_slots_are_independent_from_assets() {
        let mut document = Document::create("doc", None, T0).unwrap();
        document
            .new_version(
                "/rawfiles/doc.xml",
                &slots(&["gf01.jpg"]),
                &slots(&["pdf-en"]),
                T1,
            )
            .unwrap();
        document
            .new_rendition_version("pdf-en", "/rawfiles/doc-en.pdf", T2)
            .unwrap();
        assert!(matches!(
            document.new_asset_version("pdf-en", "/rawfiles/doc-en.pdf", T3),
            Err(Error::AssetSlotUnknown { .. })
        ));
        let resolved = document.resolved_version(None, None).unwrap();
        assert_eq!(resolved.renditions["pdf-en"], "/rawfiles/doc-en.pdf");
        assert_eq!(resolved.assets["gf01.jpg"], "");
    }

    #[test]
    fn deleted_documents_refuse_mutation_but_keep_reading() {
        let mut document = sample();
        document.delete(T4).unwrap();
        assert!(document.is_deleted());
        assert!(matches!(
            document.new_version("/rawfiles/x.xml", &[], &[], T4),
            Err(Error::AlreadyDeleted { .. })
        ));
        assert!(matches!(
            document.delete(T4),
            Err(Error::AlreadyDeleted { .. })
        ));
        // history reads survive deletion
        assert_eq!(document.version_at(T2).unwrap().assets["gf01.jpg"].len(), 1);
    }

    #[test]
    fn replay_reproduces_the_manifest() {
        let mut document = sample();
        document
            .new_version("/rawfiles/new/0347.xml", &slots(&["gf01.jpg"]), &[], T3)
            .unwrap();
        document
            .new_asset_version("gf01.jpg", "/rawfiles/v2/gf01.jpg", T4)
            .unwrap();

        let replayed = Document::from_history(document.history().to_vec()).unwrap();
        assert_eq!(replayed.manifest(), document.manifest());
        assert!(replayed.new_events().is_empty());
    }

    #[test]
    fn create_records_the_v3_pid() {
        let document =
            Document::create("doc", Some("kpmwraDbRpj6hZbBGGW6rzb".to_string()), T0).unwrap();
        assert_eq!(document.pid_v3(), Some("kpmwraDbRpj6hZbBGGW6rzb"));
        let replayed = Document::from_history(document.history().to_vec()).unwrap();
        assert_eq!(replayed.pid_v3(), Some("kpmwraDbRpj6hZbBGGW6rzb"));
    }
}
