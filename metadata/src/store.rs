//! The hierarchical metadata store.
//!
//! Studies own series, which own instances.
//! Each level is keyed by its UID, unique within its parent.
//! The store only grows: there is no removal.
use std::collections::{BTreeMap, HashMap};

use snafu::{OptionExt, Snafu};

use crate::record::InstanceRecord;
use crate::reference::{parse_reference, InstanceUids};

/// The instance record cannot be indexed.
#[derive(Debug, Snafu)]
#[snafu(display("Data set lacks {} and cannot be indexed", identifier))]
pub struct MissingIdentifierError {
    /// the keyword of the missing identifier
    pub identifier: &'static str,
}

#[derive(Debug, Default)]
struct SeriesNode {
    instances: BTreeMap<String, InstanceRecord>,
}

#[derive(Debug, Default)]
struct StudyNode {
    series: BTreeMap<String, SeriesNode>,
}

/// A three-level index of instance records.
#[derive(Debug, Default)]
pub struct MetadataStore {
    studies: BTreeMap<String, StudyNode>,
    references: HashMap<String, InstanceUids>,
}

impl MetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index an instance record,
    /// creating its study and series on demand.
    ///
    /// If the instance is already indexed,
    /// the new record is merged into it:
    /// attributes present in `record` overwrite the indexed ones.
    /// Returns the UIDs under which the record is indexed.
    pub fn insert(&mut self, record: InstanceRecord) -> Result<InstanceUids, MissingIdentifierError> {
        let study_uid = record
            .study_instance_uid
            .clone()
            .context(MissingIdentifierSnafu {
                identifier: "StudyInstanceUID",
            })?;
        let series_uid = record
            .series_instance_uid
            .clone()
            .context(MissingIdentifierSnafu {
                identifier: "SeriesInstanceUID",
            })?;
        let sop_uid = record
            .sop_instance_uid
            .clone()
            .context(MissingIdentifierSnafu {
                identifier: "SOPInstanceUID",
            })?;

        tracing::trace!(
            "Indexing instance {} of series {} in study {}",
            sop_uid,
            series_uid,
            study_uid
        );
        let uids = InstanceUids::new(study_uid.clone(), series_uid.clone(), sop_uid.clone());
        self.studies
            .entry(study_uid)
            .or_default()
            .series
            .entry(series_uid)
            .or_default()
            .instances
            .entry(sop_uid)
            .or_default()
            .merge(record);
        Ok(uids)
    }

    /// Look up an instance by its UIDs.
    pub fn lookup(&self, study: &str, series: &str, instance: &str) -> Option<&InstanceRecord> {
        self.studies
            .get(study)?
            .series
            .get(series)?
            .instances
            .get(instance)
    }

    /// Look up the instance referred to by `uids`, ignoring the frame.
    pub fn lookup_uids(&self, uids: &InstanceUids) -> Option<&InstanceRecord> {
        self.lookup(
            &uids.study_instance_uid,
            &uids.series_instance_uid,
            &uids.sop_instance_uid,
        )
    }

    /// Translate an image reference into instance UIDs,
    /// by its shape or else by registration.
    pub fn resolve_reference(&self, reference: &str) -> Option<InstanceUids> {
        parse_reference(reference).or_else(|| self.references.get(reference).cloned())
    }

    /// Look up an instance by image reference.
    ///
    /// Unparseable and unregistered references yield `None`.
    pub fn lookup_by_reference(&self, reference: &str) -> Option<&InstanceRecord> {
        self.lookup_uids(&self.resolve_reference(reference)?)
    }

    /// Register the UIDs of a reference which has none of the known shapes.
    ///
    /// A later registration of the same reference replaces the earlier one.
    pub fn register_reference(&mut self, reference: impl Into<String>, uids: InstanceUids) {
        self.references.insert(reference.into(), uids);
    }

    /// Apply a change to an indexed instance.
    ///
    /// Returns whether the instance was found.
    pub fn update<F>(&mut self, uids: &InstanceUids, f: F) -> bool
    where
        F: FnOnce(&mut InstanceRecord),
    {
        let record = self
            .studies
            .get_mut(&uids.study_instance_uid)
            .and_then(|s| s.series.get_mut(&uids.series_instance_uid))
            .and_then(|s| s.instances.get_mut(&uids.sop_instance_uid));
        match record {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Iterate over the UIDs of all studies.
    pub fn studies(&self) -> impl Iterator<Item = &str> {
        self.studies.keys().map(String::as_str)
    }

    /// Iterate over the UIDs of all series in a study.
    pub fn series(&self, study: &str) -> impl Iterator<Item = &str> {
        self.studies
            .get(study)
            .into_iter()
            .flat_map(|s| s.series.keys().map(String::as_str))
    }

    /// Iterate over all instance records in a series.
    pub fn instances(&self, study: &str, series: &str) -> impl Iterator<Item = &InstanceRecord> {
        self.studies
            .get(study)
            .and_then(|s| s.series.get(series))
            .into_iter()
            .flat_map(|s| s.instances.values())
    }

    /// Iterate over every instance record in the store.
    pub fn all_instances(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.studies
            .values()
            .flat_map(|s| s.series.values())
            .flat_map(|s| s.instances.values())
    }

    /// The number of studies.
    pub fn study_count(&self) -> usize {
        self.studies.len()
    }

    /// The number of series in a study.
    pub fn series_count(&self, study: &str) -> usize {
        self.studies.get(study).map_or(0, |s| s.series.len())
    }

    /// The number of instances in a series.
    pub fn instance_count(&self, study: &str, series: &str) -> usize {
        self.studies
            .get(study)
            .and_then(|s| s.series.get(series))
            .map_or(0, |s| s.instances.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(study: &str, series: &str, sop: &str) -> InstanceRecord {
        InstanceRecord {
            study_instance_uid: Some(study.into()),
            series_instance_uid: Some(series.into()),
            sop_instance_uid: Some(sop.into()),
            ..Default::default()
        }
    }

    #[test]
    fn builds_hierarchy_on_demand() {
        let mut store = MetadataStore::new();
        store.insert(record("S1", "SE1", "IN1")).unwrap();
        store.insert(record("S1", "SE1", "IN2")).unwrap();
        store.insert(record("S1", "SE2", "IN1")).unwrap();
        store.insert(record("S2", "SE1", "IN1")).unwrap();

        assert_eq!(store.study_count(), 2);
        assert_eq!(store.series_count("S1"), 2);
        assert_eq!(store.instance_count("S1", "SE1"), 2);
        assert_eq!(store.instance_count("S1", "SE2"), 1);
        assert_eq!(store.series("S2").collect::<Vec<_>>(), vec!["SE1"]);
        assert_eq!(store.all_instances().count(), 4);
        assert_eq!(store.series_count("nope"), 0);
        assert_eq!(store.instances("S1", "nope").count(), 0);
    }

    #[test]
    fn reinsertion_merges() {
        let mut store = MetadataStore::new();
        store
            .insert(InstanceRecord {
                rows: Some(512),
                modality: Some("MR".into()),
                ..record("S1", "SE1", "IN1")
            })
            .unwrap();
        let uids = store
            .insert(InstanceRecord {
                rows: Some(256),
                ..record("S1", "SE1", "IN1")
            })
            .unwrap();
        assert_eq!(uids, InstanceUids::new("S1", "SE1", "IN1"));
        let merged = store.lookup_uids(&uids).unwrap();
        assert_eq!(merged.rows, Some(256));
        assert_eq!(merged.modality.as_deref(), Some("MR"));
        assert_eq!(store.instance_count("S1", "SE1"), 1);
    }

    #[test]
    fn missing_identifier_is_rejected() {
        let mut store = MetadataStore::new();
        let mut incomplete = record("S1", "SE1", "IN1");
        incomplete.series_instance_uid = None;
        let err = store.insert(incomplete).unwrap_err();
        assert_eq!(err.identifier, "SeriesInstanceUID");
        assert_eq!(store.study_count(), 0);
    }

    #[test]
    fn lookup_by_reference() {
        let mut store = MetadataStore::new();
        store.insert(record("S1", "SE1", "IN1")).unwrap();

        let found = store
            .lookup_by_reference("wadors:https://pacs/dicomweb/studies/S1/series/SE1/instances/IN1/frames/1")
            .unwrap();
        assert_eq!(found.sop_instance_uid.as_deref(), Some("IN1"));

        assert!(store
            .lookup_by_reference("wadouri:https://pacs/wado?requestType=WADO&studyUID=S1&seriesUID=SE1&objectUID=IN1")
            .is_some());
        assert!(store.lookup_by_reference("dicomfile:0").is_none());
        assert!(store
            .lookup_by_reference("wadors:https://pacs/dicomweb/studies/S1/series/SE1/instances/IN9")
            .is_none());

        store.register_reference("dicomfile:0", InstanceUids::new("S1", "SE1", "IN1"));
        assert!(store.lookup_by_reference("dicomfile:0").is_some());
    }

    #[test]
    fn update_indexed_instance() {
        let mut store = MetadataStore::new();
        store.insert(record("S1", "SE1", "IN1")).unwrap();

        let uids = InstanceUids::new("S1", "SE1", "IN1");
        assert!(store.update(&uids, |r| r.rows = Some(64)));
        assert_eq!(store.lookup_uids(&uids).unwrap().rows, Some(64));
        assert!(!store.update(&InstanceUids::new("S1", "SE1", "IN2"), |r| r.rows = Some(1)));
    }
}
