//! The metadata provider: insertion and lookup of instance metadata.
//!
//! A [`MetadataProvider`] owns a [`MetadataStore`],
//! a [`PaletteColorCache`],
//! and the [`BulkDataFetcher`] used to retrieve external binary values.
//! Construct one and pass it to whoever needs metadata;
//! there is no global instance.
//!
//! Locks are only held for short synchronous sections,
//! never while fetching,
//! so several insertions may be in flight at once.
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::future::{join, join_all};
use serde::Serialize;
use snafu::{ResultExt, Snafu};

use crate::bulk::{BulkDataError, BulkDataFetcher, BulkDataResolver};
use crate::dictionary::{BinaryData, ParseError, TagDictionary};
use crate::legacy::{adapt_by_name, adapt_in, ModuleName, ModuleView, ViewContext};
use crate::normalize::{normalize, Normalized};
use crate::overlay::{self, overlay_tag, unpack, OverlayPixelData};
use crate::palette::PaletteColorCache;
use crate::record::InstanceRecord;
use crate::reference::InstanceUids;
use crate::store::{MetadataStore, MissingIdentifierError};

/// Attributes which may stand in for another one,
/// in order of preference.
pub const FALLBACK_KEYWORDS: &[(&str, &[&str])] = &[("PixelSpacing", &["ImagerPixelSpacing"])];

/// An error which may occur when inserting a data set.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// The data set could not be read
    #[snafu(display("Could not parse data set"))]
    Parse { source: ParseError },
    /// The data set lacks one of its identifiers
    #[snafu(display("Could not index data set"))]
    MissingIdentifier { source: MissingIdentifierError },
    /// The palette of a `PALETTE COLOR` instance could not be resolved.
    /// The instance is indexed without palette data.
    #[snafu(display("Could not resolve palette color data of instance {}", sop_instance_uid))]
    PaletteColor {
        sop_instance_uid: String,
        source: Arc<BulkDataError>,
    },
    /// Overlay data could not be resolved.
    /// The instance is indexed without the data of this overlay.
    #[snafu(display("Could not resolve data of overlay group {:04X}", group))]
    OverlayData { group: u16, source: BulkDataError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A data set as delivered to the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDataset {
    /// An already decoded tag dictionary
    Dictionary(TagDictionary),
    /// A DICOM JSON data set object
    Json(String),
    /// A DICOM P10 byte stream, with or without preamble
    P10(Vec<u8>),
}

impl RawDataset {
    /// Decode the data set into a tag dictionary.
    pub fn into_dictionary(self) -> Result<TagDictionary, ParseError> {
        match self {
            RawDataset::Dictionary(dict) => Ok(dict),
            RawDataset::Json(json) => TagDictionary::from_json_str(&json),
            RawDataset::P10(bytes) => TagDictionary::from_p10(&bytes),
        }
    }
}

impl From<TagDictionary> for RawDataset {
    fn from(dict: TagDictionary) -> Self {
        RawDataset::Dictionary(dict)
    }
}

/// Where a data set came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertContext {
    wado_root: Option<String>,
    reference: Option<String>,
}

impl InsertContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the root URL of the server which delivered the data set.
    pub fn with_wado_root(mut self, wado_root: impl Into<String>) -> Self {
        self.wado_root = Some(wado_root.into());
        self
    }

    /// Register an image reference for the inserted instance.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// The root URL of the server, if known.
    pub fn wado_root(&self) -> Option<&str> {
        self.wado_root.as_deref()
    }
}

/// Options for [`MetadataProvider::get_with`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// whether to try [`FALLBACK_KEYWORDS`] for absent attributes
    pub fallback: bool,
}

/// The outcome of a metadata query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// The full instance record
    Instance(InstanceRecord),
    /// A module-shaped view
    Module(ModuleView),
    /// A single attribute, by keyword
    Attribute(serde_json::Value),
}

/// Normalizes, indexes and serves instance metadata.
#[derive(Debug)]
pub struct MetadataProvider<F> {
    store: RwLock<MetadataStore>,
    palettes: PaletteColorCache,
    fetcher: F,
}

impl<F> MetadataProvider<F>
where
    F: BulkDataFetcher,
{
    /// Create an empty provider.
    pub fn new(fetcher: F) -> Self {
        Self::with_palette_cache(fetcher, PaletteColorCache::new())
    }

    /// Create an empty provider using the given palette cache.
    pub fn with_palette_cache(fetcher: F, palettes: PaletteColorCache) -> Self {
        MetadataProvider {
            store: RwLock::new(MetadataStore::new()),
            palettes,
            fetcher,
        }
    }

    /// The bulk data fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// The palette color cache.
    pub fn palette_cache(&self) -> &PaletteColorCache {
        &self.palettes
    }

    fn read(&self) -> RwLockReadGuard<'_, MetadataStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MetadataStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inspect the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&MetadataStore) -> R) -> R {
        f(&self.read())
    }

    /// Insert a data set.
    ///
    /// The data set is normalized and indexed first.
    /// Overlay data and palette color data delivered by reference
    /// are then resolved,
    /// and every successful resolution is applied to the indexed record.
    /// If any resolution fails,
    /// the instance stays indexed without the affected attributes
    /// and the first error is returned.
    pub async fn insert(
        &self,
        dataset: impl Into<RawDataset>,
        context: &InsertContext,
    ) -> Result<InstanceRecord> {
        let dict = dataset.into().into_dictionary().context(ParseSnafu)?;
        let Normalized { record, pending } = normalize(&dict);

        let (uids, indexed) = {
            let mut store = self.write();
            let uids = store.insert(record).context(MissingIdentifierSnafu)?;
            if let Some(reference) = &context.reference {
                store.register_reference(reference.clone(), uids.clone());
            }
            let indexed = store.lookup_uids(&uids).cloned().unwrap_or_default();
            (uids, indexed)
        };

        if pending.is_empty() {
            return Ok(indexed);
        }

        let resolver = BulkDataResolver::new(&self.fetcher, context.wado_root());
        let overlays = join_all(pending.overlays.iter().map(|o| {
            let resolver = &resolver;
            async move {
                let tag = overlay_tag(o.group, overlay::OVERLAY_DATA);
                let data = BinaryData::BulkDataUri(o.bulk_data_uri.clone());
                (o.group, resolver.resolve_bytes(tag, &data).await)
            }
        }));
        let palette = async {
            match &pending.palette {
                Some(request) => Some(self.palettes.resolve(request, &resolver).await),
                None => None,
            }
        };
        let (overlays, palette) = join(overlays, palette).await;

        let mut first_error = None;
        let mut resolved_overlays = Vec::new();
        for (group, outcome) in overlays {
            match outcome {
                Ok(packed) => resolved_overlays.push((group, unpack(&packed))),
                Err(source) => {
                    tracing::warn!("Overlay group {:04X} of {} left without data", group, uids.sop_instance_uid);
                    first_error.get_or_insert(Error::OverlayData { group, source });
                }
            }
        }
        let palette = match palette {
            Some(Ok(colors)) => Some(colors),
            Some(Err(source)) => {
                tracing::warn!("Palette of {} left unresolved", uids.sop_instance_uid);
                // palette failures take precedence
                first_error = Some(Error::PaletteColor {
                    sop_instance_uid: uids.sop_instance_uid.clone(),
                    source,
                });
                None
            }
            None => None,
        };

        let mut updated = indexed;
        {
            let mut store = self.write();
            store.update(&uids, |record| {
                if let Some(planes) = &mut record.overlays {
                    for (group, data) in resolved_overlays {
                        if let Some(plane) = planes.iter_mut().find(|p| p.group == group) {
                            plane.overlay_data = Some(OverlayPixelData::Unpacked(data));
                        }
                    }
                }
                if let Some(colors) = palette {
                    record.red_palette_color_lookup_table_data = Some(colors.red.clone());
                    record.green_palette_color_lookup_table_data = Some(colors.green.clone());
                    record.blue_palette_color_lookup_table_data = Some(colors.blue.clone());
                }
                updated = record.clone();
            });
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(updated),
        }
    }

    /// Query metadata of the instance referred to by `reference`.
    ///
    /// `kind` is either `instance` for the full record,
    /// an attribute keyword (e.g. `Rows`),
    /// a module name (e.g. `imagePlaneModule`),
    /// one of the `study`, `series` and `patient` groupings,
    /// or `frameNumber` for the frame named by the reference.
    /// Unknown instances and kinds yield `None`.
    pub fn get(&self, kind: &str, reference: &str) -> Option<MetadataValue> {
        self.get_with(kind, reference, GetOptions::default())
    }

    /// Query metadata, with options.
    pub fn get_with(&self, kind: &str, reference: &str, options: GetOptions) -> Option<MetadataValue> {
        let store = self.read();
        let uids = store.resolve_reference(reference)?;
        let record = store.lookup_uids(&uids)?;
        if kind == "instance" {
            return Some(MetadataValue::Instance(record.clone()));
        }
        if let Some(value) = record.attribute(kind) {
            return Some(MetadataValue::Attribute(value));
        }
        if options.fallback {
            let fallback = FALLBACK_KEYWORDS
                .iter()
                .filter(|(keyword, _)| *keyword == kind)
                .flat_map(|(_, fallbacks)| fallbacks.iter())
                .find_map(|keyword| record.attribute(keyword));
            if let Some(value) = fallback {
                return Some(MetadataValue::Attribute(value));
            }
        }
        adapt_by_name(kind, record, &view_context(&store, &uids)).map(MetadataValue::Module)
    }

    /// The record of the instance referred to by `reference`.
    pub fn instance(&self, reference: &str) -> Option<InstanceRecord> {
        self.read().lookup_by_reference(reference).cloned()
    }

    /// The record of an instance, by UIDs.
    pub fn instance_by_uids(&self, study: &str, series: &str, instance: &str) -> Option<InstanceRecord> {
        self.read().lookup(study, series, instance).cloned()
    }

    /// A module view of the instance referred to by `reference`.
    pub fn module(&self, module: ModuleName, reference: &str) -> Option<ModuleView> {
        let store = self.read();
        let uids = store.resolve_reference(reference)?;
        let record = store.lookup_uids(&uids)?;
        adapt_in(module, record, &view_context(&store, &uids))
    }

    /// Register the UIDs of an image reference
    /// which has none of the known shapes.
    pub fn register_reference(&self, reference: impl Into<String>, uids: InstanceUids) {
        self.write().register_reference(reference, uids);
    }

    /// The UIDs of every indexed instance.
    pub fn instance_uids(&self) -> Vec<InstanceUids> {
        self.read()
            .all_instances()
            .filter_map(InstanceRecord::uids)
            .map(|(study, series, sop)| InstanceUids::new(study, series, sop))
            .collect()
    }
}

fn view_context(store: &MetadataStore, uids: &InstanceUids) -> ViewContext {
    ViewContext {
        num_images: Some(store.instance_count(&uids.study_instance_uid, &uids.series_instance_uid)),
        frame_number: uids.frame,
    }
}
