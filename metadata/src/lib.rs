//! DICOM metadata normalization, lookup and caching
//!
//! This library turns DICOM data sets,
//! as delivered by a DICOMweb server ([DICOM JSON][1])
//! or read from DICOM P10 files,
//! into canonical instance records,
//! indexes them by study, series and instance,
//! and serves them by image reference.
//!
//! [1]: https://dicom.nema.org/medical/dicom/current/output/chtml/part18/chapter_F.html
//!
//! Binary attributes delivered by reference (`BulkDataURI`)
//! are retrieved through a [`BulkDataFetcher`].
//! Palette color lookup tables are decoded
//! and kept in a time-bounded [`PaletteColorCache`],
//! and overlay planes are unpacked to one byte per pixel.
//!
//! Consumers which expect module-shaped metadata
//! (`imagePlaneModule`, `voiLutModule`, ...)
//! are served through the [`legacy`] adapter.
//!
//! # Example
//!
//! ```
//! # use dicom_metadata::{InsertContext, MetadataProvider, MetadataValue, OfflineFetcher, TagDictionary};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = MetadataProvider::new(OfflineFetcher);
//!
//! let dataset = TagDictionary::from_json_str(r#"{
//!     "0020000D": { "vr": "UI", "Value": ["1.2.3"] },
//!     "0020000E": { "vr": "UI", "Value": ["1.2.3.4"] },
//!     "00080018": { "vr": "UI", "Value": ["1.2.3.4.5"] },
//!     "00080060": { "vr": "CS", "Value": ["MR"] }
//! }"#)?;
//! provider.insert(dataset, &InsertContext::new()).await?;
//!
//! let reference = "wadors:https://pacs/dicomweb/studies/1.2.3/series/1.2.3.4/instances/1.2.3.4.5/frames/1";
//! let modality = provider.get("Modality", reference);
//! assert_eq!(modality, Some(MetadataValue::Attribute("MR".into())));
//! # Ok(())
//! # }
//! ```
pub mod bulk;
pub mod datetime;
pub mod dictionary;
pub mod legacy;
pub mod normalize;
pub mod overlay;
pub mod palette;
pub mod provider;
pub mod record;
pub mod reference;
pub mod store;

pub use bulk::{BulkDataFetcher, FetchError, OfflineFetcher};
pub use dictionary::{BinaryData, TagDictionary, TagEntry, TagValue};
pub use legacy::{ModuleName, ModuleView};
pub use palette::{PaletteColorCache, PaletteColors};
pub use provider::{
    Error, GetOptions, InsertContext, MetadataProvider, MetadataValue, RawDataset,
};
pub use record::InstanceRecord;
pub use reference::InstanceUids;
pub use store::MetadataStore;
