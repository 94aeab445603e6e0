//! End to end behavior of the metadata provider.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use dicom_metadata::legacy::ModuleView;
use dicom_metadata::overlay::{pack, OverlayPixelData};
use dicom_metadata::provider::Error;
use dicom_metadata::{
    BulkDataFetcher, FetchError, InsertContext, InstanceUids, MetadataProvider, MetadataValue,
    ModuleName, OfflineFetcher, PaletteColorCache, TagDictionary,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

/// Serves fixed payloads by URI and counts requests.
#[derive(Debug, Default)]
struct MapFetcher {
    payloads: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl MapFetcher {
    fn with(mut self, uri: &str, payload: Vec<u8>) -> Self {
        self.payloads.insert(uri.to_string(), payload);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BulkDataFetcher for MapFetcher {
    async fn fetch_bulk_data(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(uri.to_string());
        self.payloads
            .get(uri)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                uri: uri.to_string(),
            })
    }
}

fn base_instance(study: &str, series: &str, sop: &str) -> Value {
    json!({
        "0020000D": { "vr": "UI", "Value": [study] },
        "0020000E": { "vr": "UI", "Value": [series] },
        "00080018": { "vr": "UI", "Value": [sop] },
        "00080016": { "vr": "UI", "Value": ["1.2.840.10008.5.1.4.1.1.7"] },
        "00080060": { "vr": "CS", "Value": ["OT"] },
        "00280010": { "vr": "US", "Value": [16] },
        "00280011": { "vr": "US", "Value": [16] }
    })
}

fn palette_instance(sop: &str, lut_uid: &str) -> TagDictionary {
    palette_instance_with(sop, lut_uid, (0..=255).collect())
}

fn palette_instance_with(sop: &str, lut_uid: &str, entries: Vec<u8>) -> TagDictionary {
    let channel = base64::engine::general_purpose::STANDARD.encode(entries);
    let mut json = base_instance("S1", "SE1", sop);
    let obj = json.as_object_mut().unwrap();
    obj.insert("00280004".into(), json!({ "vr": "CS", "Value": ["PALETTE COLOR"] }));
    obj.insert("00281199".into(), json!({ "vr": "UI", "Value": [lut_uid] }));
    for (descriptor, data) in [
        ("00281101", "00281201"),
        ("00281102", "00281202"),
        ("00281103", "00281203"),
    ] {
        obj.insert(descriptor.into(), json!({ "vr": "US", "Value": [256, 0, 8] }));
        obj.insert(data.into(), json!({ "vr": "OW", "InlineBinary": channel }));
    }
    TagDictionary::from_json_value(json).unwrap()
}

fn reference(sop: &str) -> String {
    format!("wadors:https://pacs/dicomweb/studies/S1/series/SE1/instances/{sop}/frames/1")
}

#[tokio::test]
async fn palette_color_inline_channels() {
    let provider = MetadataProvider::new(OfflineFetcher);

    let record = provider
        .insert(palette_instance("IN1", "1.2.3"), &InsertContext::new())
        .await
        .unwrap();
    let red = record.red_palette_color_lookup_table_data.unwrap();
    assert_eq!(red.len(), 256);
    assert_eq!(red, (0..=255).collect::<Vec<u16>>());
    assert_eq!(provider.palette_cache().entry_count().await, 1);
    let cached = provider.palette_cache().get("1.2.3").await.unwrap();

    // same lookup table UID: served from the cache without decoding
    // the (different) channels delivered with the second instance
    let second = provider
        .insert(palette_instance_with("IN2", "1.2.3", vec![7; 256]), &InsertContext::new())
        .await
        .unwrap();
    assert_eq!(
        second.blue_palette_color_lookup_table_data,
        Some((0..=255).collect::<Vec<u16>>())
    );
    let still_cached = provider.palette_cache().get("1.2.3").await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&cached, &still_cached));
    assert_eq!(provider.palette_cache().entry_count().await, 1);

    let Some(ModuleView::ImagePixel(pixel)) = provider.module(ModuleName::ImagePixel, &reference("IN2"))
    else {
        panic!("expected image pixel module");
    };
    assert_eq!(pixel.photometric_interpretation.as_deref(), Some("PALETTE COLOR"));
    assert_eq!(pixel.green_palette_color_lookup_table_data.map(|d| d.len()), Some(256));
    assert_eq!(
        pixel.red_palette_color_lookup_table_descriptor,
        Some(vec![256., 0., 8.])
    );
}

fn bulk_palette_instance(sop: &str, lut_uid: &str) -> TagDictionary {
    let mut json = base_instance("S1", "SE1", sop);
    let obj = json.as_object_mut().unwrap();
    obj.insert("00280004".into(), json!({ "vr": "CS", "Value": ["PALETTE COLOR"] }));
    obj.insert("00281199".into(), json!({ "vr": "UI", "Value": [lut_uid] }));
    for (descriptor, data, color) in [
        ("00281101", "00281201", "red"),
        ("00281102", "00281202", "green"),
        ("00281103", "00281203", "blue"),
    ] {
        obj.insert(descriptor.into(), json!({ "vr": "US", "Value": [4, 0, 16] }));
        obj.insert(
            data.into(),
            json!({ "vr": "OW", "BulkDataURI": format!("http://pacs/bulk/{color}") }),
        );
    }
    TagDictionary::from_json_value(json).unwrap()
}

fn palette_fetcher() -> MapFetcher {
    let payload = vec![0x00, 0x00, 0xFF, 0x00, 0x00, 0x01, 0xFF, 0xFF];
    MapFetcher::default()
        .with("https://pacs/bulk/red", payload.clone())
        .with("https://pacs/bulk/green", payload.clone())
        .with("https://pacs/bulk/blue", payload)
}

#[tokio::test]
async fn palette_color_bulk_data_is_cached() {
    let provider = MetadataProvider::new(palette_fetcher());
    let context = InsertContext::new().with_wado_root("https://pacs/dicomweb");

    let record = provider
        .insert(bulk_palette_instance("IN1", "1.2.3"), &context)
        .await
        .unwrap();
    assert_eq!(
        record.red_palette_color_lookup_table_data,
        Some(vec![0, 255, 256, 65535])
    );
    assert_eq!(provider.fetcher().calls(), 3);

    provider
        .insert(bulk_palette_instance("IN2", "1.2.3"), &context)
        .await
        .unwrap();
    assert_eq!(provider.fetcher().calls(), 3);

    // a different lookup table is fetched
    provider
        .insert(bulk_palette_instance("IN3", "1.2.4"), &context)
        .await
        .unwrap();
    assert_eq!(provider.fetcher().calls(), 6);
}

#[tokio::test]
async fn expired_palette_is_fetched_again() {
    let provider = MetadataProvider::with_palette_cache(
        palette_fetcher(),
        PaletteColorCache::with_max_age(Duration::from_millis(50)),
    );
    let context = InsertContext::new().with_wado_root("https://pacs/dicomweb");

    provider
        .insert(bulk_palette_instance("IN1", "1.2.3"), &context)
        .await
        .unwrap();
    provider
        .insert(bulk_palette_instance("IN2", "1.2.3"), &context)
        .await
        .unwrap();
    assert_eq!(provider.fetcher().calls(), 3);

    tokio::time::sleep(Duration::from_millis(120)).await;
    provider
        .insert(bulk_palette_instance("IN3", "1.2.3"), &context)
        .await
        .unwrap();
    assert_eq!(provider.fetcher().calls(), 6);
}

#[tokio::test]
async fn palette_failure_keeps_instance_indexed() {
    // no https upgrade without a https root: every URI is unknown
    let provider = MetadataProvider::new(palette_fetcher());

    let err = provider
        .insert(bulk_palette_instance("IN1", "1.2.3"), &InsertContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PaletteColor { ref sop_instance_uid, .. } if sop_instance_uid == "IN1"));

    let record = provider.instance(&reference("IN1")).unwrap();
    assert_eq!(record.photometric_interpretation.as_deref(), Some("PALETTE COLOR"));
    assert_eq!(record.red_palette_color_lookup_table_data, None);
    assert_eq!(provider.palette_cache().entry_count().await, 0);
}

#[tokio::test]
async fn palette_without_any_binary_is_missing_bulk_data() {
    let mut json = base_instance("S1", "SE1", "IN1");
    let obj = json.as_object_mut().unwrap();
    obj.insert("00280004".into(), json!({ "vr": "CS", "Value": ["PALETTE COLOR"] }));
    obj.insert("00281101".into(), json!({ "vr": "US", "Value": [256, 0, 8] }));
    obj.insert("00281102".into(), json!({ "vr": "US", "Value": [256, 0, 8] }));
    obj.insert("00281103".into(), json!({ "vr": "US", "Value": [256, 0, 8] }));

    let provider = MetadataProvider::new(OfflineFetcher);
    let err = provider
        .insert(TagDictionary::from_json_value(json).unwrap(), &InsertContext::new())
        .await
        .unwrap_err();
    let Error::PaletteColor { source, .. } = err else {
        panic!("expected a palette color error, got {err:?}");
    };
    assert!(matches!(
        *source,
        dicom_metadata::bulk::BulkDataError::MissingBulkData { .. }
    ));
    assert!(provider.instance(&reference("IN1")).is_some());
}

#[tokio::test]
async fn overlay_bulk_data_is_unpacked() {
    let unpacked: Vec<u8> = (0..16 * 16).map(|i| (i % 3 == 0) as u8).collect();
    let fetcher = MapFetcher::default().with("http://pacs/bulk/60003000", pack(&unpacked));
    let provider = MetadataProvider::new(fetcher);

    let mut json = base_instance("S1", "SE1", "IN1");
    let obj = json.as_object_mut().unwrap();
    obj.insert("60000010".into(), json!({ "vr": "US", "Value": [16] }));
    obj.insert("60000011".into(), json!({ "vr": "US", "Value": [16] }));
    obj.insert("60000040".into(), json!({ "vr": "CS", "Value": ["G"] }));
    obj.insert("60000050".into(), json!({ "vr": "SS", "Value": [1, 1] }));
    obj.insert("60003000".into(), json!({ "vr": "OW", "BulkDataURI": "http://pacs/bulk/60003000" }));
    obj.insert("60020010".into(), json!({ "vr": "US", "Value": [16] }));
    obj.insert("60023000".into(), json!({ "vr": "OW", "BulkDataURI": "http://pacs/bulk/60023000" }));

    let err = provider
        .insert(TagDictionary::from_json_value(json).unwrap(), &InsertContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OverlayData { group: 0x6002, .. }));

    let Some(ModuleView::OverlayPlane(overlays)) =
        provider.module(ModuleName::OverlayPlane, &reference("IN1"))
    else {
        panic!("expected overlay plane module");
    };
    // only the overlay whose data was retrieved
    assert_eq!(overlays.len(), 1);
    assert_eq!(overlays[0].overlay_type.as_deref(), Some("G"));
    assert_eq!(overlays[0].x, Some(1.));
    assert_eq!(overlays[0].pixel_data, Some(OverlayPixelData::Unpacked(unpacked)));
}

#[tokio::test]
async fn lookup_by_wadors_reference() {
    let provider = MetadataProvider::new(OfflineFetcher);
    let json = base_instance("S1", "SE1", "IN1");
    provider
        .insert(TagDictionary::from_json_value(json).unwrap(), &InsertContext::new())
        .await
        .unwrap();

    let record = provider
        .instance("wadors:https://pacs/dicomweb/studies/S1/series/SE1/instances/IN1")
        .unwrap();
    assert_eq!(record.uids(), Some(("S1", "SE1", "IN1")));
    assert_eq!(provider.instance_by_uids("S1", "SE1", "IN1"), Some(record));
    assert!(provider
        .instance("wadors:https://pacs/dicomweb/studies/S1/series/SE1/instances/IN2")
        .is_none());
}

#[tokio::test]
async fn image_plane_module_without_orientation() {
    let provider = MetadataProvider::new(OfflineFetcher);
    let mut json = base_instance("S1", "SE1", "IN1");
    json["00280030"] = json!({ "vr": "DS", "Value": [0.5, 0.5] });
    json["00200032"] = json!({ "vr": "DS", "Value": [0, 0, 0] });
    json["00200052"] = json!({ "vr": "UI", "Value": ["1.2.3.9"] });
    provider
        .insert(TagDictionary::from_json_value(json).unwrap(), &InsertContext::new())
        .await
        .unwrap();

    let value = provider.get("imagePlaneModule", &reference("IN1")).unwrap();
    let value = serde_json::to_value(value).unwrap();
    assert_eq!(value.get("rowCosines"), None);
    assert_eq!(value.get("columnCosines"), None);
    assert_eq!(value["rowPixelSpacing"], json!(0.5));

    // no derived geometry either
    let record = provider.instance(&reference("IN1")).unwrap();
    assert_eq!(record.image_plane, None);
}

#[tokio::test]
async fn reinsertion_merges_attributes() {
    let provider = MetadataProvider::new(OfflineFetcher);
    let mut first = base_instance("S1", "SE1", "IN1");
    first["00081030"] = json!({ "vr": "LO", "Value": ["Head"] });
    provider
        .insert(TagDictionary::from_json_value(first).unwrap(), &InsertContext::new())
        .await
        .unwrap();

    let mut second = base_instance("S1", "SE1", "IN1");
    second["00280010"] = json!({ "vr": "US", "Value": [32] });
    provider
        .insert(TagDictionary::from_json_value(second).unwrap(), &InsertContext::new())
        .await
        .unwrap();

    let record = provider.instance(&reference("IN1")).unwrap();
    assert_eq!(record.rows, Some(32));
    assert_eq!(record.study_description.as_deref(), Some("Head"));
    provider.with_store(|store| {
        assert_eq!(store.study_count(), 1);
        assert_eq!(store.instance_count("S1", "SE1"), 1);
    });
}

#[tokio::test]
async fn reinsertion_recomputes_image_plane() {
    let provider = MetadataProvider::new(OfflineFetcher);
    let mut first = base_instance("S1", "SE1", "IN1");
    first["00280030"] = json!({ "vr": "DS", "Value": [0.5, 0.5] });
    first["00200032"] = json!({ "vr": "DS", "Value": [0, 0, 0] });
    first["00200037"] = json!({ "vr": "DS", "Value": [1, 0, 0, 0, 1, 0] });
    first["00200052"] = json!({ "vr": "UI", "Value": ["1.2.3.9"] });
    provider
        .insert(TagDictionary::from_json_value(first).unwrap(), &InsertContext::new())
        .await
        .unwrap();
    let plane = provider.instance(&reference("IN1")).unwrap().image_plane.unwrap();
    assert_eq!(plane.row_pixel_spacing, 0.5);

    // the update alone does not carry a complete geometry
    let mut second = base_instance("S1", "SE1", "IN1");
    second["00280030"] = json!({ "vr": "DS", "Value": [0.8, 0.9] });
    provider
        .insert(TagDictionary::from_json_value(second).unwrap(), &InsertContext::new())
        .await
        .unwrap();

    let plane = provider.instance(&reference("IN1")).unwrap().image_plane.unwrap();
    assert_eq!(plane.row_pixel_spacing, 0.8);
    assert_eq!(plane.column_pixel_spacing, 0.9);
    assert_eq!(plane.frame_of_reference_uid, "1.2.3.9");
}

#[tokio::test]
async fn concurrent_insertions() {
    let provider = MetadataProvider::new(palette_fetcher());
    let context = InsertContext::new().with_wado_root("https://pacs/dicomweb");

    let insertions = (0..8).map(|i| {
        let sop = format!("IN{i}");
        let provider = &provider;
        let context = &context;
        async move {
            provider
                .insert(bulk_palette_instance(&sop, "1.2.3"), context)
                .await
        }
    });
    let outcomes = futures_util::future::join_all(insertions).await;
    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(provider.instance_uids().len(), 8);
    // one fetch per color table, shared by every insertion
    assert_eq!(provider.fetcher().calls(), 3);
    provider.register_reference("local:0", InstanceUids::new("S1", "SE1", "IN0"));
    assert!(matches!(
        provider.get("instance", "local:0"),
        Some(MetadataValue::Instance(_))
    ));
}

#[tokio::test]
async fn insert_p10_file() {
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_dictionary_std::{tags, uids};
    use dicom_metadata::RawDataset;
    use dicom_object::{meta::FileMetaTableBuilder, InMemDicomObject};

    let obj = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::MR_IMAGE_STORAGE)),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("IN7")),
        DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("S1")),
        DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("SE1")),
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("MR")),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(256_u16)),
        DataElement::new(tags::WINDOW_CENTER, VR::DS, PrimitiveValue::from("40\\80")),
    ]);
    let file_obj = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(uids::MR_IMAGE_STORAGE)
                .media_storage_sop_instance_uid("IN7"),
        )
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("IN7.dcm");
    file_obj.write_to_file(&path).unwrap();

    let provider = MetadataProvider::new(OfflineFetcher);
    provider
        .insert(
            RawDataset::P10(std::fs::read(&path).unwrap()),
            &InsertContext::new().with_reference("dicomfile:0"),
        )
        .await
        .unwrap();

    let record = provider.instance("dicomfile:0").unwrap();
    assert_eq!(record.modality.as_deref(), Some("MR"));
    assert_eq!(record.rows, Some(256));
    assert_eq!(record.window_center, Some(vec![40., 80.]));
    assert_eq!(
        provider.get("Modality", &reference("IN7")),
        Some(MetadataValue::Attribute(json!("MR")))
    );
}
