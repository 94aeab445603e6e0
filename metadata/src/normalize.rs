//! Conversion of tag dictionaries into canonical instance records.
//!
//! Normalization is synchronous and infallible:
//! absent or malformed attributes yield absent fields.
//! Binary values which need resolving are returned alongside the record
//! as [`PendingBulkData`].
use dicom_core::Tag;
use dicom_dictionary_std::tags;

use crate::dictionary::{BinaryData, TagDictionary};
use crate::overlay::{self, overlay_tag, OverlayPixelData, OverlayPlane};
use crate::palette::{LutChannel, PaletteRequest};
use crate::record::{InstanceRecord, RadiopharmaceuticalInfo};

/// The photometric interpretation of palette color images.
pub const PALETTE_COLOR: &str = "PALETTE COLOR";

/// An overlay whose data must be retrieved by URI.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOverlay {
    /// the overlay group
    pub group: u16,
    /// where to retrieve the bit-packed overlay data
    pub bulk_data_uri: String,
}

/// Binary values to resolve before an instance is complete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingBulkData {
    /// the palette of a `PALETTE COLOR` instance
    pub palette: Option<PaletteRequest>,
    pub overlays: Vec<PendingOverlay>,
}

impl PendingBulkData {
    /// Whether there is nothing to resolve.
    pub fn is_empty(&self) -> bool {
        self.palette.is_none() && self.overlays.is_empty()
    }
}

/// The outcome of normalizing a data set.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: InstanceRecord,
    pub pending: PendingBulkData,
}

fn string(dict: &TagDictionary, tag: Tag) -> Option<String> {
    dict.get_str(tag).map(|s| s.trim().to_string())
}

fn strings(dict: &TagDictionary, tag: Tag) -> Option<Vec<String>> {
    dict.get_strings(tag).map(|v| v.to_vec())
}

fn unsigned(dict: &TagDictionary, tag: Tag) -> Option<u32> {
    dict.get_int(tag).and_then(|v| u32::try_from(v).ok())
}

fn numbers(dict: &TagDictionary, tag: Tag) -> Option<Vec<f64>> {
    dict.get_number_array(tag)
}

/// Normalize a data set.
pub fn normalize(dict: &TagDictionary) -> Normalized {
    let modality = string(dict, tags::MODALITY);
    let photometric_interpretation = string(dict, tags::PHOTOMETRIC_INTERPRETATION);

    let (overlays, pending_overlays) = read_overlays(dict);
    let palette = if photometric_interpretation.as_deref() == Some(PALETTE_COLOR) {
        Some(palette_request(dict))
    } else {
        None
    };

    let mut record = InstanceRecord {
        study_instance_uid: string(dict, tags::STUDY_INSTANCE_UID),
        series_instance_uid: string(dict, tags::SERIES_INSTANCE_UID),
        sop_instance_uid: string(dict, tags::SOP_INSTANCE_UID),
        sop_class_uid: string(dict, tags::SOP_CLASS_UID),

        patient_name: string(dict, tags::PATIENT_NAME),
        patient_id: string(dict, tags::PATIENT_ID),
        patient_birth_date: string(dict, tags::PATIENT_BIRTH_DATE),
        patient_sex: string(dict, tags::PATIENT_SEX),
        patient_age: string(dict, tags::PATIENT_AGE),
        patient_size: dict.get_number(tags::PATIENT_SIZE),
        patient_weight: dict.get_number(tags::PATIENT_WEIGHT),

        study_date: string(dict, tags::STUDY_DATE),
        study_time: string(dict, tags::STUDY_TIME),
        study_description: string(dict, tags::STUDY_DESCRIPTION),
        accession_number: string(dict, tags::ACCESSION_NUMBER),
        modalities_in_study: strings(dict, tags::MODALITIES_IN_STUDY),
        institution_name: string(dict, tags::INSTITUTION_NAME),
        additional_patient_history: string(dict, tags::ADDITIONAL_PATIENT_HISTORY),

        series_date: string(dict, tags::SERIES_DATE),
        series_time: string(dict, tags::SERIES_TIME),
        series_description: string(dict, tags::SERIES_DESCRIPTION),
        series_number: dict.get_int(tags::SERIES_NUMBER),

        instance_number: dict.get_int(tags::INSTANCE_NUMBER),
        image_type: strings(dict, tags::IMAGE_TYPE),
        acquisition_date_time: string(dict, tags::ACQUISITION_DATE_TIME),
        contrast_bolus_agent: string(dict, tags::CONTRAST_BOLUS_AGENT),
        view_position: string(dict, tags::VIEW_POSITION),
        image_laterality: string(dict, tags::IMAGE_LATERALITY),
        source_image_instance_uid: source_image_instance_uid(dict),

        frame_of_reference_uid: string(dict, tags::FRAME_OF_REFERENCE_UID),
        image_position_patient: numbers(dict, tags::IMAGE_POSITION_PATIENT),
        image_orientation_patient: numbers(dict, tags::IMAGE_ORIENTATION_PATIENT),
        pixel_spacing: numbers(dict, tags::PIXEL_SPACING),
        imager_pixel_spacing: numbers(dict, tags::IMAGER_PIXEL_SPACING),
        slice_thickness: dict.get_number(tags::SLICE_THICKNESS),
        slice_location: dict.get_number(tags::SLICE_LOCATION),
        spacing_between_slices: dict.get_number(tags::SPACING_BETWEEN_SLICES),
        image_plane: None,

        samples_per_pixel: unsigned(dict, tags::SAMPLES_PER_PIXEL),
        planar_configuration: unsigned(dict, tags::PLANAR_CONFIGURATION),
        number_of_frames: unsigned(dict, tags::NUMBER_OF_FRAMES),
        rows: unsigned(dict, tags::ROWS),
        columns: unsigned(dict, tags::COLUMNS),
        bits_allocated: unsigned(dict, tags::BITS_ALLOCATED),
        bits_stored: unsigned(dict, tags::BITS_STORED),
        high_bit: unsigned(dict, tags::HIGH_BIT),
        pixel_representation: unsigned(dict, tags::PIXEL_REPRESENTATION),
        pixel_aspect_ratio: numbers(dict, tags::PIXEL_ASPECT_RATIO),
        smallest_image_pixel_value: dict.get_number(tags::SMALLEST_IMAGE_PIXEL_VALUE),
        largest_image_pixel_value: dict.get_number(tags::LARGEST_IMAGE_PIXEL_VALUE),

        window_center: numbers(dict, tags::WINDOW_CENTER),
        window_width: numbers(dict, tags::WINDOW_WIDTH),
        rescale_intercept: dict.get_number(tags::RESCALE_INTERCEPT),
        rescale_slope: dict.get_number(tags::RESCALE_SLOPE),
        rescale_type: string(dict, tags::RESCALE_TYPE),

        red_palette_color_lookup_table_descriptor: numbers(
            dict,
            tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
        ),
        green_palette_color_lookup_table_descriptor: numbers(
            dict,
            tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
        ),
        blue_palette_color_lookup_table_descriptor: numbers(
            dict,
            tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
        ),
        palette_color_lookup_table_uid: string(dict, tags::PALETTE_COLOR_LOOKUP_TABLE_UID),
        // filled in once resolved
        red_palette_color_lookup_table_data: None,
        green_palette_color_lookup_table_data: None,
        blue_palette_color_lookup_table_data: None,

        lossy_image_compression: string(dict, tags::LOSSY_IMAGE_COMPRESSION),
        lossy_image_compression_ratio: dict.get_number(tags::LOSSY_IMAGE_COMPRESSION_RATIO),
        lossy_image_compression_method: string(dict, tags::LOSSY_IMAGE_COMPRESSION_METHOD),
        derivation_description: string(dict, tags::DERIVATION_DESCRIPTION),

        frame_time: dict.get_number(tags::FRAME_TIME),
        frame_time_vector: numbers(dict, tags::FRAME_TIME_VECTOR),
        frame_increment_pointer: frame_increment_pointer(dict),

        radiopharmaceutical_info: radiopharmaceutical_info(dict, modality.as_deref()),
        overlays: (!overlays.is_empty()).then_some(overlays),

        modality,
        photometric_interpretation,
    };
    record.refresh_derived();

    Normalized {
        record,
        pending: PendingBulkData {
            palette,
            overlays: pending_overlays,
        },
    }
}

fn source_image_instance_uid(dict: &TagDictionary) -> Option<String> {
    dict.get_sequence(tags::SOURCE_IMAGE_SEQUENCE)?
        .first()
        .and_then(|item| string(item, tags::REFERENCED_SOP_INSTANCE_UID))
}

fn frame_increment_pointer(dict: &TagDictionary) -> Option<String> {
    let pointer = dict.get_str(tags::FRAME_INCREMENT_POINTER)?;
    match pointer.to_ascii_uppercase().as_str() {
        "00181063" => Some("FrameTime".to_string()),
        "00181065" => Some("FrameTimeVector".to_string()),
        _ => None,
    }
}

fn radiopharmaceutical_info(
    dict: &TagDictionary,
    modality: Option<&str>,
) -> Option<RadiopharmaceuticalInfo> {
    if modality != Some("PT") {
        return None;
    }
    let item = dict
        .get_sequence(tags::RADIOPHARMACEUTICAL_INFORMATION_SEQUENCE)?
        .first()?;
    Some(RadiopharmaceuticalInfo {
        radiopharmaceutical_start_time: string(item, tags::RADIOPHARMACEUTICAL_START_TIME),
        radionuclide_total_dose: item.get_number(tags::RADIONUCLIDE_TOTAL_DOSE),
        radionuclide_half_life: item.get_number(tags::RADIONUCLIDE_HALF_LIFE),
    })
}

fn palette_request(dict: &TagDictionary) -> PaletteRequest {
    let channel = |data: Tag, descriptor: Tag| LutChannel {
        tag: data,
        data: dict.get(data).map(|e| e.value.clone()),
        descriptor: numbers(dict, descriptor),
    };
    PaletteRequest {
        lut_uid: string(dict, tags::PALETTE_COLOR_LOOKUP_TABLE_UID),
        red: channel(
            tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DATA,
            tags::RED_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
        ),
        green: channel(
            tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DATA,
            tags::GREEN_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
        ),
        blue: channel(
            tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DATA,
            tags::BLUE_PALETTE_COLOR_LOOKUP_TABLE_DESCRIPTOR,
        ),
    }
}

/// Read every overlay plane which has data.
///
/// Data delivered by URI is left out of the plane
/// and reported as pending.
fn read_overlays(dict: &TagDictionary) -> (Vec<OverlayPlane>, Vec<PendingOverlay>) {
    let mut planes = Vec::new();
    let mut pending = Vec::new();
    for group in overlay::overlay_groups() {
        let Some(data) = dict.get_binary(overlay_tag(group, overlay::OVERLAY_DATA)) else {
            continue;
        };
        let overlay_data = match data {
            BinaryData::BulkDataUri(uri) => {
                pending.push(PendingOverlay {
                    group,
                    bulk_data_uri: uri.clone(),
                });
                None
            }
            packed => Some(OverlayPixelData::Packed(packed.clone())),
        };
        let tag = |element| overlay_tag(group, element);
        planes.push(OverlayPlane {
            group,
            overlay_rows: unsigned(dict, tag(overlay::OVERLAY_ROWS)),
            overlay_columns: unsigned(dict, tag(overlay::OVERLAY_COLUMNS)),
            overlay_type: string(dict, tag(overlay::OVERLAY_TYPE)),
            overlay_origin: numbers(dict, tag(overlay::OVERLAY_ORIGIN)),
            overlay_description: string(dict, tag(overlay::OVERLAY_DESCRIPTION)),
            overlay_label: string(dict, tag(overlay::OVERLAY_LABEL)),
            roi_area: dict.get_number(tag(overlay::ROI_AREA)),
            roi_mean: dict.get_number(tag(overlay::ROI_MEAN)),
            roi_standard_deviation: dict.get_number(tag(overlay::ROI_STANDARD_DEVIATION)),
            overlay_data,
        });
    }
    (planes, pending)
}
