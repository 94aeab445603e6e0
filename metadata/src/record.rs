//! The canonical instance record.
//!
//! Every attribute is optional.
//! When serialized, attributes are named by their DICOM keyword
//! (e.g. `ImageOrientationPatient`, `SOPInstanceUID`).
use serde::Serialize;

use crate::overlay::OverlayPlane;

/// Image plane geometry derived from the image plane attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImagePlane {
    #[serde(rename = "FrameOfReferenceUID")]
    pub frame_of_reference_uid: String,
    pub rows: u32,
    pub columns: u32,
    /// the direction cosines of the first row
    pub row_cosines: [f64; 3],
    /// the direction cosines of the first column
    pub column_cosines: [f64; 3],
    pub image_position_patient: [f64; 3],
    /// spacing between rows (vertical spacing)
    pub row_pixel_spacing: f64,
    /// spacing between columns (horizontal spacing)
    pub column_pixel_spacing: f64,
}

impl ImagePlane {
    /// Derive the image plane geometry of an instance,
    /// only if every attribute it depends on is present and well formed.
    pub fn from_record(record: &InstanceRecord) -> Option<ImagePlane> {
        let [row_pixel_spacing, column_pixel_spacing] = fixed::<2>(record.pixel_spacing.as_deref())?;
        let orientation = fixed::<6>(record.image_orientation_patient.as_deref())?;
        Some(ImagePlane {
            frame_of_reference_uid: record.frame_of_reference_uid.clone()?,
            rows: record.rows?,
            columns: record.columns?,
            row_cosines: [orientation[0], orientation[1], orientation[2]],
            column_cosines: [orientation[3], orientation[4], orientation[5]],
            image_position_patient: fixed::<3>(record.image_position_patient.as_deref())?,
            row_pixel_spacing,
            column_pixel_spacing,
        })
    }
}

/// Take exactly the first `N` values, all finite.
fn fixed<const N: usize>(values: Option<&[f64]>) -> Option<[f64; N]> {
    let values: [f64; N] = values?.get(..N)?.try_into().ok()?;
    values.iter().all(|v| v.is_finite()).then_some(values)
}

/// The first item of the Radiopharmaceutical Information Sequence
/// of a PET instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RadiopharmaceuticalInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radiopharmaceutical_start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radionuclide_total_dose: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radionuclide_half_life: Option<f64>,
}

/// Declares the instance record
/// together with its field-wise merge and keyword lookup.
macro_rules! instance_record {
    (
        $(
            $(#[doc = $doc:literal])*
            $keyword:literal => $field:ident : $ty:ty
        ),* $(,)?
    ) => {
        /// The normalized attributes of one instance.
        #[derive(Debug, Clone, Default, PartialEq, Serialize)]
        pub struct InstanceRecord {
            $(
                $(#[doc = $doc])*
                #[serde(rename = $keyword, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }

        impl InstanceRecord {
            /// The keywords of all attributes, in declaration order.
            pub const KEYWORDS: &'static [&'static str] = &[$($keyword),*];

            /// Merge `other` into this record.
            ///
            /// Attributes present in `other` overwrite those in `self`,
            /// attributes absent from `other` are left untouched.
            /// Derived attributes are then computed again.
            pub fn merge(&mut self, other: InstanceRecord) {
                let InstanceRecord { $($field),* } = other;
                $(
                    if $field.is_some() {
                        self.$field = $field;
                    }
                )*
                self.refresh_derived();
            }

            /// Retrieve an attribute by its keyword as a JSON value.
            ///
            /// Only the requested attribute is serialized.
            pub fn attribute(&self, keyword: &str) -> Option<serde_json::Value> {
                match keyword {
                    $(
                        $keyword => self
                            .$field
                            .as_ref()
                            .and_then(|value| serde_json::to_value(value).ok()),
                    )*
                    _ => None,
                }
            }
        }
    };
}

instance_record! {
    // identifiers
    "StudyInstanceUID" => study_instance_uid: String,
    "SeriesInstanceUID" => series_instance_uid: String,
    "SOPInstanceUID" => sop_instance_uid: String,
    "SOPClassUID" => sop_class_uid: String,

    // patient
    "PatientName" => patient_name: String,
    "PatientID" => patient_id: String,
    "PatientBirthDate" => patient_birth_date: String,
    "PatientSex" => patient_sex: String,
    "PatientAge" => patient_age: String,
    "PatientSize" => patient_size: f64,
    "PatientWeight" => patient_weight: f64,

    // study
    "StudyDate" => study_date: String,
    "StudyTime" => study_time: String,
    "StudyDescription" => study_description: String,
    "AccessionNumber" => accession_number: String,
    "ModalitiesInStudy" => modalities_in_study: Vec<String>,
    "InstitutionName" => institution_name: String,
    "AdditionalPatientHistory" => additional_patient_history: String,

    // series
    "Modality" => modality: String,
    "SeriesDate" => series_date: String,
    "SeriesTime" => series_time: String,
    "SeriesDescription" => series_description: String,
    "SeriesNumber" => series_number: i64,

    // instance
    "InstanceNumber" => instance_number: i64,
    "ImageType" => image_type: Vec<String>,
    "AcquisitionDateTime" => acquisition_date_time: String,
    "ContrastBolusAgent" => contrast_bolus_agent: String,
    "ViewPosition" => view_position: String,
    "ImageLaterality" => image_laterality: String,
    /// SOP Instance UID of the first source image
    "SourceImageInstanceUID" => source_image_instance_uid: String,

    // image plane
    "FrameOfReferenceUID" => frame_of_reference_uid: String,
    "ImagePositionPatient" => image_position_patient: Vec<f64>,
    "ImageOrientationPatient" => image_orientation_patient: Vec<f64>,
    "PixelSpacing" => pixel_spacing: Vec<f64>,
    "ImagerPixelSpacing" => imager_pixel_spacing: Vec<f64>,
    "SliceThickness" => slice_thickness: f64,
    "SliceLocation" => slice_location: f64,
    "SpacingBetweenSlices" => spacing_between_slices: f64,
    /// derived geometry, present only when complete,
    /// kept in step with the attributes it is derived from
    "ImagePlane" => image_plane: ImagePlane,

    // image pixel
    "SamplesPerPixel" => samples_per_pixel: u32,
    "PhotometricInterpretation" => photometric_interpretation: String,
    "PlanarConfiguration" => planar_configuration: u32,
    "NumberOfFrames" => number_of_frames: u32,
    "Rows" => rows: u32,
    "Columns" => columns: u32,
    "BitsAllocated" => bits_allocated: u32,
    "BitsStored" => bits_stored: u32,
    "HighBit" => high_bit: u32,
    "PixelRepresentation" => pixel_representation: u32,
    "PixelAspectRatio" => pixel_aspect_ratio: Vec<f64>,
    "SmallestImagePixelValue" => smallest_image_pixel_value: f64,
    "LargestImagePixelValue" => largest_image_pixel_value: f64,

    // VOI and modality LUT
    "WindowCenter" => window_center: Vec<f64>,
    "WindowWidth" => window_width: Vec<f64>,
    "RescaleIntercept" => rescale_intercept: f64,
    "RescaleSlope" => rescale_slope: f64,
    "RescaleType" => rescale_type: String,

    // palette color
    "RedPaletteColorLookupTableDescriptor" => red_palette_color_lookup_table_descriptor: Vec<f64>,
    "GreenPaletteColorLookupTableDescriptor" => green_palette_color_lookup_table_descriptor: Vec<f64>,
    "BluePaletteColorLookupTableDescriptor" => blue_palette_color_lookup_table_descriptor: Vec<f64>,
    "PaletteColorLookupTableUID" => palette_color_lookup_table_uid: String,
    "RedPaletteColorLookupTableData" => red_palette_color_lookup_table_data: Vec<u16>,
    "GreenPaletteColorLookupTableData" => green_palette_color_lookup_table_data: Vec<u16>,
    "BluePaletteColorLookupTableData" => blue_palette_color_lookup_table_data: Vec<u16>,

    // lossy compression
    "LossyImageCompression" => lossy_image_compression: String,
    "LossyImageCompressionRatio" => lossy_image_compression_ratio: f64,
    "LossyImageCompressionMethod" => lossy_image_compression_method: String,
    "DerivationDescription" => derivation_description: String,

    // cine
    "FrameTime" => frame_time: f64,
    "FrameTimeVector" => frame_time_vector: Vec<f64>,
    /// keyword of the attribute pointed to by Frame Increment Pointer
    "FrameIncrementPointer" => frame_increment_pointer: String,

    // PET
    "RadiopharmaceuticalInfo" => radiopharmaceutical_info: RadiopharmaceuticalInfo,

    /// overlay planes with data
    "Overlays" => overlays: Vec<OverlayPlane>,
}

impl InstanceRecord {
    /// The study, series and SOP instance UIDs,
    /// if all of them are present.
    pub fn uids(&self) -> Option<(&str, &str, &str)> {
        Some((
            self.study_instance_uid.as_deref()?,
            self.series_instance_uid.as_deref()?,
            self.sop_instance_uid.as_deref()?,
        ))
    }

    /// Compute the derived image plane from the current attributes.
    pub fn refresh_derived(&mut self) {
        self.image_plane = ImagePlane::from_record(self);
    }
}
