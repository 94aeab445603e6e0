//! Module-shaped views of instance records.
//!
//! Some consumers expect attributes grouped by information module,
//! with lower camel case names (`imagePlaneModule.rowCosines`, ...).
//! [`adapt`] builds these views from a canonical [`InstanceRecord`].
//! It is pure: nothing is stored or cached.
//!
//! The `study`, `series` and `patient` groupings
//! and the `frameNumber` of an image reference are served the same way.
//! The facts they need beyond the record are passed in a [`ViewContext`].
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use snafu::Snafu;

use crate::datetime::{parse_date, parse_time};
use crate::overlay::OverlayPixelData;
use crate::record::InstanceRecord;

/// The module name is not known.
#[derive(Debug, Snafu)]
#[snafu(display("Unknown module `{}`", name))]
pub struct UnknownModuleError {
    pub name: String,
}

/// The modules and groupings for which a view can be built.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ModuleName {
    GeneralSeries,
    PatientStudy,
    ImagePlane,
    ImagePixel,
    VoiLut,
    ModalityLut,
    SopCommon,
    PetIsotope,
    OverlayPlane,
    Patient,
    GeneralImage,
    GeneralStudy,
    Cine,
    Study,
    Series,
    PatientSummary,
    FrameNumber,
}

impl ModuleName {
    /// All module names.
    pub const ALL: [ModuleName; 17] = [
        ModuleName::GeneralSeries,
        ModuleName::PatientStudy,
        ModuleName::ImagePlane,
        ModuleName::ImagePixel,
        ModuleName::VoiLut,
        ModuleName::ModalityLut,
        ModuleName::SopCommon,
        ModuleName::PetIsotope,
        ModuleName::OverlayPlane,
        ModuleName::Patient,
        ModuleName::GeneralImage,
        ModuleName::GeneralStudy,
        ModuleName::Cine,
        ModuleName::Study,
        ModuleName::Series,
        ModuleName::PatientSummary,
        ModuleName::FrameNumber,
    ];

    /// The name by which consumers request the module.
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleName::GeneralSeries => "generalSeriesModule",
            ModuleName::PatientStudy => "patientStudyModule",
            ModuleName::ImagePlane => "imagePlaneModule",
            ModuleName::ImagePixel => "imagePixelModule",
            ModuleName::VoiLut => "voiLutModule",
            ModuleName::ModalityLut => "modalityLutModule",
            ModuleName::SopCommon => "sopCommonModule",
            ModuleName::PetIsotope => "petIsotopeModule",
            ModuleName::OverlayPlane => "overlayPlaneModule",
            ModuleName::Patient => "patientModule",
            ModuleName::GeneralImage => "generalImageModule",
            ModuleName::GeneralStudy => "generalStudyModule",
            ModuleName::Cine => "cineModule",
            ModuleName::Study => "study",
            ModuleName::Series => "series",
            ModuleName::PatientSummary => "patient",
            ModuleName::FrameNumber => "frameNumber",
        }
    }
}

impl FromStr for ModuleName {
    type Err = UnknownModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleName::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownModuleError { name: s.to_string() })
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! module_view {
    (
        $(#[$meta:meta])*
        $name:ident {
            $(
                $(#[serde(rename = $rename:literal)])?
                $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            $(
                $(#[serde(rename = $rename)])?
                #[serde(skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }
    };
}

module_view! {
    GeneralSeriesModule {
        modality: String,
        #[serde(rename = "seriesInstanceUID")]
        series_instance_uid: String,
        series_number: i64,
        #[serde(rename = "studyInstanceUID")]
        study_instance_uid: String,
        series_date: NaiveDate,
        series_time: NaiveTime,
    }
}

module_view! {
    PatientStudyModule {
        patient_age: String,
        patient_size: f64,
        patient_weight: f64,
    }
}

module_view! {
    ImagePlaneModule {
        #[serde(rename = "frameOfReferenceUID")]
        frame_of_reference_uid: String,
        rows: u32,
        columns: u32,
        image_orientation_patient: Vec<f64>,
        row_cosines: Vec<f64>,
        column_cosines: Vec<f64>,
        image_position_patient: Vec<f64>,
        slice_thickness: f64,
        slice_location: f64,
        pixel_spacing: Vec<f64>,
        row_pixel_spacing: f64,
        column_pixel_spacing: f64,
    }
}

module_view! {
    ImagePixelModule {
        samples_per_pixel: u32,
        photometric_interpretation: String,
        rows: u32,
        columns: u32,
        bits_allocated: u32,
        bits_stored: u32,
        high_bit: u32,
        pixel_representation: u32,
        planar_configuration: u32,
        pixel_aspect_ratio: Vec<f64>,
        smallest_pixel_value: f64,
        largest_pixel_value: f64,
        red_palette_color_lookup_table_descriptor: Vec<f64>,
        green_palette_color_lookup_table_descriptor: Vec<f64>,
        blue_palette_color_lookup_table_descriptor: Vec<f64>,
        red_palette_color_lookup_table_data: Vec<u16>,
        green_palette_color_lookup_table_data: Vec<u16>,
        blue_palette_color_lookup_table_data: Vec<u16>,
    }
}

module_view! {
    VoiLutModule {
        window_center: Vec<f64>,
        window_width: Vec<f64>,
    }
}

module_view! {
    ModalityLutModule {
        rescale_intercept: f64,
        rescale_slope: f64,
        rescale_type: String,
    }
}

module_view! {
    SopCommonModule {
        #[serde(rename = "sopClassUID")]
        sop_class_uid: String,
        #[serde(rename = "sopInstanceUID")]
        sop_instance_uid: String,
    }
}

module_view! {
    RadiopharmaceuticalInfoView {
        radiopharmaceutical_start_time: NaiveTime,
        radionuclide_total_dose: f64,
        radionuclide_half_life: f64,
    }
}

/// The PET isotope module.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PetIsotopeModule {
    pub radiopharmaceutical_info: RadiopharmaceuticalInfoView,
}

module_view! {
    /// One overlay plane with its data.
    OverlayView {
        rows: u32,
        columns: u32,
        #[serde(rename = "type")]
        overlay_type: String,
        x: f64,
        y: f64,
        pixel_data: OverlayPixelData,
        description: String,
        label: String,
        roi_area: f64,
        roi_mean: f64,
        roi_standard_deviation: f64,
    }
}

module_view! {
    PatientModule {
        patient_name: String,
        patient_id: String,
    }
}

module_view! {
    GeneralImageModule {
        instance_number: i64,
        lossy_image_compression: String,
        lossy_image_compression_ratio: f64,
        lossy_image_compression_method: String,
    }
}

module_view! {
    GeneralStudyModule {
        study_description: String,
        study_date: String,
        study_time: String,
        accession_number: String,
    }
}

module_view! {
    CineModule {
        frame_time: f64,
    }
}

/// Study attributes of an instance, named by keyword.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StudyView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accession_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(rename = "StudyInstanceUID", skip_serializing_if = "Option::is_none")]
    pub study_instance_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub study_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub study_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub study_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_history: Option<String>,
}

/// Series attributes of an instance, named by keyword,
/// with the number of instances indexed in the series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SeriesView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modality: Option<String>,
    #[serde(rename = "SeriesInstanceUID", skip_serializing_if = "Option::is_none")]
    pub series_instance_uid: Option<String>,
    #[serde(rename = "numImages", skip_serializing_if = "Option::is_none")]
    pub num_images: Option<usize>,
}

module_view! {
    /// Patient demographics in short form.
    PatientView {
        name: String,
        id: String,
        birth_date: String,
        sex: String,
        age: String,
    }
}

/// Facts about an instance which its record alone does not hold.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ViewContext {
    /// the number of instances indexed in the series of the instance
    pub num_images: Option<usize>,
    /// the frame named by the image reference
    pub frame_number: Option<u32>,
}

/// A module-shaped view of an instance record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModuleView {
    GeneralSeries(GeneralSeriesModule),
    PatientStudy(PatientStudyModule),
    ImagePlane(ImagePlaneModule),
    ImagePixel(ImagePixelModule),
    VoiLut(VoiLutModule),
    ModalityLut(ModalityLutModule),
    SopCommon(SopCommonModule),
    PetIsotope(PetIsotopeModule),
    OverlayPlane(Vec<OverlayView>),
    Patient(PatientModule),
    GeneralImage(GeneralImageModule),
    GeneralStudy(GeneralStudyModule),
    Cine(CineModule),
    Study(StudyView),
    Series(SeriesView),
    PatientSummary(PatientView),
    FrameNumber(u32),
}

/// Build the view of a module by name.
///
/// Unknown module names yield `None`.
pub fn adapt_by_name(
    module: &str,
    record: &InstanceRecord,
    context: &ViewContext,
) -> Option<ModuleView> {
    adapt_in(module.parse().ok()?, record, context)
}

/// Build the view of a module, without context.
pub fn adapt(module: ModuleName, record: &InstanceRecord) -> Option<ModuleView> {
    adapt_in(module, record, &ViewContext::default())
}

/// Build the view of a module.
///
/// Returns `None` only for the PET isotope module
/// of an instance without radiopharmaceutical information,
/// and for the frame number when the context names no frame.
pub fn adapt_in(
    module: ModuleName,
    record: &InstanceRecord,
    context: &ViewContext,
) -> Option<ModuleView> {
    let r = record;
    let view = match module {
        ModuleName::GeneralSeries => ModuleView::GeneralSeries(GeneralSeriesModule {
            modality: r.modality.clone(),
            series_instance_uid: r.series_instance_uid.clone(),
            series_number: r.series_number,
            study_instance_uid: r.study_instance_uid.clone(),
            series_date: r.series_date.as_deref().and_then(parse_date),
            series_time: r.series_time.as_deref().and_then(parse_time),
        }),
        ModuleName::PatientStudy => ModuleView::PatientStudy(PatientStudyModule {
            patient_age: r.patient_age.clone(),
            patient_size: r.patient_size,
            patient_weight: r.patient_weight,
        }),
        ModuleName::ImagePlane => {
            let pixel_spacing = r
                .pixel_spacing
                .clone()
                .or_else(|| r.imager_pixel_spacing.clone());
            let orientation = r.image_orientation_patient.as_deref();
            ModuleView::ImagePlane(ImagePlaneModule {
                frame_of_reference_uid: r.frame_of_reference_uid.clone(),
                rows: r.rows,
                columns: r.columns,
                image_orientation_patient: r.image_orientation_patient.clone(),
                row_cosines: orientation.and_then(|o| o.get(0..3)).map(<[f64]>::to_vec),
                column_cosines: orientation.and_then(|o| o.get(3..6)).map(<[f64]>::to_vec),
                image_position_patient: r.image_position_patient.clone(),
                slice_thickness: r.slice_thickness,
                slice_location: r.slice_location,
                row_pixel_spacing: pixel_spacing.as_ref().and_then(|s| s.first().copied()),
                column_pixel_spacing: pixel_spacing.as_ref().and_then(|s| s.get(1).copied()),
                pixel_spacing,
            })
        }
        ModuleName::ImagePixel => ModuleView::ImagePixel(ImagePixelModule {
            samples_per_pixel: r.samples_per_pixel,
            photometric_interpretation: r.photometric_interpretation.clone(),
            rows: r.rows,
            columns: r.columns,
            bits_allocated: r.bits_allocated,
            bits_stored: r.bits_stored,
            high_bit: r.high_bit,
            pixel_representation: r.pixel_representation,
            planar_configuration: r.planar_configuration,
            pixel_aspect_ratio: r.pixel_aspect_ratio.clone(),
            smallest_pixel_value: r.smallest_image_pixel_value,
            largest_pixel_value: r.largest_image_pixel_value,
            red_palette_color_lookup_table_descriptor: r
                .red_palette_color_lookup_table_descriptor
                .clone(),
            green_palette_color_lookup_table_descriptor: r
                .green_palette_color_lookup_table_descriptor
                .clone(),
            blue_palette_color_lookup_table_descriptor: r
                .blue_palette_color_lookup_table_descriptor
                .clone(),
            red_palette_color_lookup_table_data: r.red_palette_color_lookup_table_data.clone(),
            green_palette_color_lookup_table_data: r
                .green_palette_color_lookup_table_data
                .clone(),
            blue_palette_color_lookup_table_data: r.blue_palette_color_lookup_table_data.clone(),
        }),
        ModuleName::VoiLut => ModuleView::VoiLut(VoiLutModule {
            window_center: r.window_center.clone(),
            window_width: r.window_width.clone(),
        }),
        ModuleName::ModalityLut => ModuleView::ModalityLut(ModalityLutModule {
            rescale_intercept: r.rescale_intercept,
            rescale_slope: r.rescale_slope,
            rescale_type: r.rescale_type.clone(),
        }),
        ModuleName::SopCommon => ModuleView::SopCommon(SopCommonModule {
            sop_class_uid: r.sop_class_uid.clone(),
            sop_instance_uid: r.sop_instance_uid.clone(),
        }),
        ModuleName::PetIsotope => {
            let info = r.radiopharmaceutical_info.as_ref()?;
            ModuleView::PetIsotope(PetIsotopeModule {
                radiopharmaceutical_info: RadiopharmaceuticalInfoView {
                    radiopharmaceutical_start_time: info
                        .radiopharmaceutical_start_time
                        .as_deref()
                        .and_then(parse_time),
                    radionuclide_total_dose: info.radionuclide_total_dose,
                    radionuclide_half_life: info.radionuclide_half_life,
                },
            })
        }
        ModuleName::OverlayPlane => ModuleView::OverlayPlane(
            r.overlays
                .iter()
                .flatten()
                .filter(|o| o.overlay_data.is_some())
                .map(|o| {
                    let origin = o.overlay_origin.as_deref();
                    OverlayView {
                        rows: o.overlay_rows,
                        columns: o.overlay_columns,
                        overlay_type: o.overlay_type.clone(),
                        x: origin.and_then(|v| v.first().copied()),
                        y: origin.and_then(|v| v.get(1).copied()),
                        pixel_data: o.overlay_data.clone(),
                        description: o.overlay_description.clone(),
                        label: o.overlay_label.clone(),
                        roi_area: o.roi_area,
                        roi_mean: o.roi_mean,
                        roi_standard_deviation: o.roi_standard_deviation,
                    }
                })
                .collect(),
        ),
        ModuleName::Patient => ModuleView::Patient(PatientModule {
            patient_name: r.patient_name.clone(),
            patient_id: r.patient_id.clone(),
        }),
        ModuleName::GeneralImage => ModuleView::GeneralImage(GeneralImageModule {
            instance_number: r.instance_number,
            lossy_image_compression: r.lossy_image_compression.clone(),
            lossy_image_compression_ratio: r.lossy_image_compression_ratio,
            lossy_image_compression_method: r.lossy_image_compression_method.clone(),
        }),
        ModuleName::GeneralStudy => ModuleView::GeneralStudy(GeneralStudyModule {
            study_description: r.study_description.clone(),
            study_date: r.study_date.clone(),
            study_time: r.study_time.clone(),
            accession_number: r.accession_number.clone(),
        }),
        ModuleName::Cine => ModuleView::Cine(CineModule {
            frame_time: r.frame_time,
        }),
        ModuleName::Study => ModuleView::Study(StudyView {
            accession_number: r.accession_number.clone(),
            patient_id: r.patient_id.clone(),
            study_instance_uid: r.study_instance_uid.clone(),
            study_date: r.study_date.clone(),
            study_time: r.study_time.clone(),
            study_description: r.study_description.clone(),
            institution_name: r.institution_name.clone(),
            patient_history: r.additional_patient_history.clone(),
        }),
        ModuleName::Series => ModuleView::Series(SeriesView {
            series_description: r.series_description.clone(),
            series_number: r.series_number,
            series_date: r.series_date.clone(),
            series_time: r.series_time.clone(),
            modality: r.modality.clone(),
            series_instance_uid: r.series_instance_uid.clone(),
            num_images: context.num_images,
        }),
        ModuleName::PatientSummary => ModuleView::PatientSummary(PatientView {
            name: r.patient_name.clone(),
            id: r.patient_id.clone(),
            birth_date: r.patient_birth_date.clone(),
            sex: r.patient_sex.clone(),
            age: r.patient_age.clone(),
        }),
        ModuleName::FrameNumber => ModuleView::FrameNumber(context.frame_number?),
    };
    Some(view)
}
