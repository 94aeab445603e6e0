//! Overlay planes.
//!
//! Overlays live in the repeating groups 6000 to 601E (even groups only).
//! Their data (gggg,3000) is a bit-packed plane,
//! least significant bit first.
use dicom_core::Tag;
use serde::Serialize;

use crate::dictionary::BinaryData;

/// The first overlay group.
pub const FIRST_OVERLAY_GROUP: u16 = 0x6000;
/// The last overlay group.
pub const LAST_OVERLAY_GROUP: u16 = 0x601E;

pub const OVERLAY_ROWS: u16 = 0x0010;
pub const OVERLAY_COLUMNS: u16 = 0x0011;
pub const OVERLAY_DESCRIPTION: u16 = 0x0022;
pub const OVERLAY_TYPE: u16 = 0x0040;
pub const OVERLAY_ORIGIN: u16 = 0x0050;
pub const ROI_AREA: u16 = 0x1301;
pub const ROI_MEAN: u16 = 0x1302;
pub const ROI_STANDARD_DEVIATION: u16 = 0x1303;
pub const OVERLAY_LABEL: u16 = 0x1500;
pub const OVERLAY_DATA: u16 = 0x3000;

/// Iterate over all overlay groups, in order.
pub fn overlay_groups() -> impl Iterator<Item = u16> {
    (FIRST_OVERLAY_GROUP..=LAST_OVERLAY_GROUP).step_by(2)
}

/// The tag of an attribute in an overlay group.
#[inline]
pub const fn overlay_tag(group: u16, element: u16) -> Tag {
    Tag(group, element)
}

/// Expand a bit-packed overlay into one byte per pixel.
///
/// Bit `i` of the input (least significant bit first within each byte)
/// becomes byte `i` of the output, either 0 or 1.
pub fn unpack(packed: &[u8]) -> Vec<u8> {
    packed
        .iter()
        .flat_map(|&byte| (0..8).map(move |bit| (byte >> bit) & 1))
        .collect()
}

/// Pack one byte per pixel into a bit-packed overlay.
///
/// Any non-zero byte sets its bit.
/// The last byte is padded with zero bits.
pub fn pack(unpacked: &[u8]) -> Vec<u8> {
    unpacked
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .filter(|(_, v)| **v != 0)
                .fold(0_u8, |acc, (bit, _)| acc | (1 << bit))
        })
        .collect()
}

/// The pixel data of an overlay plane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OverlayPixelData {
    /// Retrieved from a bulk data URI and expanded to one byte per pixel
    Unpacked(Vec<u8>),
    /// Delivered with the data set, still bit-packed
    Packed(BinaryData),
}

/// The attributes of one overlay plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OverlayPlane {
    /// the overlay group (0x6000 to 0x601E)
    #[serde(skip)]
    pub group: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_rows: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_columns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_origin: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_label: Option<String>,
    #[serde(rename = "ROIArea", skip_serializing_if = "Option::is_none")]
    pub roi_area: Option<f64>,
    #[serde(rename = "ROIMean", skip_serializing_if = "Option::is_none")]
    pub roi_mean: Option<f64>,
    #[serde(rename = "ROIStandardDeviation", skip_serializing_if = "Option::is_none")]
    pub roi_standard_deviation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_data: Option<OverlayPixelData>,
}
