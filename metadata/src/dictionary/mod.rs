//! Tag dictionaries: DICOM data sets as delivered by a parser or server.
//!
//! A [`TagDictionary`] is an ordered mapping from attribute [`Tag`]s
//! to [`TagEntry`] values.
//! It may be decoded from DICOM JSON (see [`TagDictionary::from_json_str`])
//! or converted from a P10 object read with `dicom-object`
//! (see [`TagDictionary::from_p10`]).
//!
//! Unlike an in-memory DICOM object,
//! a tag dictionary keeps binary attributes in their delivered form:
//! an external bulk data URI,
//! a base64 inline binary string,
//! or raw bytes.
//! Resolving them is left to the [`bulk`](crate::bulk) module.
//!
//! All typed accessors fail closed:
//! a missing attribute, an empty value, or a value of the wrong kind
//! yields `None`.
//!
//! # Example
//!
//! ```
//! # use dicom_dictionary_std::tags;
//! # use dicom_metadata::TagDictionary;
//! let dict = TagDictionary::from_json_str(r#"{
//!     "00280010": { "vr": "US", "Value": [512] },
//!     "00280030": { "vr": "DS", "Value": ["0.5\\0.25"] }
//! }"#)?;
//!
//! assert_eq!(dict.get_int(tags::ROWS), Some(512));
//! assert_eq!(dict.get_number_array(tags::PIXEL_SPACING), Some(vec![0.5, 0.25]));
//! assert_eq!(dict.get_str(tags::ROWS), None);
//! # Ok::<(), dicom_metadata::dictionary::ParseError>(())
//! ```

use std::collections::BTreeMap;

use dicom_core::{PrimitiveValue, Tag, VR};
use dicom_object::InMemDicomObject;
use serde::Serialize;
use snafu::{ResultExt, Snafu};

mod json;
mod value;

/// An error which may occur when reading a data set.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ParseError {
    /// The DICOM JSON document could not be decoded
    #[snafu(display("Could not decode DICOM JSON data set"))]
    Json { source: serde_json::Error },
    /// The P10 byte stream could not be read
    #[snafu(display("Could not read DICOM P10 data set"))]
    ReadP10 { source: dicom_object::ReadError },
}

/// A binary value which is not held as a list of numbers or strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BinaryData {
    /// The value is stored elsewhere and must be retrieved from this URI
    #[serde(rename = "BulkDataURI")]
    BulkDataUri(String),
    /// The value is embedded as a base64 string
    InlineBinary(String),
    /// The value is already decoded
    Bytes(Vec<u8>),
}

/// The value of a tag dictionary entry.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// No value
    Empty,
    /// Textual values, including person names (alphabetic component)
    /// and attribute tags (as `GGGGEEEE`)
    Strings(Vec<String>),
    /// Numeric values
    Numbers(Vec<f64>),
    /// A sequence of nested data sets
    Sequence(Vec<TagDictionary>),
    /// A binary value or a reference to one
    Binary(BinaryData),
}

/// An entry in a tag dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct TagEntry {
    /// the value representation
    pub vr: VR,
    /// the value
    pub value: TagValue,
}

impl TagEntry {
    /// Create a new entry.
    pub fn new(vr: VR, value: TagValue) -> Self {
        TagEntry { vr, value }
    }
}

/// An ordered mapping from DICOM tags to their entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagDictionary {
    entries: BTreeMap<Tag, TagEntry>,
}

impl TagDictionary {
    /// Create an empty tag dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a tag dictionary from a DICOM JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ParseError> {
        serde_json::from_str(json).context(JsonSnafu)
    }

    /// Decode a tag dictionary from DICOM JSON bytes.
    pub fn from_json_slice(json: &[u8]) -> Result<Self, ParseError> {
        serde_json::from_slice(json).context(JsonSnafu)
    }

    /// Decode a tag dictionary from a DICOM JSON value.
    pub fn from_json_value(json: serde_json::Value) -> Result<Self, ParseError> {
        serde_json::from_value(json).context(JsonSnafu)
    }

    /// Decode a list of tag dictionaries,
    /// as returned by the WADO-RS metadata resources.
    ///
    /// A single data set object is also accepted.
    pub fn list_from_json_slice(json: &[u8]) -> Result<Vec<Self>, ParseError> {
        let document: json::DocumentItems = serde_json::from_slice(json).context(JsonSnafu)?;
        Ok(document.into_vec())
    }

    /// Read a DICOM P10 byte stream into a tag dictionary.
    ///
    /// The 128-byte preamble is optional.
    /// Elements are converted as in [`From<&InMemDicomObject>`](#impl-From%3C%26InMemDicomObject%3E-for-TagDictionary),
    /// file meta group attributes are left out.
    pub fn from_p10(bytes: &[u8]) -> Result<Self, ParseError> {
        let bytes = strip_preamble(bytes);
        let obj = dicom_object::from_reader(bytes).context(ReadP10Snafu)?;
        Ok(TagDictionary::from(&*obj))
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry, returning the one it replaced.
    pub fn insert(&mut self, tag: Tag, entry: TagEntry) -> Option<TagEntry> {
        self.entries.insert(tag, entry)
    }

    /// Iterate over all entries in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (&Tag, &TagEntry)> {
        self.entries.iter()
    }

    /// Retrieve an entry.
    pub fn get(&self, tag: Tag) -> Option<&TagEntry> {
        self.entries.get(&tag)
    }

    /// Whether the dictionary holds an entry for this tag.
    pub fn contains(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Retrieve all textual values of an attribute.
    pub fn get_strings(&self, tag: Tag) -> Option<&[String]> {
        match &self.get(tag)?.value {
            TagValue::Strings(values) if !values.is_empty() => Some(values),
            _ => None,
        }
    }

    /// Retrieve the first textual value of an attribute,
    /// if it is not empty.
    pub fn get_str(&self, tag: Tag) -> Option<&str> {
        self.get_strings(tag)?
            .first()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Retrieve the first value of a numeric attribute.
    pub fn get_number(&self, tag: Tag) -> Option<f64> {
        match &self.get(tag)?.value {
            TagValue::Numbers(values) => values.first().copied(),
            TagValue::Strings(_) => self.get_number_array(tag)?.first().copied(),
            _ => None,
        }
    }

    /// Retrieve the first value of a numeric attribute
    /// if it is integral.
    pub fn get_int(&self, tag: Tag) -> Option<i64> {
        let number = self.get_number(tag)?;
        if number.fract() == 0. && number >= i64::MIN as f64 && number <= i64::MAX as f64 {
            Some(number as i64)
        } else {
            None
        }
    }

    /// Retrieve all values of a numeric attribute.
    ///
    /// Textual values are parsed,
    /// splitting backslash-delimited multi-values.
    /// If any of them is not a number, `None` is returned.
    pub fn get_number_array(&self, tag: Tag) -> Option<Vec<f64>> {
        let numbers = match &self.get(tag)?.value {
            TagValue::Numbers(values) => values.clone(),
            TagValue::Strings(values) => values
                .iter()
                .flat_map(|v| v.split('\\'))
                .map(|v| v.trim().parse::<f64>().ok())
                .collect::<Option<Vec<_>>>()?,
            _ => return None,
        };
        if numbers.is_empty() {
            None
        } else {
            Some(numbers)
        }
    }

    /// Retrieve the items of a non-empty sequence.
    pub fn get_sequence(&self, tag: Tag) -> Option<&[TagDictionary]> {
        match &self.get(tag)?.value {
            TagValue::Sequence(items) if !items.is_empty() => Some(items),
            _ => None,
        }
    }

    /// Retrieve a binary value or a reference to one.
    pub fn get_binary(&self, tag: Tag) -> Option<&BinaryData> {
        match &self.get(tag)?.value {
            TagValue::Binary(data) => Some(data),
            _ => None,
        }
    }
}

impl FromIterator<(Tag, TagEntry)> for TagDictionary {
    fn from_iter<T: IntoIterator<Item = (Tag, TagEntry)>>(iter: T) -> Self {
        TagDictionary {
            entries: iter.into_iter().collect(),
        }
    }
}

impl From<&InMemDicomObject> for TagDictionary {
    fn from(obj: &InMemDicomObject) -> Self {
        let mut dict = TagDictionary::new();
        for elem in obj {
            let tag = elem.header().tag;
            let vr = elem.vr();
            let value = if let Some(items) = elem.value().items() {
                TagValue::Sequence(items.iter().map(TagDictionary::from).collect())
            } else if let Some(value) = elem.value().primitive() {
                primitive_to_tag_value(vr, value)
            } else {
                // encapsulated pixel data is of no use here
                continue;
            };
            dict.insert(tag, TagEntry::new(vr, value));
        }
        dict
    }
}

fn primitive_to_tag_value(vr: VR, value: &PrimitiveValue) -> TagValue {
    if let PrimitiveValue::Empty = value {
        return TagValue::Empty;
    }
    match vr {
        VR::OB | VR::OD | VR::OF | VR::OL | VR::OV | VR::OW | VR::UN => {
            TagValue::Binary(BinaryData::Bytes(value.to_bytes().into_owned()))
        }
        VR::AT => match value {
            PrimitiveValue::Tags(tags) => TagValue::Strings(
                tags.iter()
                    .map(|t| format!("{:04X}{:04X}", t.group(), t.element()))
                    .collect(),
            ),
            _ => TagValue::Strings(trimmed_strings(value)),
        },
        VR::US | VR::SS | VR::UL | VR::SL | VR::UV | VR::SV | VR::FL | VR::FD | VR::DS
        | VR::IS => match value.to_multi_float64() {
            Ok(numbers) => TagValue::Numbers(numbers),
            Err(_) => TagValue::Strings(trimmed_strings(value)),
        },
        _ => TagValue::Strings(trimmed_strings(value)),
    }
}

fn trimmed_strings(value: &PrimitiveValue) -> Vec<String> {
    value
        .to_multi_str()
        .iter()
        .map(|s| s.trim_end_matches([' ', '\0']).to_string())
        .collect()
}

fn strip_preamble(bytes: &[u8]) -> &[u8] {
    match bytes.get(128..132) {
        Some(b"DICM") => &bytes[128..],
        _ => bytes,
    }
}
