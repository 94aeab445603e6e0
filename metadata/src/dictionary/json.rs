//! DICOM JSON decoding into tag dictionaries

use std::str::FromStr;

use dicom_core::{Tag, VR};
use serde::de::{Deserialize, Error as _, IgnoredAny, Visitor};

use super::value::{DicomJsonPerson, NumberOrText};
use super::{BinaryData, TagDictionary, TagEntry, TagValue};

/// One or many data sets in a DICOM JSON document.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum DocumentItems {
    Many(Vec<TagDictionary>),
    One(TagDictionary),
}

impl DocumentItems {
    pub(crate) fn into_vec(self) -> Vec<TagDictionary> {
        match self {
            DocumentItems::Many(items) => items,
            DocumentItems::One(item) => vec![item],
        }
    }
}

#[derive(Debug)]
struct TagDictionaryVisitor;

impl<'de> Visitor<'de> for TagDictionaryVisitor {
    type Value = TagDictionary;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a DICOM data set map")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut dict = TagDictionary::new();
        while let Some((JsonTag(tag), entry)) = map.next_entry::<JsonTag, TagEntry>()? {
            dict.insert(tag, entry);
        }
        Ok(dict)
    }
}

impl<'de> Deserialize<'de> for TagDictionary {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(TagDictionaryVisitor)
    }
}

#[derive(Debug)]
struct TagEntryVisitor;

impl<'de> Visitor<'de> for TagEntryVisitor {
    type Value = TagEntry;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a data element object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut vr = None;
        let mut value: Option<serde_json::Value> = None;
        let mut inline_binary = None;
        let mut bulk_data_uri = None;

        while let Some(key) = map.next_key::<String>()? {
            match &*key {
                "vr" => {
                    if vr.is_some() {
                        return Err(A::Error::custom("\"vr\" should only be set once"));
                    }

                    let val: String = map.next_value()?;
                    vr = Some(VR::from_str(&val).unwrap_or(VR::UN));
                }
                "Value" => {
                    if inline_binary.is_some() {
                        return Err(A::Error::custom(
                            "\"Value\" conflicts with \"InlineBinary\"",
                        ));
                    }

                    if bulk_data_uri.is_some() {
                        return Err(A::Error::custom("\"Value\" conflicts with \"BulkDataURI\""));
                    }

                    value = Some(map.next_value()?);
                }
                "InlineBinary" => {
                    if value.is_some() {
                        return Err(A::Error::custom(
                            "\"InlineBinary\" conflicts with \"Value\"",
                        ));
                    }

                    if bulk_data_uri.is_some() {
                        return Err(A::Error::custom(
                            "\"InlineBinary\" conflicts with \"BulkDataURI\"",
                        ));
                    }
                    let val: String = map.next_value()?;
                    inline_binary = Some(val);
                }
                "BulkDataURI" => {
                    if value.is_some() {
                        return Err(A::Error::custom("\"BulkDataURI\" conflicts with \"Value\""));
                    }

                    if inline_binary.is_some() {
                        return Err(A::Error::custom(
                            "\"BulkDataURI\" conflicts with \"InlineBinary\"",
                        ));
                    }
                    let val: String = map.next_value()?;
                    bulk_data_uri = Some(val);
                }
                other => {
                    tracing::warn!("ignoring unrecognized data element field `{}`", other);
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        let Some(vr) = vr else {
            return Err(A::Error::custom("missing VR field"));
        };

        let value = match (value, inline_binary, bulk_data_uri) {
            (Some(value), None, None) => decode_value(vr, value).map_err(A::Error::custom)?,
            (None, Some(inline_binary), None) => {
                TagValue::Binary(BinaryData::InlineBinary(inline_binary))
            }
            (None, None, Some(uri)) => TagValue::Binary(BinaryData::BulkDataUri(uri)),
            _ => TagValue::Empty,
        };

        Ok(TagEntry { vr, value })
    }
}

/// Decode the `Value` array of a data element,
/// in a different way depending on its VR.
fn decode_value(vr: VR, value: serde_json::Value) -> Result<TagValue, serde_json::Error> {
    if value.is_null() {
        return Ok(TagValue::Empty);
    }
    let value = match vr {
        VR::SQ => {
            let items: Vec<TagDictionary> = serde_json::from_value(value)?;
            TagValue::Sequence(items)
        }
        VR::PN => {
            let items: Vec<Option<DicomJsonPerson>> = serde_json::from_value(value)?;
            TagValue::Strings(
                items
                    .into_iter()
                    .map(|p| p.map(DicomJsonPerson::into_alphabetic).unwrap_or_default())
                    .collect(),
            )
        }
        VR::AT => {
            let items: Vec<String> = serde_json::from_value(value)?;
            TagValue::Strings(items.into_iter().map(|t| t.to_uppercase()).collect())
        }
        // sometimes numbers, sometimes text
        VR::SS
        | VR::US
        | VR::SL
        | VR::UL
        | VR::SV
        | VR::UV
        | VR::FL
        | VR::FD
        | VR::DS
        | VR::IS
        | VR::OB
        | VR::OW
        | VR::OF
        | VR::OD
        | VR::OL
        | VR::OV => {
            let items: Vec<Option<NumberOrText<f64>>> = serde_json::from_value(value)?;
            let numbers: Result<Vec<f64>, _> = items
                .iter()
                .map(|v| match v {
                    Some(v) => v.to_num(),
                    None => Ok(f64::NAN),
                })
                .collect();
            match numbers {
                Ok(numbers) => TagValue::Numbers(numbers),
                // keep malformed numbers as text, numeric accessors reject them
                Err(_) => TagValue::Strings(
                    items
                        .into_iter()
                        .map(|v| v.map(|v| v.to_string()).unwrap_or_default())
                        .collect(),
                ),
            }
        }
        VR::UN => {
            tracing::warn!("can't interpret JSON Value in UN, keeping no value");
            TagValue::Empty
        }
        // always text
        _ => {
            let items: Vec<Option<String>> = serde_json::from_value(value)?;
            TagValue::Strings(items.into_iter().map(Option::unwrap_or_default).collect())
        }
    };
    Ok(value)
}

impl<'de> Deserialize<'de> for TagEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_struct(
            "DataElement",
            &["vr", "Value", "InlineBinary", "BulkDataURI"],
            TagEntryVisitor,
        )
    }
}

/// A tag written as `GGGGEEEE` in a DICOM JSON map key.
#[derive(Debug)]
struct JsonTag(Tag);

#[derive(Debug)]
struct TagVisitor;

impl Visitor<'_> for TagVisitor {
    type Value = Tag;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a DICOM tag string in the form \"GGGGEEEE\"")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for JsonTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(TagVisitor).map(JsonTag)
    }
}
