//! DICOM JSON value shapes
use std::str::FromStr;

use serde::Deserialize;

/// A person name in DICOM JSON.
///
/// Only the alphabetic component is retained in tag dictionaries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DicomJsonPerson {
    #[serde(rename = "Alphabetic", default)]
    alphabetic: Option<String>,
    #[serde(rename = "Ideographic", default)]
    #[allow(dead_code)]
    ideographic: Option<String>,
    #[serde(rename = "Phonetic", default)]
    #[allow(dead_code)]
    phonetic: Option<String>,
}

impl DicomJsonPerson {
    pub fn into_alphabetic(self) -> String {
        self.alphabetic.unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NumberOrText<N> {
    Number(N),
    Text(String),
}

impl<N> NumberOrText<N>
where
    N: Clone,
    N: FromStr,
{
    pub fn to_num(&self) -> Result<N, <N as FromStr>::Err> {
        match self {
            NumberOrText::Number(num) => Ok(num.clone()),
            NumberOrText::Text(text) => text.trim().parse(),
        }
    }
}

impl<N> std::fmt::Display for NumberOrText<N>
where
    N: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NumberOrText::Number(number) => std::fmt::Display::fmt(number, f),
            NumberOrText::Text(text) => f.write_str(text),
        }
    }
}
