//! Resolution of binary attribute values.
//!
//! A binary value may be delivered by reference to an external resource
//! ([`BinaryData::BulkDataUri`]), embedded as base64
//! ([`BinaryData::InlineBinary`]), or already decoded
//! ([`BinaryData::Bytes`]).
//! The [`BulkDataResolver`] turns any of these into bytes,
//! going through a [`BulkDataFetcher`] only for external references.
//!
//! Lookup table data is further decoded into entries
//! according to its descriptor (see [`decode_lut`]).

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use dicom_core::Tag;
use snafu::{ensure, OptionExt, ResultExt, Snafu};

use crate::dictionary::{BinaryData, TagValue};

/// Type alias for the boxed source of a network error.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error reported by a [`BulkDataFetcher`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FetchError {
    /// The resource does not exist
    #[snafu(display("Bulk data not found at {}", uri))]
    NotFound { uri: String },
    /// The resource could not be retrieved
    #[snafu(display("Could not retrieve bulk data from {}", uri))]
    Network { uri: String, source: BoxedError },
}

/// A collaborator able to retrieve bulk data by URI.
///
/// Implementations do not retry.
#[async_trait]
pub trait BulkDataFetcher: Send + Sync {
    /// Retrieve the full contents of the resource at `uri`.
    async fn fetch_bulk_data(&self, uri: &str) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
impl<F> BulkDataFetcher for Arc<F>
where
    F: BulkDataFetcher + ?Sized,
{
    async fn fetch_bulk_data(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        (**self).fetch_bulk_data(uri).await
    }
}

#[async_trait]
impl<F> BulkDataFetcher for &F
where
    F: BulkDataFetcher + ?Sized,
{
    async fn fetch_bulk_data(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        (**self).fetch_bulk_data(uri).await
    }
}

/// A fetcher for data sets which are read without network access.
///
/// Every external reference is reported as not found.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct OfflineFetcher;

#[async_trait]
impl BulkDataFetcher for OfflineFetcher {
    async fn fetch_bulk_data(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        NotFoundSnafu { uri }.fail()
    }
}

/// An error which may occur when resolving a binary value.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum BulkDataError {
    /// Neither an external reference nor inline data was provided
    #[snafu(display("Attribute {} has neither bulk data URI nor inline binary", tag))]
    MissingBulkData { tag: Tag },
    #[snafu(display("Inline binary of attribute {} is not valid base64", tag))]
    InvalidInlineBinary {
        tag: Tag,
        source: base64::DecodeError,
    },
    #[snafu(display("Missing lookup table descriptor for attribute {}", tag))]
    MissingLutDescriptor { tag: Tag },
    #[snafu(display(
        "Lookup table {} needs {} bytes but only {} were provided",
        tag,
        expected,
        actual
    ))]
    TruncatedLut {
        tag: Tag,
        expected: usize,
        actual: usize,
    },
    #[snafu(display("Could not fetch bulk data of attribute {}", tag))]
    Fetch { tag: Tag, source: FetchError },
}

/// A lookup table descriptor: `[entries, first mapped value, bits per entry]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LutDescriptor {
    /// number of entries in the table
    pub entries: usize,
    /// first input value mapped
    pub first_mapped: i32,
    /// number of bits in each entry
    pub bits_per_entry: u8,
}

impl LutDescriptor {
    /// Interpret the three values of a lookup table descriptor.
    ///
    /// An entry count of 0 stands for 65536 entries.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let [entries, first_mapped, bits] = values.get(..3)? else {
            return None;
        };
        if !(entries.is_finite() && first_mapped.is_finite() && bits.is_finite()) {
            return None;
        }
        let entries = match *entries as i64 {
            0 => 65_536,
            n if n > 0 => n as usize,
            _ => return None,
        };
        Some(LutDescriptor {
            entries,
            first_mapped: *first_mapped as i32,
            bits_per_entry: *bits as u8,
        })
    }

    /// The number of bytes needed to encode the table.
    pub fn byte_len(&self) -> usize {
        if self.bits_per_entry == 16 {
            self.entries * 2
        } else {
            self.entries
        }
    }
}

/// Decode lookup table entries from their encoded bytes.
///
/// With 16 bits per entry, each entry is a little endian pair;
/// otherwise each entry is a single byte.
/// Trailing bytes beyond the described entries are ignored.
pub fn decode_lut(tag: Tag, descriptor: &LutDescriptor, bytes: &[u8]) -> Result<Vec<u16>, BulkDataError> {
    let expected = descriptor.byte_len();
    ensure!(
        bytes.len() >= expected,
        TruncatedLutSnafu {
            tag,
            expected,
            actual: bytes.len(),
        }
    );
    let bytes = &bytes[..expected];
    let lut = if descriptor.bits_per_entry == 16 {
        bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    } else {
        bytes.iter().map(|&b| u16::from(b)).collect()
    };
    Ok(lut)
}

/// Resolves binary values through a fetcher.
#[derive(Debug)]
pub struct BulkDataResolver<'a, F: ?Sized> {
    fetcher: &'a F,
    wado_root: Option<&'a str>,
}

impl<'a, F> BulkDataResolver<'a, F>
where
    F: BulkDataFetcher + ?Sized,
{
    /// Create a resolver.
    ///
    /// `wado_root` is the root URL of the server
    /// which delivered the data set, if known.
    pub fn new(fetcher: &'a F, wado_root: Option<&'a str>) -> Self {
        BulkDataResolver { fetcher, wado_root }
    }

    /// The URI actually fetched for a bulk data URI.
    ///
    /// Servers behind an SSL-terminating proxy may hand out `http` bulk
    /// data URIs. When the server root uses `https`
    /// and the URI does not mention `https`,
    /// its first `http` is upgraded.
    pub fn effective_uri<'u>(&self, uri: &'u str) -> Cow<'u, str> {
        match self.wado_root {
            Some(root) if root.starts_with("https") && !uri.contains("https") => {
                Cow::Owned(uri.replacen("http", "https", 1))
            }
            _ => Cow::Borrowed(uri),
        }
    }

    /// Obtain the bytes of a binary value.
    pub async fn resolve_bytes(&self, tag: Tag, data: &BinaryData) -> Result<Vec<u8>, BulkDataError> {
        match data {
            BinaryData::BulkDataUri(uri) => {
                let uri = self.effective_uri(uri);
                tracing::debug!("Fetching bulk data of {} from {}", tag, uri);
                self.fetcher
                    .fetch_bulk_data(&uri)
                    .await
                    .context(FetchSnafu { tag })
            }
            BinaryData::InlineBinary(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .context(InvalidInlineBinarySnafu { tag }),
            BinaryData::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Obtain and decode the entries of a lookup table.
    ///
    /// Lookup table data already delivered as numbers
    /// is taken as the table entries.
    pub async fn resolve_lut(
        &self,
        tag: Tag,
        data: Option<&TagValue>,
        descriptor: Option<&[f64]>,
    ) -> Result<Vec<u16>, BulkDataError> {
        let descriptor = descriptor
            .and_then(LutDescriptor::from_values)
            .context(MissingLutDescriptorSnafu { tag })?;
        match data {
            Some(TagValue::Binary(data)) => {
                let bytes = self.resolve_bytes(tag, data).await?;
                decode_lut(tag, &descriptor, &bytes)
            }
            Some(TagValue::Numbers(values)) if !values.is_empty() => {
                ensure!(
                    values.len() >= descriptor.entries,
                    TruncatedLutSnafu {
                        tag,
                        expected: descriptor.byte_len(),
                        actual: values.len() * 2,
                    }
                );
                Ok(values[..descriptor.entries]
                    .iter()
                    .map(|&v| v.clamp(0., f64::from(u16::MAX)) as u16)
                    .collect())
            }
            _ => MissingBulkDataSnafu { tag }.fail(),
        }
    }
}
