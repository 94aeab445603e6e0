use bytes::Bytes;
use dicom_metadata::TagDictionary;
use futures_util::{stream, StreamExt};
use multipart_rs::{MultipartReader, MultipartType};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use snafu::{OptionExt, ResultExt};

use crate::{
    ContentTypeParseFailedSnafu, DicomWebClient, DicomWebError, EmptyResponseSnafu,
    MissingContentTypeHeaderSnafu, MultipartReaderFailedSnafu, ParseFailedSnafu,
    ReadBodyFailedSnafu, RequestFailedSnafu,
};

/// Media types accepted for DICOM JSON metadata.
const METADATA_TYPES: [&str; 2] = ["application/dicom+json", "application/json"];

fn content_type(headers: &HeaderMap) -> Result<mime::Mime, DicomWebError> {
    let ct = headers
        .get(CONTENT_TYPE)
        .context(MissingContentTypeHeaderSnafu)?;
    let ct = ct.to_str().map_err(|_| DicomWebError::UnexpectedContentType {
        content_type: String::from_utf8_lossy(ct.as_bytes()).into_owned(),
    })?;
    ct.parse().context(ContentTypeParseFailedSnafu)
}

async fn send(
    client: &DicomWebClient,
    url: &str,
    accept: &str,
) -> Result<reqwest::Response, DicomWebError> {
    tracing::debug!("GET {}", url);
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, accept)
        .send()
        .await
        .context(RequestFailedSnafu { url })?;

    if !response.status().is_success() {
        return Err(DicomWebError::HttpStatusFailure {
            status_code: response.status(),
        });
    }
    Ok(response)
}

/// A request for the DICOM JSON metadata of one or more instances.
#[derive(Debug, Clone)]
pub struct WadoMetadataRequest {
    client: DicomWebClient,
    url: String,
}

impl WadoMetadataRequest {
    pub fn new(client: DicomWebClient, url: String) -> Self {
        WadoMetadataRequest { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn run(&self) -> Result<Vec<TagDictionary>, DicomWebError> {
        let response = send(&self.client, &self.url, METADATA_TYPES[0]).await?;

        // Check if the response is a DICOM-JSON
        let ct = content_type(response.headers())?;
        if !METADATA_TYPES.contains(&ct.essence_str()) {
            return Err(DicomWebError::UnexpectedContentType {
                content_type: ct.to_string(),
            });
        }

        let body = response.bytes().await.context(ReadBodyFailedSnafu)?;
        TagDictionary::list_from_json_slice(&body).context(ParseFailedSnafu)
    }
}

/// A request for the contents of a bulk data resource.
///
/// Servers may answer with the raw bytes
/// or with a `multipart/related` message,
/// in which case the first part is taken.
#[derive(Debug, Clone)]
pub struct BulkDataRequest {
    client: DicomWebClient,
    url: String,
}

impl BulkDataRequest {
    pub fn new(client: DicomWebClient, url: String) -> Self {
        BulkDataRequest { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn run(&self) -> Result<Vec<u8>, DicomWebError> {
        let response = send(
            &self.client,
            &self.url,
            "multipart/related; type=\"application/octet-stream\", application/octet-stream",
        )
        .await?;

        let ct = content_type(response.headers())?;
        if ct.type_() != mime::MULTIPART {
            let body = response.bytes().await.context(ReadBodyFailedSnafu)?;
            return Ok(body.to_vec());
        }

        // Build the MultipartReader
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from(v.to_str().unwrap_or(""))))
            .collect();
        // the reader only recognizes a delimiter line ending in CRLF,
        // which servers may omit after the closing delimiter
        let stream = response
            .bytes_stream()
            .chain(stream::once(async { Ok(Bytes::from_static(b"\r\n")) }));
        let mut reader = MultipartReader::from_stream_with_headers(stream, &headers)
            .context(MultipartReaderFailedSnafu)?;

        if reader.multipart_type != MultipartType::Related {
            return Err(DicomWebError::UnexpectedMultipartType {
                multipart_type: reader.multipart_type,
            });
        }

        let mut data = None;
        while let Some(part) = reader.next().await {
            let part = part.context(MultipartReaderFailedSnafu)?;
            if data.is_none() {
                data = Some(part.data.to_vec());
            }
        }
        data.context(EmptyResponseSnafu)
    }
}

impl DicomWebClient {
    pub fn retrieve_study_metadata(&self, study_instance_uid: &str) -> WadoMetadataRequest {
        let url = format!("{}/studies/{}/metadata", self.wado_url, study_instance_uid);
        WadoMetadataRequest::new(self.clone(), url)
    }

    pub fn retrieve_series_metadata(
        &self,
        study_instance_uid: &str,
        series_instance_uid: &str,
    ) -> WadoMetadataRequest {
        let base_url = &self.wado_url;
        let url = format!(
            "{base_url}/studies/{study_instance_uid}/series/{series_instance_uid}/metadata"
        );
        WadoMetadataRequest::new(self.clone(), url)
    }

    pub fn retrieve_instance_metadata(
        &self,
        study_instance_uid: &str,
        series_instance_uid: &str,
        sop_instance_uid: &str,
    ) -> WadoMetadataRequest {
        let base_url = &self.wado_url;
        let url = format!(
            "{base_url}/studies/{study_instance_uid}/series/{series_instance_uid}/instances/{sop_instance_uid}/metadata",
        );
        WadoMetadataRequest::new(self.clone(), url)
    }

    /// Retrieve a bulk data resource by its absolute URI.
    pub fn retrieve_bulk_data(&self, uri: &str) -> BulkDataRequest {
        BulkDataRequest::new(self.clone(), uri.to_string())
    }
}
