//! DICOMweb retrieval of instance metadata and bulk data.
//!
//! [`DicomWebClient`] performs WADO-RS requests
//! for DICOM JSON metadata and for bulk data referenced by `BulkDataURI`.
//! It implements [`BulkDataFetcher`],
//! so that it can be handed to a
//! [`MetadataProvider`](dicom_metadata::MetadataProvider)
//! to resolve palette color lookup tables and overlay data.
use async_trait::async_trait;
use dicom_metadata::bulk::{FetchError, NotFoundSnafu};
use dicom_metadata::BulkDataFetcher;
use multipart_rs::MultipartType;
use reqwest::StatusCode;
use snafu::Snafu;

mod wado;

pub use wado::{BulkDataRequest, WadoMetadataRequest};

#[derive(Debug, Clone)]
pub struct DicomWebClient {
    wado_url: String,

    // Basic Auth
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    // Bearer Token
    pub(crate) bearer_token: Option<String>,

    pub(crate) client: reqwest::Client,
}

/// An error returned by a DICOMweb request.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DicomWebError {
    #[snafu(display("Failed to perform HTTP request to {}", url))]
    RequestFailed { url: String, source: reqwest::Error },
    #[snafu(display("Failed to read response body"))]
    ReadBodyFailed { source: reqwest::Error },
    #[snafu(display("Failed to parse DICOM JSON response"))]
    ParseFailed {
        source: dicom_metadata::dictionary::ParseError,
    },
    #[snafu(display("Failed to parse multipart response"))]
    MultipartReaderFailed {
        source: multipart_rs::MultipartError,
    },
    #[snafu(display("HTTP status code {} indicates failure", status_code))]
    HttpStatusFailure { status_code: StatusCode },
    #[snafu(display("Response missing Content-Type header"))]
    MissingContentTypeHeader,
    #[snafu(display("Unexpected content type: {}", content_type))]
    UnexpectedContentType { content_type: String },
    #[snafu(display("Failed to parse content type: {}", source))]
    ContentTypeParseFailed { source: mime::FromStrError },
    #[snafu(display("Unexpected multipart type: {:?}", multipart_type))]
    UnexpectedMultipartType { multipart_type: MultipartType },
    #[snafu(display("Empty response"))]
    EmptyResponse,
}

impl DicomWebClient {
    pub fn set_basic_auth(&mut self, username: &str, password: &str) -> &Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn set_bearer_token(&mut self, token: &str) -> &Self {
        self.bearer_token = Some(token.to_string());
        self
    }

    /// Create a client for the DICOMweb service rooted at `url`.
    pub fn with_single_url(url: &str) -> DicomWebClient {
        Self::with_client(url, reqwest::Client::new())
    }

    /// Create a client which sends its requests through `client`.
    pub fn with_client(url: &str, client: reqwest::Client) -> DicomWebClient {
        DicomWebClient {
            wado_url: url.trim_end_matches('/').to_string(),
            client,
            bearer_token: None,
            username: None,
            password: None,
        }
    }

    /// The root URL of the WADO-RS service.
    pub fn wado_url(&self) -> &str {
        &self.wado_url
    }

    pub(crate) fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        let request = match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        };
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl BulkDataFetcher for DicomWebClient {
    async fn fetch_bulk_data(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        match self.retrieve_bulk_data(uri).run().await {
            Ok(data) => Ok(data),
            Err(DicomWebError::HttpStatusFailure {
                status_code: StatusCode::NOT_FOUND,
            }) => NotFoundSnafu { uri }.fail(),
            Err(e) => Err(FetchError::Network {
                uri: uri.to_string(),
                source: Box::new(e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use dicom_dictionary_std::tags;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const STUDY: &str = "1.2.276.0.89.300.10035584652.20181014.93645";
    const SERIES: &str = "1.2.392.200036.9125.3.1696751121028.64888163108.42362053";
    const INSTANCE: &str = "1.2.392.200036.9125.9.0.454007928.521494544.1883970570";

    fn instance_json() -> serde_json::Value {
        json!([{
            "0020000D": { "vr": "UI", "Value": [STUDY] },
            "0020000E": { "vr": "UI", "Value": [SERIES] },
            "00080018": { "vr": "UI", "Value": [INSTANCE] },
            "00080060": { "vr": "CS", "Value": ["CT"] }
        }])
    }

    async fn mock_wado(mock_server: &MockServer) {
        // STUDIES/{STUDY_UID}/METADATA endpoint
        let mock = Mock::given(method("GET"))
            .and(path_regex("^/studies/[0-9.]+/metadata$"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("[]", "application/dicom+json"),
            );
        mock_server.register(mock).await;
        // STUDIES/{STUDY_UID}/SERIES/{SERIES_UID}/METADATA endpoint
        let mock = Mock::given(method("GET"))
            .and(path_regex(r"^/studies/[0-9.]+/series/[0-9.]+/metadata$"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                instance_json().to_string(),
                "application/dicom+json; charset=utf-8",
            ));
        mock_server.register(mock).await;
        // STUDIES/{STUDY_UID}/SERIES/{SERIES_UID}/INSTANCES/{INSTANCE_UID}/METADATA endpoint
        let mock = Mock::given(method("GET"))
            .and(path_regex(
                r"^/studies/[0-9.]+/series/[0-9.]+/instances/[0-9.]+/metadata$",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html/>", "text/html"));
        mock_server.register(mock).await;
        // multipart bulk data
        let mock = Mock::given(method("GET"))
            .and(path("/bulk/multipart"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "--1234\r\nContent-Type: application/octet-stream\r\n\r\n\x01\x02\x03\x04\r\n--1234--\r\n",
                "multipart/related; boundary=1234",
            ));
        mock_server.register(mock).await;
        // multipart bulk data with two parts and no CRLF after the closing delimiter
        let mock = Mock::given(method("GET"))
            .and(path("/bulk/multipart-unterminated"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "--1234\r\nContent-Type: application/octet-stream\r\n\r\n\x05\r\n\x06\r\n--1234\r\nContent-Type: application/octet-stream\r\n\r\n\x07\r\n--1234--",
                "multipart/related; boundary=1234",
            ));
        mock_server.register(mock).await;
        // multipart bulk data without any part
        let mock = Mock::given(method("GET"))
            .and(path("/bulk/multipart-empty"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "--1234--\r\n",
                "multipart/related; boundary=1234",
            ));
        mock_server.register(mock).await;
        // single part bulk data
        let mock = Mock::given(method("GET"))
            .and(path("/bulk/single"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(vec![9_u8, 8, 7], "application/octet-stream"),
            );
        mock_server.register(mock).await;
        // authenticated bulk data
        let mock = Mock::given(method("GET"))
            .and(path("/bulk/secret"))
            .and(header("Authorization", "Bearer t0k3n"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![1_u8], "application/octet-stream"),
            );
        mock_server.register(mock).await;
    }

    // Create a DICOMWeb mock server
    async fn start_dicomweb_mock_server() -> MockServer {
        let mock_server = MockServer::start().await;
        mock_wado(&mock_server).await;
        mock_server
    }

    #[tokio::test]
    async fn retrieve_study_metadata_test() {
        let mock_server = start_dicomweb_mock_server().await;
        let client = DicomWebClient::with_single_url(&mock_server.uri());
        let result = client.retrieve_study_metadata(STUDY).run().await;
        assert!(result.is_ok_and(|datasets| datasets.is_empty()));
    }

    #[tokio::test]
    async fn retrieve_series_metadata_test() {
        let mock_server = start_dicomweb_mock_server().await;
        let client = DicomWebClient::with_single_url(&mock_server.uri());
        let datasets = client
            .retrieve_series_metadata(STUDY, SERIES)
            .run()
            .await
            .unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].get_str(tags::MODALITY), Some("CT"));
        assert_eq!(datasets[0].get_str(tags::SOP_INSTANCE_UID), Some(INSTANCE));
    }

    #[tokio::test]
    async fn retrieve_instance_metadata_wrong_content_type() {
        let mock_server = start_dicomweb_mock_server().await;
        let client = DicomWebClient::with_single_url(&mock_server.uri());
        let result = client
            .retrieve_instance_metadata(STUDY, SERIES, INSTANCE)
            .run()
            .await;
        assert!(matches!(
            result,
            Err(DicomWebError::UnexpectedContentType { .. })
        ));
    }

    #[tokio::test]
    async fn retrieve_bulk_data_test() {
        let mock_server = start_dicomweb_mock_server().await;
        let client = DicomWebClient::with_single_url(&mock_server.uri());

        let uri = format!("{}/bulk/multipart", mock_server.uri());
        let data = client.retrieve_bulk_data(&uri).run().await.unwrap();
        assert_eq!(data, vec![1, 2, 3, 4]);

        let uri = format!("{}/bulk/single", mock_server.uri());
        let data = client.fetch_bulk_data(&uri).await.unwrap();
        assert_eq!(data, vec![9, 8, 7]);
    }

    #[tokio::test]
    async fn retrieve_bulk_data_takes_first_part() {
        let mock_server = start_dicomweb_mock_server().await;
        let client = DicomWebClient::with_single_url(&mock_server.uri());

        let uri = format!("{}/bulk/multipart-unterminated", mock_server.uri());
        let data = client.retrieve_bulk_data(&uri).run().await.unwrap();
        assert_eq!(data, vec![5, b'\r', b'\n', 6]);

        let uri = format!("{}/bulk/multipart-empty", mock_server.uri());
        let result = client.retrieve_bulk_data(&uri).run().await;
        assert!(matches!(result, Err(DicomWebError::EmptyResponse)));
    }

    #[tokio::test]
    async fn fetch_bulk_data_errors() {
        let mock_server = start_dicomweb_mock_server().await;
        let client = DicomWebClient::with_single_url(&mock_server.uri());

        let uri = format!("{}/bulk/missing", mock_server.uri());
        let err = client.fetch_bulk_data(&uri).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));

        // no bearer token
        let uri = format!("{}/bulk/secret", mock_server.uri());
        assert!(client.fetch_bulk_data(&uri).await.is_err());

        let mut client = client;
        client.set_bearer_token("t0k3n");
        assert_eq!(client.fetch_bulk_data(&uri).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let client = DicomWebClient::with_single_url("http://127.0.0.1:9");
        let err = client
            .fetch_bulk_data("http://127.0.0.1:9/bulk/single")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
    }
}
