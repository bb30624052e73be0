//! HTTP client for S3-compatible object stores
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use upsync_store::HttpStoreClient;
//!
//! # fn example() -> Result<(), upsync_store::StoreError> {
//! let client = HttpStoreClient::new("http://127.0.0.1:9000", None, Duration::from_secs(300))?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE, ETAG,
};
use reqwest::{Body, Client, Response};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use upsync_core::domain::HeaderSet;
use upsync_core::ports::{StoreClient, StoreReceipt, StoreRequest, TransferError};

use crate::response::{error_from_response, error_from_transport};

const SSE_HEADER: &str = "x-amz-server-side-encryption";
const VERSION_HEADER: &str = "x-amz-version-id";

/// Errors building a client
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

// ============================================================================
// HttpStoreClient
// ============================================================================

/// Uploads objects with path-style `PUT` requests
///
/// Bodies are streamed; the request carries no `Content-Length` when the
/// body is compressed on the fly.
#[derive(Debug, Clone)]
pub struct HttpStoreClient {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpStoreClient {
    /// Creates a client for `endpoint` with a per-request `timeout`
    ///
    /// `token`, when given, is sent as a bearer token.
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Self::with_client(client, endpoint, token)
    }

    /// Creates a client around an existing `reqwest::Client`
    pub fn with_client(
        client: Client,
        endpoint: &str,
        token: Option<String>,
    ) -> Result<Self, StoreError> {
        let invalid = |reason: &str| StoreError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.cannot_be_a_base() {
            return Err(invalid("not a base URL"));
        }

        Ok(Self {
            client,
            endpoint: url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `{endpoint}/{bucket}/{key}` with every segment percent-encoded
    pub fn object_url(&self, bucket: &str, key: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(bucket).extend(key.split('/'));
        }
        url
    }

    fn headers_for(request_headers: &HeaderSet, content_type: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut set = |name: HeaderName, value: Option<&str>| {
            if let Some(value) = value {
                match value.parse::<HeaderValue>() {
                    Ok(v) => {
                        headers.insert(name, v);
                    }
                    Err(_) => warn!(header = %name, value, "Skipping invalid header value"),
                }
            }
        };
        set(CONTENT_TYPE, content_type);
        set(CONTENT_ENCODING, request_headers.content_encoding.as_deref());
        set(CACHE_CONTROL, request_headers.cache_control.as_deref());
        set(
            HeaderName::from_static(SSE_HEADER),
            request_headers.server_side_encryption.as_deref(),
        );
        headers
    }

    fn receipt(location: Url, response: &Response) -> StoreReceipt {
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        StoreReceipt {
            location: location.to_string(),
            etag: header(ETAG.as_str()),
            version_id: header(VERSION_HEADER),
        }
    }
}

#[async_trait::async_trait]
impl StoreClient for HttpStoreClient {
    #[instrument(skip_all, fields(bucket = %request.bucket, key = %request.key))]
    async fn upload(&self, request: StoreRequest) -> Result<StoreReceipt, TransferError> {
        let url = self.object_url(&request.bucket, &request.key);
        let headers = Self::headers_for(&request.headers, request.content_type.as_deref());

        let mut builder = self
            .client
            .put(url.clone())
            .headers(headers)
            .body(Body::wrap_stream(request.body));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        debug!(%url, "PUT object");
        let response = builder
            .send()
            .await
            .map_err(|e| error_from_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            let receipt = Self::receipt(url, &response);
            debug!(status = status.as_u16(), etag = ?receipt.etag, "Object stored");
            return Ok(receipt);
        }

        let response_headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let err = error_from_response(status, &response_headers, &body);
        debug!(status = status.as_u16(), error = %err, "Store refused object");
        Err(err)
    }
}
