//! AWS SDK client for Amazon S3
//!
//! Requests are SigV4-signed by `aws-sdk-s3`. Credentials and region come
//! from an [`SdkConfig`] the caller builds, usually with
//! `aws_config::defaults`. The SDK's own retries are turned off: every
//! failure goes back to the upload pipeline, which owns the retry policy.
//!
//! `PutObject` needs a known content length, so the body stream is
//! collected in memory before sending. Compressed bodies have no length
//! until they are fully encoded.

use std::time::Duration;

use aws_config::SdkConfig;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ServerSideEncryption;
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tracing::{debug, instrument};

use upsync_core::ports::{BodyStream, StoreClient, StoreReceipt, StoreRequest, TransferError};

use crate::response::{classify_error, parse_retry_after, DEFAULT_RETRY_AFTER};

/// Connection settings layered over the shared [`SdkConfig`]
#[derive(Debug, Clone)]
pub struct S3Options {
    /// Custom endpoint for S3-compatible services; implies path-style URLs
    pub endpoint: Option<String>,
    /// Limit for a single attempt, connect to last byte
    pub timeout: Duration,
}

impl Default for S3Options {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: Duration::from_secs(300),
        }
    }
}

// ============================================================================
// S3StoreClient
// ============================================================================

/// Uploads objects with `PutObject`
#[derive(Debug, Clone)]
pub struct S3StoreClient {
    client: Client,
}

impl S3StoreClient {
    pub fn new(sdk_config: &SdkConfig, options: &S3Options) -> Self {
        let mut builder = aws_sdk_s3::config::Builder::from(sdk_config)
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_attempt_timeout(options.timeout)
                    .build(),
            );
        if let Some(endpoint) = &options.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    /// Wrap a fully built S3 configuration, with SDK retries disabled
    pub fn from_conf(config: aws_sdk_s3::Config) -> Self {
        let config = config
            .to_builder()
            .retry_config(RetryConfig::disabled())
            .build();
        Self {
            client: Client::from_conf(config),
        }
    }
}

async fn collect_body(mut body: BodyStream) -> Result<Bytes, TransferError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| TransferError::Other(format!("reading body: {e}")))?;
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

#[async_trait::async_trait]
impl StoreClient for S3StoreClient {
    #[instrument(skip_all, fields(bucket = %request.bucket, key = %request.key))]
    async fn upload(&self, request: StoreRequest) -> Result<StoreReceipt, TransferError> {
        let body = collect_body(request.body).await?;
        let size = body.len();
        let headers = request.headers;

        let output = self
            .client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .body(ByteStream::from(body))
            .set_content_type(request.content_type)
            .set_content_encoding(headers.content_encoding)
            .set_cache_control(headers.cache_control)
            .set_server_side_encryption(
                headers
                    .server_side_encryption
                    .as_deref()
                    .map(ServerSideEncryption::from),
            )
            .send()
            .await
            .map_err(|e| error_from_sdk(&e))?;

        debug!(size, etag = ?output.e_tag(), "Object stored");
        Ok(StoreReceipt {
            location: format!("s3://{}/{}", request.bucket, request.key),
            etag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }
}

// ============================================================================
// Error mapping
// ============================================================================

/// Classify an SDK failure
///
/// Service errors go through the same code/status table as the HTTP client.
/// Failures without a response are timeouts or connection problems.
pub fn error_from_sdk<E>(err: &SdkError<E, HttpResponse>) -> TransferError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = DisplayErrorContext(err).to_string();
    match err {
        SdkError::ServiceError(context) => {
            let service = context.err();
            let raw = context.raw();
            let retry_after = raw
                .headers()
                .get("retry-after")
                .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER));
            let message = match (service.code(), service.message()) {
                (Some(code), Some(text)) => format!("{code}: {text}"),
                (Some(code), None) => code.to_string(),
                _ => message,
            };
            classify_error(raw.status().as_u16(), service.code(), message, retry_after)
        }
        SdkError::TimeoutError(_) => TransferError::Timeout(message),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => TransferError::Timeout(message),
        SdkError::DispatchFailure(failure) if failure.is_io() => TransferError::Connection(message),
        SdkError::ResponseError(_) => TransferError::Connection(message),
        _ => TransferError::Other(message),
    }
}
