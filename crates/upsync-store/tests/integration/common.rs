//! Shared helpers for store client tests

use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;
use wiremock::MockServer;

use upsync_core::domain::HeaderSet;
use upsync_core::ports::{BodyStream, StoreRequest};
use upsync_store::{HttpStoreClient, S3StoreClient};

/// Starts a mock server and a client pointed at it
pub async fn setup_store_mock(token: Option<&str>) -> (MockServer, HttpStoreClient) {
    let server = MockServer::builder().start().await;
    let client = HttpStoreClient::new(
        &server.uri(),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
    .expect("client");
    (server, client)
}

/// Starts a mock server and an SDK client signing with fixed test keys
pub async fn setup_s3_mock(attempt_timeout: Duration) -> (MockServer, S3StoreClient) {
    use aws_sdk_s3::config::timeout::TimeoutConfig;
    use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};

    let server = MockServer::builder().start().await;
    let config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(Credentials::new("AKIDTEST", "test-secret", None, None, "test"))
        .endpoint_url(server.uri())
        .force_path_style(true)
        .timeout_config(
            TimeoutConfig::builder()
                .operation_attempt_timeout(attempt_timeout)
                .build(),
        )
        .build();
    (server, S3StoreClient::from_conf(config))
}

/// A body made of `chunks`
pub fn body(chunks: &[&'static [u8]]) -> BodyStream {
    let items: Vec<std::io::Result<Bytes>> =
        chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
    Box::pin(stream::iter(items))
}

pub fn request(key: &str, data: &'static [u8], headers: HeaderSet) -> StoreRequest {
    StoreRequest {
        bucket: "site".into(),
        key: key.into(),
        body: body(&[data]),
        content_type: Some("text/plain".into()),
        headers,
    }
}

pub fn s3_error(code: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{code}</Code><Message>mock says no</Message><RequestId>1</RequestId></Error>"
    )
}
