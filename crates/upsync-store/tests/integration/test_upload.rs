//! PUT requests and response classification against a mock store

use std::time::Duration;

use upsync_core::domain::HeaderSet;
use upsync_core::ports::{ErrorClass, StoreClient, StoreRequest, TransferError};
use upsync_store::HttpStoreClient;
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

// ============================================================================
// Successful uploads
// ============================================================================

#[tokio::test]
async fn test_put_object_with_headers() {
    let (server, client) = common::setup_store_mock(Some("secret-token")).await;

    Mock::given(method("PUT"))
        .and(path("/site/css/main.css"))
        .and(header("authorization", "Bearer secret-token"))
        .and(header("content-type", "text/plain"))
        .and(header("cache-control", "max-age=1800"))
        .and(header("x-amz-server-side-encryption", "AES256"))
        .and(body_bytes(b"body { color: red }".to_vec()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"abc123\"")
                .insert_header("x-amz-version-id", "v1"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let headers = HeaderSet::default()
        .with_cache_control("max-age=1800")
        .with_server_side_encryption("AES256");
    let receipt = client
        .upload(common::request("css/main.css", b"body { color: red }", headers))
        .await
        .expect("upload failed");

    assert_eq!(receipt.etag.as_deref(), Some("\"abc123\""));
    assert_eq!(receipt.version_id.as_deref(), Some("v1"));
    assert!(receipt.location.ends_with("/site/css/main.css"));
}

#[tokio::test]
async fn test_streamed_body_is_concatenated() {
    let (server, client) = common::setup_store_mock(None).await;

    Mock::given(method("PUT"))
        .and(path("/site/big.bin"))
        .and(body_bytes(b"first-second-third".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let request = StoreRequest {
        bucket: "site".into(),
        key: "big.bin".into(),
        body: common::body(&[&b"first-"[..], &b"second-"[..], &b"third"[..]]),
        content_type: None,
        headers: HeaderSet::default(),
    };
    let receipt = client.upload(request).await.expect("upload failed");
    assert!(receipt.etag.is_none());
}

#[tokio::test]
async fn test_content_encoding_header_sent() {
    let (server, client) = common::setup_store_mock(None).await;

    Mock::given(method("PUT"))
        .and(path("/site/index.html"))
        .and(header("content-encoding", "gzip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let headers = HeaderSet::default().with_content_encoding("gzip");
    client
        .upload(common::request("index.html", b"\x1f\x8b", headers))
        .await
        .expect("upload failed");
}

#[tokio::test]
async fn test_key_segments_are_encoded() {
    let (server, client) = common::setup_store_mock(None).await;

    Mock::given(method("PUT"))
        .and(path("/site/my%20docs/read%20me.txt"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client
        .upload(common::request("my docs/read me.txt", b"x", HeaderSet::default()))
        .await
        .expect("upload failed");
}

// ============================================================================
// Error classification
// ============================================================================

async fn upload_against(template: ResponseTemplate) -> TransferError {
    let (server, client) = common::setup_store_mock(None).await;
    Mock::given(method("PUT"))
        .respond_with(template)
        .mount(&server)
        .await;

    client
        .upload(common::request("a.txt", b"a", HeaderSet::default()))
        .await
        .expect_err("upload should fail")
}

#[tokio::test]
async fn test_access_denied_is_fatal_auth_failure() {
    let err = upload_against(
        ResponseTemplate::new(403).set_body_string(common::s3_error("AccessDenied")),
    )
    .await;
    assert!(matches!(err, TransferError::Forbidden(_)));
    assert_eq!(err.class(), ErrorClass::Fatal);
    assert!(err.is_auth_failure());
    assert!(err.to_string().contains("AccessDenied"));
}

#[tokio::test]
async fn test_no_such_bucket_is_fatal() {
    let err = upload_against(
        ResponseTemplate::new(404).set_body_string(common::s3_error("NoSuchBucket")),
    )
    .await;
    assert!(matches!(err, TransferError::NotFound(_)));
    assert!(!err.is_recoverable());
    assert!(!err.is_auth_failure());
}

#[tokio::test]
async fn test_request_timeout_code_is_recoverable() {
    let err = upload_against(
        ResponseTemplate::new(400).set_body_string(common::s3_error("RequestTimeout")),
    )
    .await;
    assert!(matches!(err, TransferError::Timeout(_)));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_slow_down_carries_retry_after() {
    let err = upload_against(
        ResponseTemplate::new(503)
            .insert_header("Retry-After", "2")
            .set_body_string(common::s3_error("SlowDown")),
    )
    .await;
    match err {
        TransferError::Throttled { retry_after } => {
            assert_eq!(retry_after, Some(Duration::from_secs(2)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_internal_error_is_recoverable() {
    let err = upload_against(
        ResponseTemplate::new(500).set_body_string(common::s3_error("InternalError")),
    )
    .await;
    assert!(matches!(err, TransferError::Server { status: 500, .. }));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_plain_unauthorized_without_body() {
    let err = upload_against(ResponseTemplate::new(401)).await;
    assert!(matches!(err, TransferError::Unauthorized(_)));
    assert!(err.is_auth_failure());
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let (server, _) = common::setup_store_mock(None).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    let client =
        HttpStoreClient::new(&server.uri(), None, Duration::from_millis(100)).expect("client");

    let err = client
        .upload(common::request("a.txt", b"a", HeaderSet::default()))
        .await
        .expect_err("upload should time out");
    assert!(matches!(err, TransferError::Timeout(_)));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_recoverable() {
    let (server, _) = common::setup_store_mock(None).await;
    let uri = server.uri();
    drop(server);
    let client = HttpStoreClient::new(&uri, None, Duration::from_secs(2)).expect("client");

    let err = client
        .upload(common::request("a.txt", b"a", HeaderSet::default()))
        .await
        .expect_err("upload should fail");
    assert!(matches!(err, TransferError::Connection(_)));
    assert!(err.is_recoverable());
}
