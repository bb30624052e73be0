//! PutObject through the AWS SDK against a mock S3 endpoint

use std::time::Duration;

use upsync_core::domain::HeaderSet;
use upsync_core::ports::{ErrorClass, StoreClient, StoreRequest, TransferError};
use upsync_store::S3StoreClient;
use wiremock::matchers::{header, header_regex, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

async fn s3_client() -> (wiremock::MockServer, S3StoreClient) {
    common::setup_s3_mock(Duration::from_secs(5)).await
}

// ============================================================================
// Successful uploads
// ============================================================================

#[tokio::test]
async fn test_put_object_is_signed_and_carries_headers() {
    let (server, client) = s3_client().await;

    Mock::given(method("PUT"))
        .and(path("/site/css/main.css"))
        .and(header_regex(
            "authorization",
            "^AWS4-HMAC-SHA256 Credential=AKIDTEST/",
        ))
        .and(header("content-type", "text/plain"))
        .and(header("content-encoding", "gzip"))
        .and(header("cache-control", "max-age=1800"))
        .and(header("x-amz-server-side-encryption", "AES256"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"abc123\"")
                .insert_header("x-amz-version-id", "v7"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let headers = HeaderSet::empty()
        .with_content_encoding("gzip")
        .with_cache_control("max-age=1800")
        .with_server_side_encryption("AES256");
    let receipt = client
        .upload(common::request("css/main.css", b"\x1f\x8b body", headers))
        .await
        .expect("upload failed");

    assert_eq!(receipt.etag.as_deref(), Some("\"abc123\""));
    assert_eq!(receipt.version_id.as_deref(), Some("v7"));
    assert_eq!(receipt.location, "s3://site/css/main.css");
}

#[tokio::test]
async fn test_chunked_body_is_sent_in_one_request() {
    let (server, client) = s3_client().await;

    Mock::given(method("PUT"))
        .and(path("/site/big.bin"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let request = StoreRequest {
        bucket: "site".into(),
        key: "big.bin".into(),
        body: common::body(&[&b"first-"[..], &b"second-"[..], &b"third"[..]]),
        content_type: None,
        headers: HeaderSet::empty(),
    };
    client.upload(request).await.expect("upload failed");
}

// ============================================================================
// Error classification
// ============================================================================

async fn s3_upload_against(template: ResponseTemplate) -> TransferError {
    let (server, client) = s3_client().await;
    Mock::given(method("PUT"))
        .respond_with(template)
        .mount(&server)
        .await;

    client
        .upload(common::request("a.txt", b"a", HeaderSet::empty()))
        .await
        .expect_err("upload should fail")
}

#[tokio::test]
async fn test_access_denied_is_fatal_auth_failure() {
    let err = s3_upload_against(
        ResponseTemplate::new(403).set_body_string(common::s3_error("AccessDenied")),
    )
    .await;
    assert!(matches!(err, TransferError::Forbidden(_)), "{err:?}");
    assert_eq!(err.class(), ErrorClass::Fatal);
    assert!(err.is_auth_failure());
    assert!(err.to_string().contains("AccessDenied"));
}

#[tokio::test]
async fn test_signature_mismatch_is_unauthorized() {
    let err = s3_upload_against(
        ResponseTemplate::new(403).set_body_string(common::s3_error("SignatureDoesNotMatch")),
    )
    .await;
    assert!(matches!(err, TransferError::Unauthorized(_)), "{err:?}");
    assert!(err.is_auth_failure());
}

#[tokio::test]
async fn test_no_such_bucket_is_fatal() {
    let err = s3_upload_against(
        ResponseTemplate::new(404).set_body_string(common::s3_error("NoSuchBucket")),
    )
    .await;
    assert!(matches!(err, TransferError::NotFound(_)), "{err:?}");
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_slow_down_is_throttled_without_sdk_retries() {
    let (server, client) = s3_client().await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("Retry-After", "2")
                .set_body_string(common::s3_error("SlowDown")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client
        .upload(common::request("a.txt", b"a", HeaderSet::empty()))
        .await
        .expect_err("upload should fail");
    match err {
        TransferError::Throttled { retry_after } => {
            assert_eq!(retry_after, Some(Duration::from_secs(2)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_internal_error_is_recoverable() {
    let err = s3_upload_against(
        ResponseTemplate::new(500).set_body_string(common::s3_error("InternalError")),
    )
    .await;
    assert!(matches!(err, TransferError::Server { status: 500, .. }), "{err:?}");
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let (server, client) = common::setup_s3_mock(Duration::from_millis(100)).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let err = client
        .upload(common::request("a.txt", b"a", HeaderSet::empty()))
        .await
        .expect_err("upload should time out");
    assert!(matches!(err, TransferError::Timeout(_)), "{err:?}");
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_recoverable() {
    let (server, client) = s3_client().await;
    drop(server);

    let err = client
        .upload(common::request("a.txt", b"a", HeaderSet::empty()))
        .await
        .expect_err("upload should fail");
    assert!(
        matches!(err, TransferError::Connection(_) | TransferError::Timeout(_)),
        "{err:?}"
    );
    assert!(err.is_recoverable());
}
