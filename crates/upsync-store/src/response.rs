//! Mapping HTTP responses and transport failures to [`TransferError`]
//!
//! S3-compatible stores put a machine-readable `<Code>` in the XML error
//! body. When present it takes precedence over the status code, since the
//! same status is used for both transient and permanent conditions (a 400
//! can be `RequestTimeout`, a 503 is usually `SlowDown`).

use std::error::Error as StdError;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::warn;

use upsync_core::ports::TransferError;

/// Used when a throttling response carries an unreadable `Retry-After`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Longest `Retry-After` honoured as an HTTP-date
const MAX_RETRY_AFTER_SECS: u64 = 3600;

/// Error details from an S3-style XML body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn parse(body: &str) -> Self {
        Self {
            code: xml_element(body, "Code"),
            message: xml_element(body, "Message"),
        }
    }

    fn describe(&self, status: StatusCode) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (Some(code), None) => code.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => status.to_string(),
        }
    }
}

fn xml_element(body: &str, name: &str) -> Option<String> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = body.find(&open)? + open.len();
    let len = body[start..].find(&close)?;
    let value = body[start..start + len].trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse a `Retry-After` value: integer seconds or an HTTP-date
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let target = date.with_timezone(&chrono::Utc);
        let now = chrono::Utc::now();
        if target > now {
            if let Some(secs) = (target - now)
                .num_seconds()
                .try_into()
                .ok()
                .filter(|&s: &u64| s <= MAX_RETRY_AFTER_SECS)
            {
                return Duration::from_secs(secs);
            }
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
}

/// Classify a non-success response
pub fn error_from_response(status: StatusCode, headers: &HeaderMap, body: &str) -> TransferError {
    let details = ErrorBody::parse(body);
    let message = details.describe(status);
    classify_error(
        status.as_u16(),
        details.code.as_deref(),
        message,
        retry_after(headers),
    )
}

/// Classify a store error from its status and optional S3 error code
///
/// Shared by the plain HTTP client and the AWS SDK client so both report the
/// same [`TransferError`] for the same store answer.
pub fn classify_error(
    status: u16,
    code: Option<&str>,
    message: String,
    retry_after: Option<Duration>,
) -> TransferError {
    if let Some(code) = code {
        match code {
            "RequestTimeout" => return TransferError::Timeout(message),
            "SlowDown" | "ServiceUnavailable" | "TooManyRequests" | "Throttling" => {
                return TransferError::Throttled { retry_after }
            }
            "InternalError" => return TransferError::Server { status, message },
            "AccessDenied" | "AllAccessDisabled" | "AccountProblem" => {
                return TransferError::Forbidden(message)
            }
            "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken" => {
                return TransferError::Unauthorized(message)
            }
            "NoSuchBucket" => return TransferError::NotFound(message),
            _ => {}
        }
    }

    match status {
        401 => TransferError::Unauthorized(message),
        403 => TransferError::Forbidden(message),
        404 => TransferError::NotFound(message),
        408 => TransferError::Timeout(message),
        429 | 503 => TransferError::Throttled { retry_after },
        500..=599 => TransferError::Server { status, message },
        _ => TransferError::BadRequest { status, message },
    }
}

/// Classify a failure that produced no response
pub fn error_from_transport(err: &reqwest::Error) -> TransferError {
    let message = error_chain(err);
    if err.is_timeout() {
        TransferError::Timeout(message)
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransferError::Connection(message)
    } else {
        TransferError::Other(message)
    }
}

/// `err` and all of its sources, joined with `: `
pub(crate) fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
