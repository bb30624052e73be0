//! Building and sending one store request
//!
//! The file is streamed from disk through an optional gzip encoder straight
//! into the store client's request body. Read or compression errors that
//! happen mid-stream are captured on the side, so the caller sees them as
//! [`TransferError::LocalIo`] no matter how the transport reports a broken
//! body.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_compression::tokio::bufread::GzipEncoder;
use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};

use upsync_core::domain::{HeaderSet, RelPath};
use upsync_core::ports::{BodyStream, StoreClient, StoreReceipt, StoreRequest, TransferError};

/// MIME type guessed from the file extension
pub fn content_type_for(path: &RelPath) -> Option<String> {
    mime_guess::from_path(path.as_str())
        .first()
        .map(|mime| mime.essence_str().to_string())
}

/// First body error seen while the transport was reading the stream
#[derive(Debug, Clone, Default)]
struct BodyFault(Arc<Mutex<Option<(io::ErrorKind, String)>>>);

impl BodyFault {
    fn record(&self, err: &io::Error) {
        let mut slot = self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some((err.kind(), err.to_string()));
        }
    }

    fn take(&self) -> Option<io::Error> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .map(|(kind, message)| io::Error::new(kind, message))
    }
}

/// Wrap an open file as a request body, gzipping it when asked
fn body_stream(file: File, compress: bool, fault: BodyFault) -> BodyStream {
    let reader = BufReader::new(file);
    let stream: BodyStream = if compress {
        Box::pin(ReaderStream::new(GzipEncoder::new(reader)))
    } else {
        Box::pin(ReaderStream::new(reader))
    };

    Box::pin(stream.inspect(move |chunk| {
        if let Err(err) = chunk {
            fault.record(err);
        }
    }))
}

/// Upload one file from `root` under its relative path as the object key
#[instrument(skip(store, root, headers), fields(path = %path, compress = headers.should_compress()))]
pub async fn upload_file(
    store: &dyn StoreClient,
    root: &Path,
    bucket: &str,
    path: &RelPath,
    headers: HeaderSet,
) -> Result<StoreReceipt, TransferError> {
    let local_io = |source: io::Error| TransferError::LocalIo {
        path: path.to_string(),
        source,
    };

    let file = File::open(path.to_fs_path(root)).await.map_err(local_io)?;
    let fault = BodyFault::default();
    let body = body_stream(file, headers.should_compress(), fault.clone());

    let request = StoreRequest {
        bucket: bucket.to_string(),
        key: path.to_string(),
        body,
        content_type: content_type_for(path),
        headers,
    };
    debug!(content_type = ?request.content_type, "Sending to store");

    match store.upload(request).await {
        Ok(receipt) => match fault.take() {
            // The store claims success on a body we know was cut short.
            Some(err) => Err(local_io(err)),
            None => Ok(receipt),
        },
        Err(err) => Err(fault.take().map(local_io).unwrap_or(err)),
    }
}

/// The request [`upload_file`] would send, without opening the local file
///
/// Used for dry runs: the body is empty and the file may have disappeared
/// since the scan without failing the run.
pub async fn preview_file(
    store: &dyn StoreClient,
    bucket: &str,
    path: &RelPath,
    headers: HeaderSet,
) -> Result<StoreReceipt, TransferError> {
    let request = StoreRequest {
        bucket: bucket.to_string(),
        key: path.to_string(),
        body: Box::pin(futures_util::stream::empty()),
        content_type: content_type_for(path),
        headers,
    };
    store.upload(request).await
}
