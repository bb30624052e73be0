//! Shared test helpers: a scriptable recording store and tree builders

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::TryStreamExt;
use tokio::time::Instant;

use upsync_core::domain::{ContentHash, HeaderResolver, HeaderSet};
use upsync_core::ports::{StoreClient, StoreReceipt, StoreRequest, TransferError};
use upsync_sync::engine::{SyncEngine, SyncOptions};
use upsync_sync::retry::RetryPolicy;

/// One call the store received
#[derive(Debug, Clone)]
pub struct Call {
    pub key: String,
    pub at: Instant,
    pub body: Vec<u8>,
    pub headers: HeaderSet,
    pub content_type: Option<String>,
}

#[derive(Clone, Copy)]
enum Script {
    Times(u32, fn() -> TransferError),
    Always(fn() -> TransferError),
    Panic,
}

/// Store double that drains every body and fails on request
#[derive(Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<Call>>,
    scripts: Mutex<HashMap<String, Script>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the first `n` uploads of `key`
    pub fn fail_times(&self, key: &str, n: u32, error: fn() -> TransferError) {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.to_string(), Script::Times(n, error));
    }

    /// Fail every upload of `key`
    pub fn fail_always(&self, key: &str, error: fn() -> TransferError) {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.to_string(), Script::Always(error));
    }

    /// Panic inside the upload of `key`
    pub fn panic_on(&self, key: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.to_string(), Script::Panic);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, key: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.key == key).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.calls().into_iter().map(|c| c.key).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn scripted_failure(&self, key: &str) -> Option<TransferError> {
        let panics = matches!(self.scripts.lock().unwrap().get(key), Some(Script::Panic));
        if panics {
            panic!("store exploded on {key}");
        }

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(key) {
            Some(Script::Always(error)) => Some(error()),
            Some(Script::Times(remaining, error)) if *remaining > 0 => {
                *remaining -= 1;
                Some(error())
            }
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl StoreClient for RecordingStore {
    async fn upload(&self, request: StoreRequest) -> Result<StoreReceipt, TransferError> {
        let body = request
            .body
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .map_err(|e| TransferError::Other(format!("body read failed: {e}")))?;

        self.calls.lock().unwrap().push(Call {
            key: request.key.clone(),
            at: Instant::now(),
            body,
            headers: request.headers,
            content_type: request.content_type,
        });

        if let Some(err) = self.scripted_failure(&request.key) {
            return Err(err);
        }
        Ok(StoreReceipt {
            location: format!("mem://{}/{}", request.bucket, request.key),
            etag: Some(format!("\"{}\"", request.key.len())),
            version_id: None,
        })
    }
}

pub fn recoverable() -> TransferError {
    TransferError::Other("RequestTimeout: request timed out. Idle connections will be closed.".into())
}

pub fn fatal() -> TransferError {
    TransferError::Forbidden("AccessDenied: Access Denied".into())
}

/// Write `files` under `root`, creating directories
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}

pub fn hash(content: &str) -> ContentHash {
    ContentHash::of_bytes(content.as_bytes())
}

/// Layout of one test workspace
pub struct Workspace {
    pub _dir: tempfile::TempDir,
    pub source: PathBuf,
    pub cache: PathBuf,
}

pub fn workspace(files: &[(&str, &str)]) -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("site");
    std::fs::create_dir_all(&source).unwrap();
    write_tree(&source, files);
    let cache = dir.path().join("cache.txt");
    Workspace {
        _dir: dir,
        source,
        cache,
    }
}

pub fn options(ws: &Workspace, max_tries: u32, base_delay: Duration) -> SyncOptions {
    SyncOptions {
        source: ws.source.clone(),
        bucket: "test-bucket".into(),
        cache_file: ws.cache.clone(),
        workers: 4,
        dry_run: false,
        update_cache: true,
        trust_mtime: false,
        retry: RetryPolicy::new(max_tries, base_delay),
        max_pending_retries: 64,
    }
}

pub fn engine(store: Arc<RecordingStore>, options: SyncOptions) -> SyncEngine {
    SyncEngine::new(store, HeaderResolver::default(), options)
}
