//! Fingerprint cache - scan, load, diff, dump
//!
//! ## Design Decisions
//!
//! - **Blocking scan**: walking and hashing run on `spawn_blocking`; the
//!   tree is read sequentially with `walkdir`, symlinks are not followed.
//! - **Atomic writes**: the cache is written to `<cache>.tmp` in the same
//!   directory, fsynced, then renamed over the target.
//! - **Missing cache**: an absent file is an empty cache, so the first run
//!   uploads everything.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use upsync_core::domain::{ContentHash, Fingerprint, FingerprintSet, RelPath};

use crate::SyncError;

/// Options for [`compute_current`]
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Files to leave out, typically the cache file and its temp sibling
    pub exclude: Vec<PathBuf>,
    /// Previous fingerprints whose hashes may be reused when size and
    /// mtime are unchanged. `None` hashes every file.
    pub reuse: Option<FingerprintSet>,
}

/// Hash every regular file under `root`
///
/// # Errors
/// [`SyncError::Scan`] if the root or any entry below it cannot be read
#[instrument(skip(options), fields(root = %root.display()))]
pub async fn compute_current(root: &Path, options: ScanOptions) -> Result<FingerprintSet, SyncError> {
    let root = root.to_path_buf();
    let set = tokio::task::spawn_blocking(move || scan_blocking(&root, &options)).await??;
    debug!(files = set.len(), "Scan complete");
    Ok(set)
}

fn scan_blocking(root: &Path, options: &ScanOptions) -> Result<FingerprintSet, SyncError> {
    let scan_err = |path: &Path, source: io::Error| SyncError::Scan {
        path: path.to_path_buf(),
        source,
    };

    let root = root.canonicalize().map_err(|e| scan_err(root, e))?;
    if !root.is_dir() {
        return Err(scan_err(
            &root,
            io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }
    let excluded: HashSet<PathBuf> = options.exclude.iter().map(|p| absolute(p)).collect();

    let mut set = FingerprintSet::new();
    for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(&root).to_path_buf();
            scan_err(&path, e.into())
        })?;

        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if excluded.contains(path) {
            debug!(path = %path.display(), "Skipping excluded file");
            continue;
        }

        let relative = match path.strip_prefix(&root).map(RelPath::from_relative) {
            Ok(Ok(rel)) => rel,
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Skipping file with unusable name");
                continue;
            }
            Err(_) => continue,
        };

        let metadata = entry.metadata().map_err(|e| scan_err(path, e.into()))?;
        let size = metadata.len();
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| i64::try_from(d.as_secs()).ok());

        let reused = options
            .reuse
            .as_ref()
            .and_then(|prev| prev.get(&relative))
            .filter(|fp| fp.matches_metadata(size, modified))
            .map(|fp| fp.hash.clone());

        let hash = match reused {
            Some(hash) => hash,
            None => hash_file(path).map_err(|e| scan_err(path, e))?,
        };
        set.insert(relative, Fingerprint::new(hash, size, modified));
    }

    Ok(set)
}

/// SHA-256 of a file's content, streamed
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(ContentHash::from_hasher(hasher))
}

/// Best-effort absolute form of a path that may not exist yet
fn absolute(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            parent
                .canonicalize()
                .map(|p| p.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

/// Read a persisted cache
///
/// A missing file yields an empty set.
///
/// # Errors
/// [`SyncError::CacheCorrupt`] if the file exists but is unreadable,
/// not UTF-8, or malformed
#[instrument(fields(path = %path.display()))]
pub async fn load(path: &Path) -> Result<FingerprintSet, SyncError> {
    let corrupt = |reason: String| SyncError::CacheCorrupt {
        path: path.to_path_buf(),
        reason,
    };

    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No cache file, starting empty");
            return Ok(FingerprintSet::new());
        }
        Err(e) => return Err(corrupt(e.to_string())),
    };

    let set = FingerprintSet::parse(&text).map_err(|e| corrupt(e.to_string()))?;
    debug!(entries = set.len(), "Cache loaded");
    Ok(set)
}

/// Paths of `current` that are new or changed relative to `old`
pub fn diff(current: &FingerprintSet, old: &FingerprintSet) -> Vec<RelPath> {
    current.diff(old)
}

/// Temp file used while dumping to `path`
pub fn temp_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".tmp");
    PathBuf::from(p)
}

/// Atomically replace the cache at `path` with `set`
///
/// # Errors
/// [`SyncError::CacheWrite`]; the previous cache file is left intact
#[instrument(skip(set), fields(path = %path.display(), entries = set.len()))]
pub async fn dump(set: &FingerprintSet, path: &Path) -> Result<(), SyncError> {
    let tmp_path = temp_path(path);
    let result = write_then_rename(set.render().as_bytes(), &tmp_path, path).await;

    if let Err(source) = result {
        // The temp file may or may not exist at this point.
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(SyncError::CacheWrite {
            path: path.to_path_buf(),
            source,
        });
    }

    debug!("Cache written");
    Ok(())
}

async fn write_then_rename(data: &[u8], tmp_path: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(tmp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(tmp_path, target).await
}
