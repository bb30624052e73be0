//! Fingerprints and fingerprint sets
//!
//! A [`FingerprintSet`] maps each relative path to the content hash that was
//! last uploaded for it. Comparing the set computed for the source tree with
//! the persisted one yields the work list for a run.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::newtypes::{ContentHash, RelPath};

/// First line written to every cache file
pub const CACHE_HEADER: &str = "# upsync fingerprint cache v1";

/// Content state of a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// SHA-256 of the file content
    pub hash: ContentHash,
    /// Size in bytes
    pub size: u64,
    /// Modification time in seconds since the Unix epoch, when known
    pub modified: Option<i64>,
}

impl Fingerprint {
    #[must_use]
    pub fn new(hash: ContentHash, size: u64, modified: Option<i64>) -> Self {
        Self {
            hash,
            size,
            modified,
        }
    }

    /// Cheap pre-check: size and mtime both match a freshly stat'ed file
    #[must_use]
    pub fn matches_metadata(&self, size: u64, modified: Option<i64>) -> bool {
        self.size == size && self.modified.is_some() && self.modified == modified
    }
}

/// A malformed line in a persisted fingerprint set
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct FingerprintParseError {
    /// 1-based line number
    pub line: usize,
    pub message: String,
}

/// Ordered mapping from relative path to fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintSet {
    entries: BTreeMap<RelPath, Fingerprint>,
}

impl FingerprintSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the fingerprint for `path`
    pub fn insert(&mut self, path: RelPath, fingerprint: Fingerprint) {
        self.entries.insert(path, fingerprint);
    }

    #[must_use]
    pub fn get(&self, path: &RelPath) -> Option<&Fingerprint> {
        self.entries.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &RelPath) -> bool {
        self.entries.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&RelPath, &Fingerprint)> {
        self.entries.iter()
    }

    /// Paths that are new or whose hash differs from `old`, sorted by path
    ///
    /// Size and mtime never make a path "changed" on their own.
    #[must_use]
    pub fn diff(&self, old: &FingerprintSet) -> Vec<RelPath> {
        self.entries
            .iter()
            .filter(|(path, current)| {
                old.get(path)
                    .map_or(true, |previous| previous.hash != current.hash)
            })
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Copy of this set without the given paths
    #[must_use]
    pub fn reject(&self, paths: &[RelPath]) -> FingerprintSet {
        let excluded: HashSet<&RelPath> = paths.iter().collect();
        let entries = self
            .entries
            .iter()
            .filter(|(path, _)| !excluded.contains(path))
            .map(|(path, fp)| (path.clone(), fp.clone()))
            .collect();
        FingerprintSet { entries }
    }

    /// Parse the line-oriented cache format
    ///
    /// Each entry is `hash<TAB>size<TAB>mtime<TAB>path`, with `-` for an
    /// unknown mtime. Blank lines and lines starting with `#` are skipped.
    /// The path is the last field and may itself contain tabs.
    pub fn parse(text: &str) -> Result<Self, FingerprintParseError> {
        let mut set = FingerprintSet::new();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            if raw.trim().is_empty() || raw.starts_with('#') {
                continue;
            }
            let err = |message: String| FingerprintParseError { line, message };

            let mut fields = raw.splitn(4, '\t');
            let (Some(hash), Some(size), Some(modified), Some(path)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                return Err(err("expected 4 tab-separated fields".to_string()));
            };

            let hash = ContentHash::new(hash.to_string()).map_err(|e| err(e.to_string()))?;
            let size = size
                .parse::<u64>()
                .map_err(|e| err(format!("invalid size '{size}': {e}")))?;
            let modified = match modified {
                "-" => None,
                value => Some(
                    value
                        .parse::<i64>()
                        .map_err(|e| err(format!("invalid mtime '{value}': {e}")))?,
                ),
            };
            let path = RelPath::new(path.to_string()).map_err(|e| err(e.to_string()))?;

            if set.contains(&path) {
                return Err(err(format!("duplicate entry for {path}")));
            }
            set.insert(path, Fingerprint::new(hash, size, modified));
        }

        Ok(set)
    }

    /// Render in the format accepted by [`FingerprintSet::parse`]
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.entries.len() * 96 + CACHE_HEADER.len() + 1);
        out.push_str(CACHE_HEADER);
        out.push('\n');
        for (path, fp) in &self.entries {
            let modified = fp
                .modified
                .map_or_else(|| "-".to_string(), |m| m.to_string());
            // Writing into a String cannot fail.
            let _ = writeln!(out, "{}\t{}\t{}\t{}", fp.hash, fp.size, modified, path);
        }
        out
    }
}

impl FromIterator<(RelPath, Fingerprint)> for FingerprintSet {
    fn from_iter<I: IntoIterator<Item = (RelPath, Fingerprint)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
