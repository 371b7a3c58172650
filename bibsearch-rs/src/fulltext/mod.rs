//! Full-text search over documents attached to records.
//!
//! One tantivy index per bibliography file. The index stores, for every
//! attached file:
//! - the owning record id
//! - the file path and its modification time (for staleness checks)
//! - the extracted text, analyzed twice (case-folded and case-preserving)

mod extract;
mod index;
mod schema;

pub use extract::{DocumentReader, PlainTextReader};
pub use index::FullTextIndex;
pub use schema::SCHEMA_VERSION;

use crate::config::{Analyzer, FullTextConfig, IndexLocation};
use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const META_FILE: &str = "bibsearch-meta.json";

/// Get the index directory for a bibliography file.
pub fn get_index_dir(bib_path: &Path, config: &FullTextConfig) -> PathBuf {
    match config.location {
        IndexLocation::Local => bib_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".bibsearch")
            .join("index"),
        IndexLocation::Global => {
            // ~/.cache/bibsearch/<library-hash>/
            let library_hash = compute_library_hash(bib_path);
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("bibsearch")
                .join(library_hash)
        }
    }
}

/// Compute a hash of the bibliography path for the index directory name.
fn compute_library_hash(bib_path: &Path) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    bib_path.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Remove the index directory entirely.
pub fn clear_index(index_dir: &Path) -> Result<()> {
    if index_dir.exists() {
        fs::remove_dir_all(index_dir).map_err(|e| {
            SearchError::IndexUnavailable(format!("Failed to clear index: {}", e))
        })?;
    }
    Ok(())
}

/// Bookkeeping written next to the index after every rebuild or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub version: u32,
    #[serde(default)]
    pub analyzer: Analyzer,
    pub indexed_documents: usize,
    /// RFC 3339 time of the last full rebuild.
    pub last_rebuild: Option<String>,
    /// RFC 3339 time of the last incremental update.
    pub last_update: Option<String>,
}

impl Default for IndexMeta {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            analyzer: Analyzer::default(),
            indexed_documents: 0,
            last_rebuild: None,
            last_update: None,
        }
    }
}

impl IndexMeta {
    /// Read the metadata file. Missing or unreadable metadata yields `None`.
    pub fn load(index_dir: &Path) -> Option<Self> {
        let content = fs::read_to_string(index_dir.join(META_FILE)).ok()?;
        match serde_json::from_str(&content) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(dir = %index_dir.display(), error = %e, "Ignoring corrupt index metadata");
                None
            }
        }
    }

    /// Whether an index written with this metadata can be reused as is.
    pub fn is_compatible(&self, config: &FullTextConfig) -> bool {
        self.version == SCHEMA_VERSION && self.analyzer == config.analyzer
    }

    pub fn save(&self, index_dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        atomic_write(&index_dir.join(META_FILE), json.as_bytes())
    }
}

/// Atomic write: write to temp file, then rename.
fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| SearchError::IndexUnavailable("Invalid metadata path".to_string()))?;

    let temp_path = parent.join(format!(".tmp.{}", std::process::id()));

    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        SearchError::Io(e)
    })?;

    Ok(())
}

/// Cooperative cancellation for long index rebuilds.
///
/// Clones share the flag; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Outcome of a rebuild or incremental update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    /// Documents written to the index.
    pub indexed: usize,
    /// Files that were missing or could not be read as text.
    pub skipped: usize,
    /// Documents dropped because their file or record went away.
    pub removed: usize,
    /// Whether the run stopped early. Work done before that is kept.
    pub cancelled: bool,
}
