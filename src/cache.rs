//! Page store snapshots.
//!
//! A snapshot is a bincode file holding a header and every persisted page.
//! The header fingerprints the dump it came from; a snapshot is only reused
//! while the dump's path, size and modification time still match.

use crate::config::CACHE_VERSION;
use crate::models::Page;
use crate::store::PageStore;
use anyhow::{bail, Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

const SNAPSHOT_FILE: &str = "store.cache";

/// Identity of a dump file at the moment a snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub path: String,
    pub modified: u64,
    pub size: u64,
}

impl Fingerprint {
    pub fn of(input_path: &str) -> Result<Self> {
        let meta = fs::metadata(input_path)
            .with_context(|| format!("Failed to stat dump: {}", input_path))?;
        let modified = meta
            .modified()
            .context("Dump has no modification time")?
            .duration_since(SystemTime::UNIX_EPOCH)
            .context("Dump modification time precedes the epoch")?
            .as_secs();
        Ok(Self {
            path: input_path.to_string(),
            modified,
            size: meta.len(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub version: u32,
    pub source: Fingerprint,
    pub pages: usize,
    pub redirects: usize,
}

impl SnapshotHeader {
    /// Why this snapshot cannot stand in for `current`, if it cannot.
    fn stale_reason(&self, current: &Fingerprint) -> Option<String> {
        if self.version != CACHE_VERSION {
            Some(format!("format version {} (expected {})", self.version, CACHE_VERSION))
        } else if self.source.path != current.path {
            Some(format!("built from {}", self.source.path))
        } else if self.source != *current {
            Some("dump changed since the snapshot was taken".to_string())
        } else {
            None
        }
    }
}

#[derive(Deserialize)]
struct Snapshot {
    header: SnapshotHeader,
    pages: Vec<Page>,
}

/// Written side of [`Snapshot`]; borrows pages so bodies are not cloned.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    header: SnapshotHeader,
    pages: Vec<&'a Page>,
}

pub fn cache_path(output_dir: &str) -> PathBuf {
    Path::new(output_dir).join(SNAPSHOT_FILE)
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let limit = fs::metadata(path).map(|m| m.len()).unwrap_or(0).saturating_add(1024);
    let file = File::open(path).with_context(|| format!("Failed to open snapshot: {:?}", path))?;
    bincode::options()
        .with_limit(limit)
        .deserialize_from(BufReader::with_capacity(256 * 1024, file))
        .context("Failed to decode snapshot")
}

/// `Ok(None)` when the snapshot is absent, unreadable or stale.
pub fn try_load_store(path: &Path, input_path: &str) -> Result<Option<PageStore>> {
    if !path.exists() {
        return Ok(None);
    }
    let snapshot = match read_snapshot(path) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, path = ?path, "Ignoring unreadable snapshot");
            return Ok(None);
        }
    };

    let current = Fingerprint::of(input_path)?;
    if let Some(reason) = snapshot.header.stale_reason(&current) {
        info!(reason = %reason, "Snapshot is stale");
        return Ok(None);
    }

    info!(
        pages = snapshot.header.pages,
        redirects = snapshot.header.redirects,
        "Page store restored from snapshot"
    );
    Ok(Some(PageStore::from_pages(snapshot.pages)))
}

/// Writes to a temporary file and renames it into place. Transient
/// overrides are not part of the snapshot.
pub fn save_store(store: &PageStore, input_path: &str, output_dir: &str) -> Result<()> {
    let path = cache_path(output_dir);
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir))?;

    let (pages, redirects) = store.stats();
    let snapshot = SnapshotRef {
        header: SnapshotHeader {
            version: CACHE_VERSION,
            source: Fingerprint::of(input_path)?,
            pages,
            redirects,
        },
        pages: store.pages().map(|p| p.as_ref()).collect(),
    };

    let partial = path.with_extension("cache.partial");
    let file = File::create(&partial)
        .with_context(|| format!("Failed to create snapshot: {:?}", partial))?;
    bincode::DefaultOptions::new()
        .serialize_into(BufWriter::new(file), &snapshot)
        .context("Failed to encode snapshot")?;
    fs::rename(&partial, &path)
        .with_context(|| format!("Failed to move snapshot into place: {:?}", path))?;

    info!(pages, redirects, path = ?path, "Page store snapshot written");
    Ok(())
}

/// Reads a snapshot without checking it against any dump.
pub fn load_store(path: &Path) -> Result<PageStore> {
    if !path.exists() {
        bail!("No snapshot at {:?}", path);
    }
    Ok(PageStore::from_pages(read_snapshot(path)?.pages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Namespace;
    use crate::store::PageLookup;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        input: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let input = dir.path().join("dump.xml");
            fs::write(&input, "<mediawiki/>\n").unwrap();
            Self { dir, input }
        }

        fn input(&self) -> &str {
            self.input.to_str().unwrap()
        }

        fn out(&self) -> &str {
            self.dir.path().to_str().unwrap()
        }

        fn snapshot(&self) -> PathBuf {
            cache_path(self.out())
        }
    }

    fn store() -> PageStore {
        let mut store = PageStore::new();
        store.put(Namespace::Template, "l", "[[{{{2}}}]]", false);
        store.put(Namespace::Module, "links", "return {}", false);
        store.put(Namespace::Main, "doggie", "#REDIRECT [[dog]]", false);
        store
    }

    #[test]
    fn snapshot_lives_in_output_dir() {
        assert_eq!(cache_path("/out"), PathBuf::from("/out/store.cache"));
    }

    #[test]
    fn absent_snapshot_is_none() {
        let fx = Fixture::new();
        assert!(try_load_store(&fx.snapshot(), fx.input()).unwrap().is_none());
    }

    #[test]
    fn store_survives_snapshot() {
        let fx = Fixture::new();
        save_store(&store(), fx.input(), fx.out()).unwrap();

        let loaded = try_load_store(&fx.snapshot(), fx.input()).unwrap().unwrap();
        assert_eq!(loaded.get(Namespace::Template, "l").unwrap().body, "[[{{{2}}}]]");
        assert!(loaded.exists(Namespace::Module, "links"));
        assert_eq!(loaded.resolve_redirect("doggie"), Some("dog".to_string()));
        assert_eq!(load_store(&fx.snapshot()).unwrap().stats(), store().stats());
    }

    #[test]
    fn transient_pages_are_left_out() {
        let fx = Fixture::new();
        let mut store = store();
        store.put(Namespace::Template, "debug", "x", true);
        save_store(&store, fx.input(), fx.out()).unwrap();

        let loaded = load_store(&fx.snapshot()).unwrap();
        assert!(!loaded.exists(Namespace::Template, "debug"));
    }

    #[test]
    fn changed_dump_makes_snapshot_stale() {
        let fx = Fixture::new();
        save_store(&store(), fx.input(), fx.out()).unwrap();
        fs::write(&fx.input, "<mediawiki>grown</mediawiki>\n").unwrap();
        assert!(try_load_store(&fx.snapshot(), fx.input()).unwrap().is_none());
    }

    #[test]
    fn stale_reasons() {
        let source = Fingerprint {
            path: "a.xml".to_string(),
            modified: 10,
            size: 5,
        };
        let header = SnapshotHeader {
            version: CACHE_VERSION,
            source: source.clone(),
            pages: 0,
            redirects: 0,
        };
        assert_eq!(header.stale_reason(&source), None);
        let moved = Fingerprint {
            path: "b.xml".to_string(),
            ..source.clone()
        };
        assert_eq!(header.stale_reason(&moved).unwrap(), "built from a.xml");
        let old = SnapshotHeader {
            version: CACHE_VERSION + 1,
            ..header
        };
        assert!(old.stale_reason(&source).unwrap().starts_with("format version"));
    }

    #[test]
    fn garbage_snapshot_is_ignored() {
        let fx = Fixture::new();
        fs::write(fx.snapshot(), b"not a snapshot").unwrap();
        assert!(try_load_store(&fx.snapshot(), fx.input()).unwrap().is_none());
        assert!(load_store(&fx.snapshot()).is_err());
    }

    #[test]
    fn missing_snapshot_cannot_be_loaded() {
        assert!(load_store(Path::new("/nonexistent/store.cache")).is_err());
    }
}
