//! Compiled-artifact cache.
//!
//! Installed libraries live under `<data_dir>/libraries/<name>@<version>/`:
//! extracted sources in `src/`, one static library per built board, and a
//! `manifest.json` recording the include/library paths dependents and final
//! compiles consume instead of re-deriving them. On-disk artifacts survive
//! restarts and are never evicted; the in-memory existence cache is a
//! time-bound optimization only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-artifact manifest, one per installed `name@version`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Board id -> accumulated include and link flags (this library's
    /// dependencies, transitively).
    pub include: BTreeMap<String, String>,
    /// Board id -> accumulated `lib_deps` directory lines.
    pub dirs: BTreeMap<String, String>,
    /// Board ids that actually produced an artifact. A board whose build
    /// failed is absent.
    pub arches: Vec<String>,
}

/// A fully-installed library version. Immutable once created; shared
/// read-only by every job that depends on it.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    pub name: String,
    pub version: String,
    pub install_dir: PathBuf,
    pub manifest: Manifest,
}

impl ResolvedArtifact {
    /// Cache key, `name@version`.
    pub fn key(&self) -> String {
        artifact_key(&self.name, &self.version)
    }

    /// Whether this artifact was built for the given board.
    pub fn supports(&self, board_id: &str) -> bool {
        self.manifest.arches.iter().any(|a| a == board_id)
    }
}

/// Canonical `name@version` key.
pub fn artifact_key(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

/// Static library file name for one board, `libSome-Library-uno.a`.
pub fn static_lib_file(name: &str, board_id: &str) -> String {
    format!("lib{}-{}.a", name.replace(' ', "-"), board_id)
}

/// On-disk artifact store rooted at the configured libraries directory.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one `name@version` artifact.
    pub fn artifact_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(artifact_key(name, version))
    }

    /// Primary cache-hit check. The manifest is written last during install,
    /// so its presence marks a complete artifact; a partially-extracted
    /// directory does not count and will be overwritten by a re-install.
    pub fn is_installed(&self, name: &str, version: &str) -> bool {
        self.artifact_dir(name, version).join("manifest.json").is_file()
    }

    /// Path of the static library for one board, if it was built.
    pub fn static_lib_path(&self, name: &str, version: &str, board_id: &str) -> PathBuf {
        self.artifact_dir(name, version)
            .join(static_lib_file(name, board_id))
    }

    pub async fn read_manifest(&self, name: &str, version: &str) -> Result<Manifest> {
        let path = self.artifact_dir(name, version).join("manifest.json");
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn write_manifest(&self, name: &str, version: &str, manifest: &Manifest) -> Result<()> {
        let path = self.artifact_dir(name, version).join("manifest.json");
        let bytes = serde_json::to_vec(manifest)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    /// Load an installed artifact back from disk.
    pub async fn load(&self, name: &str, version: &str) -> Result<ResolvedArtifact> {
        let manifest = self.read_manifest(name, version).await?;
        Ok(ResolvedArtifact {
            name: name.to_string(),
            version: version.to_string(),
            install_dir: self.artifact_dir(name, version),
            manifest,
        })
    }
}

/// Time-bound in-memory existence cache over `name@version` keys.
///
/// Avoids re-touching the filesystem for libraries already known good within
/// a session: a hit returns the loaded artifact directly (artifacts are
/// immutable once created, so the copy never goes stale). Purely an
/// optimization: a miss falls through to the on-disk check, and entries
/// expire after the configured TTL.
pub struct ExistenceCache {
    ttl: Duration,
    entries: Mutex<FxHashMap<String, (Instant, ResolvedArtifact)>>,
}

impl ExistenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Record an artifact as known-installed.
    pub fn mark(&self, artifact: &ResolvedArtifact) {
        self.entries
            .lock()
            .expect("existence cache lock poisoned")
            .insert(artifact.key(), (Instant::now() + self.ttl, artifact.clone()));
    }

    /// The cached artifact for `key`, unless expired.
    pub fn get(&self, key: &str) -> Option<ResolvedArtifact> {
        let mut entries = self.entries.lock().expect("existence cache lock poisoned");
        match entries.get(key) {
            Some((deadline, artifact)) if *deadline > Instant::now() => Some(artifact.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}
