//! Library catalog.
//!
//! Holds the remote library index: for every library name, the list of known
//! versions with their download locations and declared metadata. The index is
//! replaced wholesale on refresh and is read-only to everything else in
//! between.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::Result;
use crate::net::{Connectivity, Fetcher};

/// One versioned library release as published in the remote index.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub version: String,
    /// Archive download location.
    pub url: String,
    /// Zip file name; entries inside the archive are rooted under this name
    /// without the `.zip` suffix.
    #[serde(rename = "archiveFileName")]
    pub archive_file_name: String,
    /// Declared architecture tags, `*` meaning universal. The
    /// `library.properties` inside the archive is authoritative at install
    /// time; this copy serves catalog queries.
    #[serde(default)]
    pub architectures: Vec<String>,
    /// Declared dependencies by name.
    #[serde(default, rename = "dependencies")]
    pub depends_on: Vec<DependencyRef>,
}

/// A dependency reference in the index.
#[derive(Debug, Clone, Deserialize)]
pub struct DependencyRef {
    pub name: String,
}

/// Shape of the remote index document.
#[derive(Debug, Deserialize)]
struct LibraryIndex {
    libraries: Vec<CatalogEntry>,
}

/// The library index, indexed by name.
///
/// An explicit service object: `refresh` is called by a scheduler task (or
/// at startup), never as a side effect of a lookup.
pub struct LibraryCatalog {
    index: RwLock<FxHashMap<String, Vec<CatalogEntry>>>,
    index_url: String,
    fetcher: Arc<dyn Fetcher>,
    probe: Arc<dyn Connectivity>,
}

impl LibraryCatalog {
    pub fn new(index_url: String, fetcher: Arc<dyn Fetcher>, probe: Arc<dyn Connectivity>) -> Self {
        Self {
            index: RwLock::new(FxHashMap::default()),
            index_url,
            fetcher,
            probe,
        }
    }

    /// Fetch the remote index and replace the in-memory one. Skips with a
    /// warning when offline; the previous index stays in place.
    pub async fn refresh(&self) -> Result<()> {
        if !self.probe.is_online().await {
            tracing::warn!("no connectivity, skipping library index refresh");
            return Ok(());
        }

        tracing::info!("updating library index from {}", self.index_url);
        let bytes = self.fetcher.get_bytes(&self.index_url).await?;
        let parsed: LibraryIndex = serde_json::from_slice(&bytes)?;

        let mut indexed: FxHashMap<String, Vec<CatalogEntry>> = FxHashMap::default();
        for entry in parsed.libraries {
            indexed.entry(entry.name.clone()).or_default().push(entry);
        }

        let count = indexed.len();
        *self.index.write().expect("catalog lock poisoned") = indexed;
        tracing::info!("library index updated, {count} libraries known");
        Ok(())
    }

    /// All known releases of a library, or `None` for an unknown name.
    pub fn entries(&self, name: &str) -> Option<Vec<CatalogEntry>> {
        self.index
            .read()
            .expect("catalog lock poisoned")
            .get(name)
            .cloned()
    }

    /// The release of `name` with exactly `version`.
    pub fn entry(&self, name: &str, version: &str) -> Option<CatalogEntry> {
        self.entries(name)?
            .into_iter()
            .find(|e| e.version == version)
    }

    /// All known version strings for a name.
    pub fn versions(&self, name: &str) -> Option<Vec<String>> {
        self.entries(name)
            .map(|entries| entries.into_iter().map(|e| e.version).collect())
    }

    /// Replace the index directly. Test seam.
    #[doc(hidden)]
    pub fn set_entries(&self, entries: Vec<CatalogEntry>) {
        let mut indexed: FxHashMap<String, Vec<CatalogEntry>> = FxHashMap::default();
        for entry in entries {
            indexed.entry(entry.name.clone()).or_default().push(entry);
        }
        *self.index.write().expect("catalog lock poisoned") = indexed;
    }
}

/// Spawn the periodic refresh task. A zero interval disables refresh and no
/// task is spawned.
pub fn spawn_refresh_task(
    catalog: Arc<LibraryCatalog>,
    interval: Duration,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(err) = catalog.refresh().await {
                tracing::warn!("library index refresh failed: {err}");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct CannedFetcher(Vec<u8>);

    #[async_trait]
    impl Fetcher for CannedFetcher {
        async fn get_bytes(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct Online(bool);

    #[async_trait]
    impl Connectivity for Online {
        async fn is_online(&self) -> bool {
            self.0
        }
    }

    fn catalog_with(json: &str, online: bool) -> LibraryCatalog {
        LibraryCatalog::new(
            "https://example.invalid/index.json".to_string(),
            Arc::new(CannedFetcher(json.as_bytes().to_vec())),
            Arc::new(Online(online)),
        )
    }

    #[tokio::test]
    async fn test_refresh_indexes_by_name() {
        let catalog = catalog_with(
            r#"{"libraries": [
                {"name": "Servo", "version": "1.1.8", "url": "u", "archiveFileName": "Servo-1.1.8.zip"},
                {"name": "Servo", "version": "1.2.0", "url": "u", "archiveFileName": "Servo-1.2.0.zip",
                 "architectures": ["avr"]}
            ]}"#,
            true,
        );
        catalog.refresh().await.unwrap();

        let versions = catalog.versions("Servo").unwrap();
        assert_eq!(versions, vec!["1.1.8", "1.2.0"]);
        assert!(catalog.entries("Stepper").is_none());

        let entry = catalog.entry("Servo", "1.2.0").unwrap();
        assert_eq!(entry.architectures, vec!["avr"]);
    }

    #[tokio::test]
    async fn test_refresh_offline_keeps_previous_index() {
        let catalog = catalog_with(r#"{"libraries": []}"#, false);
        catalog.set_entries(vec![CatalogEntry {
            name: "Servo".to_string(),
            version: "1.0.0".to_string(),
            url: "u".to_string(),
            archive_file_name: "Servo-1.0.0.zip".to_string(),
            architectures: vec![],
            depends_on: vec![],
        }]);

        catalog.refresh().await.unwrap();
        assert!(catalog.entries("Servo").is_some());
    }
}
