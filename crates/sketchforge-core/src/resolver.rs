//! Version resolution.
//!
//! Picks the concrete version a library request installs: an exact request
//! is returned verbatim, a bare name resolves to the maximum known version
//! under semantic-version ordering.

use semver::Version;

use crate::catalog::LibraryCatalog;
use crate::error::{Error, Result};
use crate::installer::LibraryRequest;

/// Resolve a request to a concrete version string.
///
/// An exact `version` is passed through without an existence check; a
/// missing version surfaces later as an install failure. A name absent from
/// the catalog is `NotFound`.
pub fn resolve(catalog: &LibraryCatalog, request: &LibraryRequest) -> Result<String> {
    if let Some(version) = &request.version {
        return Ok(version.clone());
    }

    let versions = catalog
        .versions(&request.name)
        .ok_or_else(|| Error::NotFound(request.name.clone()))?;

    latest(&versions).ok_or_else(|| Error::NotFound(request.name.clone()))
}

/// Maximum of a list of version strings under semantic ordering. Ties keep
/// the earliest entry, so the result is deterministic for a fixed catalog
/// snapshot.
fn latest(versions: &[String]) -> Option<String> {
    let mut best: Option<(&String, Version)> = None;
    for version in versions {
        let Some(key) = sort_key(version) else {
            tracing::debug!("ignoring unparseable version {version}");
            continue;
        };
        match &best {
            Some((_, best_key)) if key <= *best_key => {}
            _ => best = Some((version, key)),
        }
    }
    best.map(|(v, _)| v.clone())
}

/// Numeric ordering key for a version string. The version is truncated at
/// the first character outside `[0-9.]`, stripping pre-release and build
/// suffixes; short versions are padded to `major.minor.patch`.
fn sort_key(version: &str) -> Option<Version> {
    let numeric = version
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .next()
        .unwrap_or_default();

    let mut parts = numeric.split('.').filter(|p| !p.is_empty());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::net::{Connectivity, Fetcher};
    use async_trait::async_trait;

    struct NoFetch;

    #[async_trait]
    impl Fetcher for NoFetch {
        async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
            panic!("unexpected fetch of {url}");
        }
    }

    #[async_trait]
    impl Connectivity for NoFetch {
        async fn is_online(&self) -> bool {
            false
        }
    }

    fn catalog(versions: &[&str]) -> LibraryCatalog {
        let catalog = LibraryCatalog::new(String::new(), Arc::new(NoFetch), Arc::new(NoFetch));
        catalog.set_entries(
            versions
                .iter()
                .map(|v| CatalogEntry {
                    name: "Servo".to_string(),
                    version: v.to_string(),
                    url: String::new(),
                    archive_file_name: format!("Servo-{v}.zip"),
                    architectures: vec![],
                    depends_on: vec![],
                })
                .collect(),
        );
        catalog
    }

    fn bare(name: &str) -> LibraryRequest {
        LibraryRequest::parse(name).unwrap()
    }

    #[test]
    fn test_numeric_ordering_beats_lexicographic() {
        let catalog_a = catalog(&["1.2.0", "1.10.0", "2.0.0"]);
        assert_eq!(resolve(&catalog_a, &bare("Servo")).unwrap(), "2.0.0");

        let catalog_b = catalog(&["1.2.0", "1.10.0"]);
        assert_eq!(resolve(&catalog_b, &bare("Servo")).unwrap(), "1.10.0");
    }

    #[test]
    fn test_exact_version_passthrough() {
        let catalog = catalog(&["1.0.0"]);
        let request = LibraryRequest::parse("Servo@9.9.9").unwrap();
        // No existence check at this stage.
        assert_eq!(resolve(&catalog, &request).unwrap(), "9.9.9");
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let catalog = catalog(&["1.0.0"]);
        let request = bare("Stepper");
        assert!(matches!(resolve(&catalog, &request), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_prerelease_suffix_stripped() {
        assert_eq!(sort_key("2.0.0-rc1"), Some(Version::new(2, 0, 0)));
        assert_eq!(sort_key("1.2"), Some(Version::new(1, 2, 0)));
        let catalog = catalog(&["2.0.0-beta", "1.9.9"]);
        assert_eq!(resolve(&catalog, &bare("Servo")).unwrap(), "2.0.0-beta");
    }
}
