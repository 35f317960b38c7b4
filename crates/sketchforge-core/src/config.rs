//! Service configuration.
//!
//! All knobs live in one `Config` with per-concern sections. Every field has
//! a default so a bare `Config::default()` is a working development setup;
//! the CLI overrides individual fields from flags or environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the compile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Library catalog settings.
    pub catalog: CatalogConfig,

    /// Artifact cache settings.
    pub cache: CacheConfig,

    /// Build slot pool and toolchain settings.
    pub build: BuildConfig,

    /// Session and response cache settings (consumed by the server crate).
    pub server: ServerConfig,
}

/// Library catalog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Remote index URL.
    pub index_url: String,

    /// Refresh interval in seconds. 0 disables periodic refresh.
    pub refresh_interval_secs: u64,

    /// Deadline for index and archive downloads, in seconds.
    pub download_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            index_url: "https://downloads.arduino.cc/libraries/library_index.json".to_string(),
            refresh_interval_secs: 24 * 3600,
            download_timeout_secs: 60,
        }
    }
}

impl CatalogConfig {
    /// Download deadline as a `Duration`.
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Artifact cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory for installed libraries and build slots.
    pub data_dir: PathBuf,

    /// Expiry of the in-memory existence cache, in seconds.
    pub existence_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./sketchforge-data"),
            existence_ttl_secs: 24 * 3600,
        }
    }
}

impl CacheConfig {
    /// Directory holding installed `name@version` artifacts.
    pub fn libraries_dir(&self) -> PathBuf {
        self.data_dir.join("libraries")
    }

    /// Directory holding the build slots.
    pub fn slots_dir(&self) -> PathBuf {
        self.data_dir.join("slots")
    }

    /// Existence cache expiry as a `Duration`.
    pub fn existence_ttl(&self) -> Duration {
        Duration::from_secs(self.existence_ttl_secs)
    }
}

/// Build slot pool and toolchain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Number of build slots; the hard cap on concurrent toolchain runs.
    pub max_concurrent_builds: usize,

    /// Toolchain executable. Resolved via PATH when not absolute.
    pub toolchain: String,

    /// Parallel job hint passed to each toolchain invocation.
    pub toolchain_jobs: usize,

    /// Deadline for one toolchain invocation, in seconds.
    pub toolchain_timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_concurrent_builds: 10,
            toolchain: "platformio".to_string(),
            toolchain_jobs: 2,
            toolchain_timeout_secs: 300,
        }
    }
}

impl BuildConfig {
    /// Toolchain deadline as a `Duration`.
    pub fn toolchain_timeout(&self) -> Duration {
        Duration::from_secs(self.toolchain_timeout_secs)
    }
}

/// Session and response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Max in-flight compile requests per session.
    pub max_requests_per_session: usize,

    /// Max tracked sessions.
    pub max_total_sessions: usize,

    /// Session expiry, in seconds.
    pub session_ttl_secs: u64,

    /// Max cached compile responses.
    pub max_response_caches: usize,

    /// Compile response cache expiry, in seconds.
    pub response_cache_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_requests_per_session: 1,
            max_total_sessions: 10_000,
            session_ttl_secs: 3600,
            max_response_caches: 100,
            response_cache_ttl_secs: 3600,
        }
    }
}

impl ServerConfig {
    /// Session expiry as a `Duration`.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Response cache expiry as a `Duration`.
    pub fn response_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.response_cache_ttl_secs)
    }
}
