//! Error types for sketchforge-core.

use thiserror::Error;

/// Result type for sketchforge-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, installing or compiling.
#[derive(Debug, Error)]
pub enum Error {
    /// Library name or version absent from the catalog.
    #[error("library not found: {0}")]
    NotFound(String),

    /// Request rejected before any subprocess or network use.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A library reappeared on the active resolution stack.
    #[error("cyclic dependency detected: {0}")]
    CyclicDependency(String),

    /// The final sketch compile failed. `log` carries the toolchain's
    /// combined stdout/stderr verbatim.
    #[error("compilation failed")]
    Compile { log: String },

    /// A per-architecture library build failed. Absorbed by the installer;
    /// the architecture is dropped from the manifest.
    #[error("install failed for {library} on {board}")]
    Install {
        library: String,
        board: String,
        log: String,
    },

    /// No connectivity; the install step was skipped entirely.
    #[error("no connectivity")]
    Offline,

    /// An external process or network call exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Toolchain executable missing or unrunnable.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// HTTP error while fetching the index or an archive.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed archive.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
