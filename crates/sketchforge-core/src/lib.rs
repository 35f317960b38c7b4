//! Core engine of the sketchforge compile service.
//!
//! # Architecture
//!
//! - **Catalog**: the remote library index, refreshed wholesale
//! - **Resolver**: library request → concrete version
//! - **Artifact cache**: on-disk `name@version` store plus a time-bound
//!   in-memory existence cache
//! - **Installer**: recursive dependency installation, per-board library
//!   builds, manifest persistence
//! - **Slot pool**: N reusable build workspaces behind a counting limiter
//! - **Sketch compiler**: final build configuration, toolchain invocation,
//!   firmware extraction
//!
//! The HTTP layer lives in `sketchforge-server`; this crate only knows
//! about sources, boards and libraries.

pub mod boards;
pub mod cache;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod error;
pub mod installer;
pub mod net;
pub mod resolver;
pub mod service;
pub mod slots;
pub mod toolchain;

pub use boards::{BOARDS, Board};
pub use cache::{ArtifactStore, ExistenceCache, Manifest, ResolvedArtifact};
pub use catalog::{CatalogEntry, LibraryCatalog, spawn_refresh_task};
pub use compiler::{Firmware, FirmwareEncoding, SketchCompiler};
pub use config::Config;
pub use error::{Error, Result};
pub use installer::{Installer, LibraryRequest};
pub use net::{Connectivity, Fetcher, HttpFetcher, TcpProbe};
pub use service::CompileService;
pub use slots::{BuildSlot, SlotGuard, SlotPool};
pub use toolchain::{PlatformIo, RunOutput, Toolchain};
