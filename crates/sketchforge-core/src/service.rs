//! The compile service facade.
//!
//! Wires the catalog, installer, slot pool and sketch compiler together and
//! exposes the one entry point a transport layer needs: take a source tree,
//! a board and a library list, give back firmware or a structured failure.

use std::sync::Arc;

use crate::boards;
use crate::cache::{ArtifactStore, ExistenceCache};
use crate::catalog::LibraryCatalog;
use crate::compiler::{Firmware, SketchCompiler};
use crate::config::Config;
use crate::error::Result;
use crate::installer::{Installer, LibraryRequest};
use crate::net::{Connectivity, Fetcher, HttpFetcher, TcpProbe};
use crate::slots::SlotPool;
use crate::toolchain::{PlatformIo, Toolchain};

/// One fully-wired compile service.
pub struct CompileService {
    catalog: Arc<LibraryCatalog>,
    installer: Installer,
    compiler: SketchCompiler,
    pool: SlotPool,
}

impl CompileService {
    /// Wire the service with its production backends: reqwest downloads, a
    /// TCP connectivity probe against the index host, and the PlatformIO
    /// toolchain from config.
    pub async fn new(config: &Config) -> Result<Self> {
        let fetcher: Arc<dyn Fetcher> =
            Arc::new(HttpFetcher::new(config.catalog.download_timeout()));
        let probe: Arc<dyn Connectivity> =
            Arc::new(TcpProbe::for_index_url(&config.catalog.index_url));
        let toolchain: Arc<dyn Toolchain> = Arc::new(PlatformIo::locate(
            &config.build.toolchain,
            config.build.toolchain_timeout(),
        )?);
        Self::with_parts(config, fetcher, probe, toolchain).await
    }

    /// Wire the service with injected backends. This is the seam tests and
    /// alternative deployments use.
    pub async fn with_parts(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        probe: Arc<dyn Connectivity>,
        toolchain: Arc<dyn Toolchain>,
    ) -> Result<Self> {
        let libraries_dir = config.cache.libraries_dir();
        tokio::fs::create_dir_all(&libraries_dir).await?;

        let store = Arc::new(ArtifactStore::new(&libraries_dir));
        let existence = Arc::new(ExistenceCache::new(config.cache.existence_ttl()));
        let catalog = Arc::new(LibraryCatalog::new(
            config.catalog.index_url.clone(),
            Arc::clone(&fetcher),
            Arc::clone(&probe),
        ));

        let installer = Installer::new(
            Arc::clone(&catalog),
            Arc::clone(&store),
            existence,
            fetcher,
            probe,
            Arc::clone(&toolchain),
            config.build.toolchain_jobs,
        );
        let compiler = SketchCompiler::new(
            toolchain,
            libraries_dir,
            config.build.toolchain_jobs,
        );
        let pool = SlotPool::provision(
            config.cache.slots_dir(),
            config.build.max_concurrent_builds,
        )
        .await?;

        Ok(Self {
            catalog,
            installer,
            compiler,
            pool,
        })
    }

    /// The library catalog, for startup refresh and the scheduler task.
    pub fn catalog(&self) -> Arc<LibraryCatalog> {
        Arc::clone(&self.catalog)
    }

    /// Number of build slots.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Run one compile job end to end.
    ///
    /// Input validation happens before anything else; the slot is acquired
    /// before dependency installation so the pool's cap bounds every
    /// toolchain invocation, and the guard releases it on every exit path.
    pub async fn compile(
        &self,
        source_code: &str,
        board_fqbn: &str,
        libraries: &[String],
    ) -> Result<Firmware> {
        let board = boards::lookup(board_fqbn)?;
        let mut requests = Vec::with_capacity(libraries.len());
        for raw in libraries {
            requests.push(LibraryRequest::parse(raw)?);
        }

        let slot = self.pool.acquire().await;
        tracing::debug!("slot {} acquired for {board_fqbn}", slot.id);

        let resolved = self.installer.install(&requests, board).await?;
        self.compiler
            .compile(source_code, board, &resolved, &slot)
            .await
    }
}
