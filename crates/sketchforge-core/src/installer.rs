//! Dependency installer.
//!
//! Resolves a list of library requests into a fully-installed, transitively
//! closed set of artifacts: downloads and unpacks archives, recurses into
//! declared dependencies depth-first, invokes the toolchain once per
//! supported board, and persists the resulting manifest into the artifact
//! cache. Siblings are processed strictly in list order, never concurrently,
//! so a failing install cannot corrupt a sibling's partial state.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use rustc_hash::FxHashMap;

use crate::boards::{self, Board};
use crate::cache::{
    ArtifactStore, ExistenceCache, Manifest, ResolvedArtifact, artifact_key, static_lib_file,
};
use crate::catalog::LibraryCatalog;
use crate::error::{Error, Result};
use crate::net::{Connectivity, Fetcher};
use crate::resolver;
use crate::toolchain::Toolchain;

/// File extensions extracted from library archives.
const SOURCE_EXTS: &[&str] = &["c", "cpp", "h", "hpp"];

/// A single library request: a bare name, or a name pinned to an exact
/// version (`Name@1.2.3` on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRequest {
    pub name: String,
    pub version: Option<String>,
}

impl LibraryRequest {
    /// Parse and validate a raw request string. The name charset is
    /// restricted to letters, digits, underscore and space; anything else
    /// (shell metacharacters in particular) is rejected here, before any
    /// network or subprocess use.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (name, version) = match raw.split_once('@') {
            Some((name, version)) => (name.trim(), Some(version.trim())),
            None => (raw, None),
        };

        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
        {
            return Err(Error::InvalidInput(format!("invalid library name: {raw:?}")));
        }
        if let Some(version) = version {
            if version.is_empty()
                || !version
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'))
            {
                return Err(Error::InvalidInput(format!(
                    "invalid library version: {raw:?}"
                )));
            }
        }

        Ok(Self {
            name: name.to_string(),
            version: version.map(str::to_string),
        })
    }
}

/// Parse a `library.properties` file: `key=value` lines, everything else
/// ignored.
fn parse_properties(text: &str) -> FxHashMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// What an archive scan yields: declared metadata plus the source files to
/// install, already mapped to their destination paths relative to `src/`.
struct ArchiveContents {
    declared_arches: Vec<String>,
    depends: Vec<String>,
    files: Vec<(String, Vec<u8>)>,
}

/// Scan a library zip. Source files under `<base>/src/` keep their path
/// relative to `src/`; source files directly under `<base>/` keep their file
/// name; everything else is ignored.
fn scan_archive(bytes: Vec<u8>, archive_file_name: &str) -> Result<ArchiveContents> {
    let base = archive_file_name
        .strip_suffix(".zip")
        .unwrap_or(archive_file_name);
    let src_prefix = format!("{base}/src/");

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut contents = ArchiveContents {
        declared_arches: vec!["*".to_string()],
        depends: Vec::new(),
        files: Vec::new(),
    };

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_string();

        if entry_name.ends_with("library.properties") {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            let props = parse_properties(&text);
            if let Some(arches) = props.get("architectures") {
                contents.declared_arches = split_list(arches);
            }
            if let Some(depends) = props.get("depends") {
                contents.depends = split_list(depends);
            }
            continue;
        }

        let ext = entry_name.rsplit('.').next().unwrap_or_default();
        if !SOURCE_EXTS.contains(&ext) {
            continue;
        }

        let file_name = entry_name.rsplit('/').next().unwrap_or(&entry_name);
        let rel = if let Some(rel) = entry_name.strip_prefix(&src_prefix) {
            rel.to_string()
        } else if entry_name == format!("{base}/{file_name}") {
            file_name.to_string()
        } else {
            continue;
        };

        // Zip entry names are attacker-controlled; refuse traversal.
        if rel.split('/').any(|part| part == "..") {
            tracing::debug!("skipping unsafe archive path {entry_name}");
            continue;
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        contents.files.push((rel, data));
    }

    Ok(contents)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Installs libraries and their transitive dependencies into the artifact
/// cache.
pub struct Installer {
    catalog: Arc<LibraryCatalog>,
    store: Arc<ArtifactStore>,
    existence: Arc<ExistenceCache>,
    fetcher: Arc<dyn Fetcher>,
    probe: Arc<dyn Connectivity>,
    toolchain: Arc<dyn Toolchain>,
    jobs: usize,
}

impl Installer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<LibraryCatalog>,
        store: Arc<ArtifactStore>,
        existence: Arc<ExistenceCache>,
        fetcher: Arc<dyn Fetcher>,
        probe: Arc<dyn Connectivity>,
        toolchain: Arc<dyn Toolchain>,
        jobs: usize,
    ) -> Self {
        Self {
            catalog,
            store,
            existence,
            fetcher,
            probe,
            toolchain,
            jobs,
        }
    }

    /// Install every request (and its transitive dependencies) for a job
    /// targeting `board`, returning the resolved artifacts by name.
    ///
    /// Offline, the whole step short-circuits to an empty map with a
    /// warning; callers must treat "library not actually installed" as
    /// possible even on a successful return.
    pub async fn install(
        &self,
        requests: &[LibraryRequest],
        board: &'static Board,
    ) -> Result<BTreeMap<String, ResolvedArtifact>> {
        let mut resolved = BTreeMap::new();
        if requests.is_empty() {
            return Ok(resolved);
        }

        if !self.probe.is_online().await {
            tracing::warn!("no connectivity, skipping library install");
            return Ok(resolved);
        }

        let mut stack = Vec::new();
        for request in requests {
            self.install_one(request.clone(), board, &mut stack, &mut resolved)
                .await?;
        }
        Ok(resolved)
    }

    /// Install one request depth-first. `stack` is the set of names on the
    /// active resolution path; a name reappearing there is a dependency
    /// cycle and fails fast instead of recursing forever.
    fn install_one<'a>(
        &'a self,
        request: LibraryRequest,
        board: &'static Board,
        stack: &'a mut Vec<String>,
        resolved: &'a mut BTreeMap<String, ResolvedArtifact>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if stack.contains(&request.name) {
                return Err(Error::CyclicDependency(format!(
                    "{} -> {}",
                    stack.join(" -> "),
                    request.name
                )));
            }
            if resolved.contains_key(&request.name) {
                return Ok(());
            }

            let version = resolver::resolve(&self.catalog, &request)?;
            let key = artifact_key(&request.name, &version);

            // Fast path: known good within this session.
            if let Some(artifact) = self.existence.get(&key) {
                resolved.insert(request.name.clone(), artifact);
                return Ok(());
            }

            // Primary cache hit: complete artifact already on disk. No
            // download, no toolchain run.
            if self.store.is_installed(&request.name, &version) {
                let artifact = self.store.load(&request.name, &version).await?;
                self.existence.mark(&artifact);
                resolved.insert(request.name.clone(), artifact);
                return Ok(());
            }

            tracing::info!("installing library {key}");

            let entry = self
                .catalog
                .entry(&request.name, &version)
                .ok_or_else(|| {
                    Error::NotFound(format!("{}, with version {version}", request.name))
                })?;

            let bytes = self.fetcher.get_bytes(&entry.url).await?;
            let contents = scan_archive(bytes, &entry.archive_file_name)?;

            let install_dir = self.store.artifact_dir(&request.name, &version);
            self.extract_sources(&install_dir, &contents.files).await?;

            // Dependencies are fully resolved before this library's own
            // compilation step begins.
            stack.push(request.name.clone());
            let mut dep_requests = Vec::with_capacity(contents.depends.len());
            for depend in &contents.depends {
                dep_requests.push(LibraryRequest::parse(depend)?);
            }
            for dep_request in &dep_requests {
                self.install_one(dep_request.clone(), board, &mut *stack, &mut *resolved)
                    .await?;
            }
            stack.pop();

            let mut manifest = self.fold_dependency_paths(&dep_requests, resolved);

            let scope: Vec<&'static Board> = boards::BOARDS
                .iter()
                .filter(|b| b.supported_by(&contents.declared_arches))
                .collect();

            let config = artifact_build_config(&manifest, &scope);
            tokio::fs::write(install_dir.join("platformio.ini"), config).await?;

            manifest.arches = self
                .build_with_retry(&request.name, &install_dir, &scope, board)
                .await?;

            self.store
                .write_manifest(&request.name, &version, &manifest)
                .await?;

            let artifact = ResolvedArtifact {
                name: request.name.clone(),
                version,
                install_dir,
                manifest,
            };
            self.existence.mark(&artifact);
            resolved.insert(request.name.clone(), artifact);
            Ok(())
        })
    }

    /// Write extracted sources and the stub translation unit the toolchain
    /// compiles against. Destination paths are overwritten; installs to the
    /// same `name@version` are idempotent.
    async fn extract_sources(&self, install_dir: &Path, files: &[(String, Vec<u8>)]) -> Result<()> {
        tokio::fs::create_dir_all(install_dir.join("src")).await?;
        for (rel, data) in files {
            let dest = install_dir.join("src").join(rel);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, data).await?;
        }

        tokio::fs::create_dir_all(install_dir.join("stub")).await?;
        tokio::fs::write(
            install_dir.join("stub").join("main.cpp"),
            "#include <Arduino.h>\n\nvoid setup() {}\nvoid loop() {}\n",
        )
        .await?;
        Ok(())
    }

    /// Fold each dependency's install location and manifest paths into this
    /// library's per-board flags. Paths are recorded relative to the
    /// libraries root (`../name@version/...`) and expanded at compile time.
    fn fold_dependency_paths(
        &self,
        dep_requests: &[LibraryRequest],
        resolved: &BTreeMap<String, ResolvedArtifact>,
    ) -> Manifest {
        let mut manifest = Manifest::default();
        for board in boards::BOARDS {
            manifest.include.insert(board.id.to_string(), String::new());
            manifest.dirs.insert(board.id.to_string(), String::new());
        }

        for dep_request in dep_requests {
            // Absent when the install was skipped offline mid-recursion.
            let Some(dep) = resolved.get(&dep_request.name) else {
                continue;
            };
            let dep_key = dep.key();
            for board in boards::BOARDS {
                if !dep.supports(board.id) {
                    continue;
                }
                let include = manifest
                    .include
                    .get_mut(board.id)
                    .expect("all boards pre-seeded");
                include.push_str(&format!("-I'../{dep_key}/src/' "));
                if let Some(transitive) = dep.manifest.include.get(board.id) {
                    include.push_str(transitive);
                }
                if self
                    .store
                    .static_lib_path(&dep.name, &dep.version, board.id)
                    .is_file()
                {
                    include.push_str(&format!(
                        "-L'../{dep_key}/' -l{}-{} ",
                        dep.name.replace(' ', "-"),
                        board.id
                    ));
                }

                let dirs = manifest.dirs.get_mut(board.id).expect("all boards pre-seeded");
                dirs.push_str(&format!("\t\t\t../{dep_key}/src\n"));
                if let Some(transitive) = dep.manifest.dirs.get(board.id) {
                    dirs.push_str(transitive);
                }
            }
        }
        manifest
    }

    /// Two-step build policy: one pass over the full supported scope, then
    /// at most one retry narrowed to the job's own board. A board that still
    /// fails is dropped from the manifest; the install as a whole continues.
    async fn build_with_retry(
        &self,
        name: &str,
        install_dir: &Path,
        scope: &[&'static Board],
        job_board: &'static Board,
    ) -> Result<Vec<String>> {
        let mut built = Vec::new();
        for board in scope {
            match self.build_board(name, install_dir, board).await {
                Ok(()) => built.push(board.id.to_string()),
                Err(Error::Install {
                    library,
                    board,
                    log,
                }) => tracing::warn!("library build failed for {library} on {board}: {log}"),
                Err(other) => return Err(other),
            }
        }

        let in_scope = scope.iter().any(|b| b.id == job_board.id);
        if in_scope && !built.iter().any(|b| b == job_board.id) {
            tracing::info!("retrying {name} build narrowed to {}", job_board.id);
            match self.build_board(name, install_dir, job_board).await {
                Ok(()) => built.push(job_board.id.to_string()),
                Err(Error::Install { library, log, .. }) => {
                    tracing::warn!(
                        "library {library} still fails on {}, dropping the board from the manifest: {log}",
                        job_board.id
                    );
                }
                Err(other) => return Err(other),
            }
        }
        Ok(built)
    }

    /// Build one board's static library. A non-zero toolchain exit is an
    /// `Install` failure the caller absorbs; spawn failures and timeouts
    /// propagate as-is.
    async fn build_board(
        &self,
        name: &str,
        install_dir: &Path,
        board: &'static Board,
    ) -> Result<()> {
        let output = self.toolchain.run(install_dir, board.id, self.jobs).await?;
        if !output.success {
            return Err(Error::Install {
                library: name.to_string(),
                board: board.id.to_string(),
                log: output.log,
            });
        }

        // Harvest whatever archive the toolchain produced into the artifact
        // root under a stable name.
        let build_dir = install_dir.join(".pio").join("build").join(board.id);
        if let Some(archive) = find_static_lib(&build_dir) {
            tokio::fs::copy(&archive, install_dir.join(static_lib_file(name, board.id))).await?;
        }
        Ok(())
    }
}

/// First `.a` file below `dir`, depth-first.
fn find_static_lib(dir: &Path) -> Option<std::path::PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_static_lib(&path) {
                return Some(found);
            }
        } else if path.extension().is_some_and(|ext| ext == "a") {
            return Some(path);
        }
    }
    None
}

/// The per-artifact build configuration: a stub program target, the library
/// sources as a dependency, and one env per supported board carrying the
/// accumulated dependency flags.
fn artifact_build_config(manifest: &Manifest, scope: &[&'static Board]) -> String {
    let mut out = String::from(
        "[platformio]\nsrc_dir = stub\n\n[env]\nframework = arduino\nbuild_type = release\nlib_ldf_mode = deep+\n",
    );
    for board in scope {
        out.push_str(&format!(
            "\n[env:{id}]\nplatform = {platform}\nboard = {id}\nbuild_flags = -w {include}\nlib_deps = ./src\n{dirs}",
            id = board.id,
            platform = board.platform,
            include = manifest.include.get(board.id).map(String::as_str).unwrap_or(""),
            dirs = manifest.dirs.get(board.id).map(String::as_str).unwrap_or(""),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parsing() {
        let request = LibraryRequest::parse("Servo").unwrap();
        assert_eq!(request.name, "Servo");
        assert_eq!(request.version, None);

        let request = LibraryRequest::parse(" Adafruit GFX Library@1.11.9 ").unwrap();
        assert_eq!(request.name, "Adafruit GFX Library");
        assert_eq!(request.version.as_deref(), Some("1.11.9"));
    }

    #[test]
    fn test_request_rejects_shell_metacharacters() {
        for raw in ["Servo; rm -rf /", "Servo|cat", "Servo`id`", "", "../etc"] {
            assert!(
                matches!(LibraryRequest::parse(raw), Err(Error::InvalidInput(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_properties() {
        let props = parse_properties(
            "name=Servo\nversion=1.2.0\narchitectures=avr,esp32\ndepends=SPI, Wire\nno equals here\n",
        );
        assert_eq!(props["architectures"], "avr,esp32");
        assert_eq!(split_list(&props["depends"]), vec!["SPI", "Wire"]);
        assert_eq!(props["name"], "Servo");
    }

    #[test]
    fn test_scan_archive_path_rules() {
        let mut zip_bytes = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut zip_bytes));
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("Servo-1.2.0/src/Servo.h", options).unwrap();
            std::io::Write::write_all(&mut writer, b"// header").unwrap();
            writer
                .start_file("Servo-1.2.0/src/avr/Servo.cpp", options)
                .unwrap();
            std::io::Write::write_all(&mut writer, b"// impl").unwrap();
            writer.start_file("Servo-1.2.0/Tone.cpp", options).unwrap();
            std::io::Write::write_all(&mut writer, b"// root file").unwrap();
            writer
                .start_file("Servo-1.2.0/examples/sweep/sweep.cpp", options)
                .unwrap();
            std::io::Write::write_all(&mut writer, b"// ignored").unwrap();
            writer.start_file("Servo-1.2.0/README.md", options).unwrap();
            std::io::Write::write_all(&mut writer, b"ignored").unwrap();
            writer
                .start_file("Servo-1.2.0/library.properties", options)
                .unwrap();
            std::io::Write::write_all(&mut writer, b"architectures=avr\ndepends=SPI\n").unwrap();
            writer.finish().unwrap();
        }

        let contents = scan_archive(zip_bytes, "Servo-1.2.0.zip").unwrap();
        let mut paths: Vec<&str> = contents.files.iter().map(|(p, _)| p.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["Servo.h", "Tone.cpp", "avr/Servo.cpp"]);
        assert_eq!(contents.declared_arches, vec!["avr"]);
        assert_eq!(contents.depends, vec!["SPI"]);
    }

    #[test]
    fn test_scan_archive_defaults_to_universal() {
        let mut zip_bytes = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut zip_bytes));
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("Blink-0.1.0/Blink.h", options).unwrap();
            std::io::Write::write_all(&mut writer, b"// header").unwrap();
            writer.finish().unwrap();
        }
        let contents = scan_archive(zip_bytes, "Blink-0.1.0.zip").unwrap();
        assert_eq!(contents.declared_arches, vec!["*"]);
        assert!(contents.depends.is_empty());
    }

    #[test]
    fn test_build_config_has_env_per_scope_board() {
        let mut manifest = Manifest::default();
        manifest
            .include
            .insert("uno".to_string(), "-I'../SPI@1.0.0/src/' ".to_string());
        manifest.dirs.insert(
            "uno".to_string(),
            "\t\t\t../SPI@1.0.0/src\n".to_string(),
        );

        let uno = crate::boards::lookup("arduino:avr:uno").unwrap();
        let config = artifact_build_config(&manifest, &[uno]);
        assert!(config.contains("[env:uno]"));
        assert!(config.contains("platform = atmelavr"));
        assert!(config.contains("build_flags = -w -I'../SPI@1.0.0/src/' "));
        assert!(config.contains("lib_deps = ./src\n\t\t\t../SPI@1.0.0/src\n"));
        assert!(!config.contains("[env:megaADK]"));
    }
}
