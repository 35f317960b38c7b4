//! Sketch compilation.
//!
//! Assembles the final build configuration inside an acquired slot — the
//! selected board plus every resolved artifact's include and library paths —
//! invokes the toolchain, and extracts the firmware image in whichever
//! encoding the board family emits.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;

use crate::boards::Board;
use crate::cache::ResolvedArtifact;
use crate::error::{Error, Result};
use crate::slots::BuildSlot;
use crate::toolchain::Toolchain;

/// Firmware image encodings, mutually exclusive per board family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareEncoding {
    /// Text hex records, returned as-is.
    Hex,
    /// UF2 blob, base64-encoded.
    Uf2,
    /// Raw binary blob, base64-encoded.
    Binary,
}

/// A produced firmware image.
#[derive(Debug, Clone)]
pub struct Firmware {
    pub encoding: FirmwareEncoding,
    /// Hex text, or base64 for the binary encodings.
    pub payload: String,
}

/// Output files probed after a successful build, in priority order.
const FIRMWARE_PROBES: &[(&str, FirmwareEncoding)] = &[
    ("firmware.hex", FirmwareEncoding::Hex),
    ("firmware.uf2", FirmwareEncoding::Uf2),
    ("firmware.bin", FirmwareEncoding::Binary),
];

/// Compiles sketches inside build slots.
pub struct SketchCompiler {
    toolchain: Arc<dyn Toolchain>,
    /// Absolute libraries root; manifests store paths relative to it.
    libraries_root: PathBuf,
    jobs: usize,
}

impl SketchCompiler {
    pub fn new(toolchain: Arc<dyn Toolchain>, libraries_root: PathBuf, jobs: usize) -> Self {
        let libraries_root = std::path::absolute(&libraries_root).unwrap_or(libraries_root);
        Self {
            toolchain,
            libraries_root,
            jobs,
        }
    }

    /// Compile `source_code` for `board` in `slot`, linking against the
    /// resolved artifacts. On toolchain failure the combined diagnostic text
    /// is returned verbatim inside `CompileError`.
    pub async fn compile(
        &self,
        source_code: &str,
        board: &'static Board,
        resolved: &BTreeMap<String, ResolvedArtifact>,
        slot: &BuildSlot,
    ) -> Result<Firmware> {
        // The mandatory platform include wraps every sketch.
        let wrapped = format!("#include <Arduino.h>\n{source_code}");
        tokio::fs::write(slot.source_path(), wrapped).await?;

        let (includes, libs) = self.flag_strings(board, resolved);
        let base = tokio::fs::read_to_string(slot.base_config_path()).await?;
        let config = format!(
            "{base}\n[env:build]\nextends = env:{}\nbuild_flags = -w {includes}\nlib_deps = {libs}\n",
            board.id
        );
        tokio::fs::write(slot.config_path(), config).await?;

        let output = self.toolchain.run(&slot.dir, "build", self.jobs).await?;
        if !output.success {
            tracing::warn!("compilation failed in slot {}: {}", slot.id, output.log);
            return Err(Error::Compile { log: output.log });
        }

        self.extract_firmware(slot).await
    }

    /// Concatenate every artifact's include flags and library directories
    /// for the job's board. Manifest entries are stored relative to the
    /// libraries root and expanded to absolute paths here.
    fn flag_strings(
        &self,
        board: &'static Board,
        resolved: &BTreeMap<String, ResolvedArtifact>,
    ) -> (String, String) {
        let root = format!("{}/", self.libraries_root.display());
        let mut includes = String::new();
        let mut libs = String::new();

        for artifact in resolved.values() {
            let key = artifact.key();
            includes.push_str(&format!("-I'{root}{key}/src' "));
            libs.push_str(&format!("\n\t\t\t{root}{key}/src "));

            if let Some(entry) = artifact.manifest.include.get(board.id) {
                includes.push_str(&entry.replace("../", &root));
            }
            if let Some(entry) = artifact.manifest.dirs.get(board.id) {
                libs.push('\n');
                libs.push_str(&entry.replace("../", &root));
            }
        }
        (includes, libs)
    }

    /// Probe the expected output files in priority order and return
    /// whichever is present, base64-encoding the binary forms.
    async fn extract_firmware(&self, slot: &BuildSlot) -> Result<Firmware> {
        for (file, encoding) in FIRMWARE_PROBES {
            let path = slot.firmware_dir().join(file);
            if !path.is_file() {
                continue;
            }
            let payload = match encoding {
                FirmwareEncoding::Hex => tokio::fs::read_to_string(&path).await?,
                FirmwareEncoding::Uf2 | FirmwareEncoding::Binary => {
                    let bytes = tokio::fs::read(&path).await?;
                    base64::engine::general_purpose::STANDARD.encode(bytes)
                }
            };
            return Ok(Firmware {
                encoding: *encoding,
                payload,
            });
        }
        Err(Error::Toolchain(
            "toolchain reported success but produced no firmware image".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use super::*;
    use crate::boards;
    use crate::cache::Manifest;
    use crate::slots::SlotPool;
    use crate::toolchain::RunOutput;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Toolchain double: records invocations, returns a scripted result and
    /// optionally drops a firmware file into the build tree.
    struct ScriptedToolchain {
        success: bool,
        log: String,
        firmware: Option<(&'static str, Vec<u8>)>,
        runs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Toolchain for ScriptedToolchain {
        async fn run(&self, workdir: &Path, env: &str, _jobs: usize) -> crate::error::Result<RunOutput> {
            self.runs.lock().unwrap().push(env.to_string());
            if let Some((name, bytes)) = &self.firmware {
                let out = workdir.join(".pio").join("build").join(env);
                tokio::fs::create_dir_all(&out).await.unwrap();
                tokio::fs::write(out.join(name), bytes).await.unwrap();
            }
            Ok(RunOutput {
                success: self.success,
                log: self.log.clone(),
            })
        }
    }

    async fn slot_fixture() -> (TempDir, SlotPool) {
        let dir = TempDir::new().unwrap();
        let pool = SlotPool::provision(dir.path().join("slots"), 1).await.unwrap();
        (dir, pool)
    }

    fn uno() -> &'static boards::Board {
        boards::lookup("arduino:avr:uno").unwrap()
    }

    #[tokio::test]
    async fn test_compile_failure_carries_combined_log_verbatim() {
        let (dir, pool) = slot_fixture().await;
        let toolchain = Arc::new(ScriptedToolchain {
            success: false,
            log: "out text\nerr text\n".to_string(),
            firmware: None,
            runs: Mutex::new(Vec::new()),
        });
        let compiler = SketchCompiler::new(toolchain, dir.path().join("libraries"), 2);

        let slot = pool.acquire().await;
        let err = compiler
            .compile("void loop() {}", uno(), &BTreeMap::new(), &slot)
            .await
            .unwrap_err();
        match err {
            Error::Compile { log } => assert_eq!(log, "out text\nerr text\n"),
            other => panic!("expected CompileError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_compile_returns_hex_text() {
        let (dir, pool) = slot_fixture().await;
        let toolchain = Arc::new(ScriptedToolchain {
            success: true,
            log: String::new(),
            firmware: Some(("firmware.hex", b":100000000C94".to_vec())),
            runs: Mutex::new(Vec::new()),
        });
        let compiler = SketchCompiler::new(toolchain, dir.path().join("libraries"), 2);

        let slot = pool.acquire().await;
        let firmware = compiler
            .compile("void loop() {}", uno(), &BTreeMap::new(), &slot)
            .await
            .unwrap();
        assert_eq!(firmware.encoding, FirmwareEncoding::Hex);
        assert_eq!(firmware.payload, ":100000000C94");
    }

    #[tokio::test]
    async fn test_compile_base64_encodes_uf2() {
        let (dir, pool) = slot_fixture().await;
        let toolchain = Arc::new(ScriptedToolchain {
            success: true,
            log: String::new(),
            firmware: Some(("firmware.uf2", vec![0x55, 0x46, 0x32, 0x0a])),
            runs: Mutex::new(Vec::new()),
        });
        let compiler = SketchCompiler::new(toolchain, dir.path().join("libraries"), 2);

        let slot = pool.acquire().await;
        let firmware = compiler
            .compile("void loop() {}", uno(), &BTreeMap::new(), &slot)
            .await
            .unwrap();
        assert_eq!(firmware.encoding, FirmwareEncoding::Uf2);
        assert_eq!(
            firmware.payload,
            base64::engine::general_purpose::STANDARD.encode([0x55, 0x46, 0x32, 0x0a])
        );
    }

    #[tokio::test]
    async fn test_compile_writes_wrapped_source_and_job_env() {
        let (dir, pool) = slot_fixture().await;
        let toolchain = Arc::new(ScriptedToolchain {
            success: true,
            log: String::new(),
            firmware: Some(("firmware.hex", b"hex".to_vec())),
            runs: Mutex::new(Vec::new()),
        });
        let compiler =
            SketchCompiler::new(Arc::clone(&toolchain) as Arc<dyn Toolchain>, dir.path().join("libraries"), 2);

        let mut resolved = BTreeMap::new();
        let mut manifest = Manifest::default();
        manifest
            .include
            .insert("uno".to_string(), "-I'../SPI@1.0.0/src/' ".to_string());
        manifest
            .dirs
            .insert("uno".to_string(), "\t\t\t../SPI@1.0.0/src\n".to_string());
        manifest.arches.push("uno".to_string());
        resolved.insert(
            "Servo".to_string(),
            ResolvedArtifact {
                name: "Servo".to_string(),
                version: "1.2.0".to_string(),
                install_dir: dir.path().join("libraries").join("Servo@1.2.0"),
                manifest,
            },
        );

        let slot = pool.acquire().await;
        compiler
            .compile("void loop() {}", uno(), &resolved, &slot)
            .await
            .unwrap();

        let source = std::fs::read_to_string(slot.source_path()).unwrap();
        assert!(source.starts_with("#include <Arduino.h>\n"));
        assert!(source.contains("void loop() {}"));

        let config = std::fs::read_to_string(slot.config_path()).unwrap();
        assert!(config.contains("[env:build]"));
        assert!(config.contains("extends = env:uno"));
        assert!(config.contains("Servo@1.2.0/src"));
        // Relative manifest entries are expanded against the libraries root.
        assert!(!config.contains("'../SPI@1.0.0"));
        assert!(config.contains("SPI@1.0.0/src/"));

        assert_eq!(toolchain.runs.lock().unwrap().as_slice(), ["build"]);
    }
}
