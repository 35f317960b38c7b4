//! Toolchain invocation.
//!
//! The toolchain is an opaque external process: given a working directory, a
//! target environment and a parallel-job hint it either produces build output
//! on disk or exits non-zero with diagnostic text. Every invocation runs
//! under a deadline; a hung toolchain is killed and surfaces as `Timeout`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Captured result of one toolchain run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Whether the process exited zero.
    pub success: bool,
    /// Captured stdout followed by stderr, verbatim. This is the primary
    /// diagnostic surface returned to users on failure.
    pub log: String,
}

/// Seam over the external build tool so installs and compiles can be
/// exercised without a toolchain on PATH.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Run the toolchain in `workdir` against environment `env`.
    async fn run(&self, workdir: &Path, env: &str, jobs: usize) -> Result<RunOutput>;
}

/// The real PlatformIO-backed toolchain.
pub struct PlatformIo {
    program: PathBuf,
    timeout: Duration,
}

impl PlatformIo {
    /// Locate the toolchain executable. A relative `configured` name is
    /// resolved via PATH; failure to find it is a startup error, not a
    /// per-job one.
    pub fn locate(configured: &str, timeout: Duration) -> Result<Self> {
        let program = if Path::new(configured).is_absolute() {
            let path = PathBuf::from(configured);
            if !path.is_file() {
                return Err(Error::Toolchain(format!("{configured} does not exist")));
            }
            path
        } else {
            which::which(configured)
                .map_err(|_| Error::Toolchain(format!("{configured} not found in PATH")))?
        };
        Ok(Self { program, timeout })
    }
}

#[async_trait]
impl Toolchain for PlatformIo {
    async fn run(&self, workdir: &Path, env: &str, jobs: usize) -> Result<RunOutput> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(["run", "-e", env, "-j", &jobs.to_string()])
            .current_dir(workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| Error::Timeout(format!("toolchain run for env {env}")))?
            .map_err(|e| Error::Toolchain(format!("failed to spawn toolchain: {e}")))?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(RunOutput {
            success: output.status.success(),
            log,
        })
    }
}
