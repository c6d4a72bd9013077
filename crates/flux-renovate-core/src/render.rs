//! External manifest rendering
//!
//! Overlays only make sense after they are merged with their bases, so in
//! rendered mode every Kustomization root is built by an external tool and
//! its combined YAML stream is read instead of the files on disk.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{CoreError, Result};

/// Default renderer executable
pub const DEFAULT_KUSTOMIZE_BIN: &str = "kustomize";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Produces a multi-document YAML stream for a Kustomization root
pub trait ManifestRenderer {
    fn render(&self, kustomization_dir: &Path) -> Result<String>;
}

impl<F> ManifestRenderer for F
where
    F: Fn(&Path) -> Result<String>,
{
    fn render(&self, kustomization_dir: &Path) -> Result<String> {
        self(kustomization_dir)
    }
}

/// Runs `<program> build <dir>`
#[derive(Debug, Clone)]
pub struct KustomizeRenderer {
    program: String,
    timeout: Option<Duration>,
}

impl Default for KustomizeRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_KUSTOMIZE_BIN)
    }
}

impl KustomizeRenderer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Kill the renderer if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl ManifestRenderer for KustomizeRenderer {
    fn render(&self, kustomization_dir: &Path) -> Result<String> {
        debug!(
            program = %self.program,
            root = %kustomization_dir.display(),
            "Running kustomize build"
        );

        let mut child = Command::new(&self.program)
            .arg("build")
            .arg(kustomization_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CoreError::RenderSpawn {
                program: self.program.clone(),
                source,
            })?;

        // Drain both pipes while waiting so a chatty child never blocks
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match self.timeout {
            Some(timeout) => wait_with_timeout(&mut child, timeout)?,
            None => Some(child.wait()?),
        };

        let stdout = join(stdout)?;
        let stderr = join(stderr)?;

        let Some(status) = status else {
            return Err(CoreError::RenderTimeout {
                root: kustomization_dir.to_path_buf(),
                seconds: self.timeout.map_or(0, |t| t.as_secs()),
            });
        };

        if !status.success() {
            return Err(CoreError::Render {
                root: kustomization_dir.to_path_buf(),
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        String::from_utf8(stdout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join(handle: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>> {
    let output = handle
        .join()
        .map_err(|_| std::io::Error::other("pipe reader thread panicked"))??;
    Ok(output)
}

/// Wait for `child`, killing it once `timeout` has elapsed
///
/// Returns `None` when the child had to be killed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let started = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        if started.elapsed() >= timeout {
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }

        thread::sleep(POLL_INTERVAL);
    }
}
