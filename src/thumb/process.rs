//! External tools.
//!
//! Tools are looked up on `PATH` once, when the registry is built; a missing
//! tool disables the Thumber that needs it instead of failing every request.
//! Each run gets a wall-clock budget. A tool that overruns is killed and
//! reported as [`ThumbError::Timeout`].

use super::ThumbError;
use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// An executable resolved to an absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    name: String,
    path: PathBuf,
}

impl Tool {
    /// Find `name` on `PATH`.
    pub fn locate(name: &str) -> Option<Self> {
        match which::which(name) {
            Ok(path) => {
                debug!(tool = name, path = %path.display(), "found external tool");
                Some(Self::at(name, path))
            }
            Err(err) => {
                debug!(tool = name, error = %err, "external tool not found");
                None
            }
        }
    }

    pub fn at(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the tool to completion and return its standard output.
    ///
    /// A non-zero exit is an error carrying the tool's standard error.
    pub fn run<I, S>(&self, args: I, timeout: Duration) -> Result<Vec<u8>, ThumbError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait_with_timeout(&mut child, timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(tool = %self.name, ?timeout, "killing external tool after timeout");
                if let Err(err) = child.kill() {
                    warn!(tool = %self.name, error = %err, "failed to kill external tool");
                }
                // Reap the child so it does not linger as a zombie.
                child.wait()?;
                return Err(ThumbError::Timeout {
                    tool: self.name.clone(),
                    timeout,
                });
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err.into());
            }
        };

        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;
        if !status.success() {
            return Err(ThumbError::ToolFailed {
                tool: self.name.clone(),
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Read a pipe to the end on its own thread so a chatty tool never blocks
/// on a full pipe while we wait for it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<io::Result<Vec<u8>>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn collect(handle: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Result<Vec<u8>, ThumbError> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| ThumbError::Generation("pipe reader panicked".into()))?
            .map_err(ThumbError::Io),
        None => Ok(Vec::new()),
    }
}
