use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::contract::{CommandError, CommandOutput, GitClient};

/// [`GitClient`] backed by the `git` executable.
///
/// Arguments are always passed discretely, with `--` ahead of the URL so a
/// value starting with `-` can never be read as an option.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(
        &self,
        args: &[&OsStr],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let program = self.binary.display().to_string();
        let mut child = Command::new(&self.binary)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                error!(error = ?source, program = %program, "Failed to launch git process");
                CommandError::Spawn {
                    program: program.clone(),
                    source,
                }
            })?;

        // drained concurrently so a chatty child never blocks on a full pipe
        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let stopped = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => {
                    let captured = CommandOutput {
                        code: status.code(),
                        stdout: String::from_utf8_lossy(&stdout.await.unwrap_or_default()).into_owned(),
                        stderr: String::from_utf8_lossy(&stderr.await.unwrap_or_default()).trim().to_string(),
                    };
                    debug!(program = %program, code = ?captured.code, "git process finished");
                    return Ok(captured);
                }
                Err(source) => return Err(CommandError::Spawn { program, source }),
            },
            _ = tokio::time::sleep(timeout) => {
                error!(program = %program, timeout_secs = timeout.as_secs(), "git process timed out");
                CommandError::Timeout {
                    program: program.clone(),
                    after: timeout,
                }
            }
            _ = cancel.cancelled() => {
                warn!(program = %program, "git process cancelled");
                CommandError::Cancelled {
                    program: program.clone(),
                }
            }
        };

        // the caller removes the destination next; the child must be gone first
        if let Err(e) = child.start_kill() {
            debug!(error = ?e, program = %program, "git process already exited");
        }
        match child.wait().await {
            Ok(status) => debug!(program = %program, ?status, "Reaped stopped git process"),
            Err(e) => error!(error = ?e, program = %program, "Failed to reap git process"),
        }
        stdout.abort();
        stderr.abort();
        Err(stopped)
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut captured = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut captured).await {
            debug!(error = ?e, "Reading git output failed");
        }
    }
    captured
}

#[async_trait]
impl GitClient for GitCli {
    async fn list_refs(&self, url: &str, timeout: Duration) -> Result<CommandOutput, CommandError> {
        info!(repo_url = url, "Probing remote with git ls-remote");
        // nothing is written locally, so ls-remote is bounded by its timeout alone
        self.run(
            &[OsStr::new("ls-remote"), OsStr::new("--"), OsStr::new(url)],
            timeout,
            &CancellationToken::new(),
        )
        .await
    }

    async fn shallow_clone(
        &self,
        url: &str,
        dest: &Path,
        depth: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        info!(repo_url = url, path = %dest.display(), depth, "Shallow cloning repository");
        let depth = depth.max(1).to_string();
        self.run(
            &[
                OsStr::new("clone"),
                OsStr::new("--depth"),
                OsStr::new(&depth),
                OsStr::new("--quiet"),
                OsStr::new("--"),
                OsStr::new(url),
                dest.as_os_str(),
            ],
            timeout,
            cancel,
        )
        .await
    }
}
