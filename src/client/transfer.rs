//! Transfer: relay a local artifact to the remote store, then delete it.

use crate::client::process::run_tool;
use crate::models::{RelayError, Result, TransferConfig};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

/// Invocation contract of the external sync mechanism.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Copy `path` to `destination`. Must not touch the local file.
    async fn sync(&self, path: &Path, destination: &str) -> Result<()>;
}

/// rsync over a non-interactive ssh shell.
pub struct Rsync {
    program: String,
    bwlimit_kbps: u32,
    ssh_key: Option<std::path::PathBuf>,
    extra_args: Vec<String>,
}

impl Rsync {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            program: config.program.clone(),
            bwlimit_kbps: config.bwlimit_kbps,
            ssh_key: config.ssh_key.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    fn remote_shell(&self) -> String {
        let mut shell = String::from("ssh");
        if let Some(key) = &self.ssh_key {
            shell.push_str(&format!(" -i {}", key.display()));
        }
        shell.push_str(" -T -o Compression=no -o StrictHostKeyChecking=no");
        shell
    }

    fn args(&self, path: &Path, destination: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-avP".into(),
            "--partial".into(),
            "--info=progress2".into(),
            format!("--bwlimit={}", self.bwlimit_kbps).into(),
            "-e".into(),
            self.remote_shell().into(),
        ];
        args.extend(self.extra_args.iter().map(OsString::from));
        args.push(path.as_os_str().to_os_string());
        args.push(destination.into());
        args
    }
}

#[async_trait]
impl Transport for Rsync {
    async fn sync(&self, path: &Path, destination: &str) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(path, destination));

        let output = run_tool(&self.program, &mut cmd).await?;
        if output.success() {
            Ok(())
        } else {
            Err(RelayError::Relay {
                path: path.to_path_buf(),
                cause: output.describe_failure(),
            })
        }
    }
}

/// Relays artifacts to a fixed destination and removes the local copy.
pub struct TransferSink {
    transport: Arc<dyn Transport>,
    destination: String,
}

impl TransferSink {
    pub fn new(transport: Arc<dyn Transport>, destination: impl Into<String>) -> Self {
        Self {
            transport,
            destination: destination.into(),
        }
    }

    /// Relay `path`, deleting it only after the transfer succeeded.
    ///
    /// On failure the local artifact stays in place for a later pass.
    pub async fn relay(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), destination = %self.destination, "Relaying");

        if let Err(e) = self.transport.sync(path, &self.destination).await {
            warn!(path = %path.display(), error = %e, "Relay failed, keeping local artifact");
            return Err(match e {
                RelayError::Relay { .. } => e,
                other => RelayError::Relay {
                    path: path.to_path_buf(),
                    cause: other.to_string(),
                },
            });
        }

        remove_if_present(path).await?;
        info!(path = %path.display(), "Relayed, deleted local artifact");
        Ok(())
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

/// Delete `path`; a file that is already gone is not an error.
async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RelayError::io(
            format!("deleting relayed artifact {}", path.display()),
            e,
        )),
    }
}
