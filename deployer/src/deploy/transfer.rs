//! File transfer to the cluster master

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::deploy::cluster::RemoteAddress;
use crate::errors::TransferError;

/// Outcome of one copy command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyStatus {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stderr: String,
}

impl CopyStatus {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Copy collaborator trait for testability
#[async_trait]
pub trait FileCopier: Send + Sync {
    /// Copy `local` to `destination` (`<address>:./<name>`)
    async fn copy(&self, local: &Path, destination: &str) -> std::io::Result<CopyStatus>;
}

/// Copies files with the `scp` binary
#[derive(Debug, Clone)]
pub struct ScpCopier {
    port: u16,
    identity_file: Option<PathBuf>,
}

impl ScpCopier {
    pub fn new(port: u16, identity_file: Option<PathBuf>) -> Self {
        Self {
            port,
            identity_file,
        }
    }

    fn args(&self, local: &Path, destination: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-P".to_string(),
            self.port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(local.display().to_string());
        args.push(destination.to_string());
        args
    }
}

#[async_trait]
impl FileCopier for ScpCopier {
    async fn copy(&self, local: &Path, destination: &str) -> std::io::Result<CopyStatus> {
        let output = Command::new("scp")
            .args(self.args(local, destination))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(CopyStatus {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Build the copy destination. An empty name keeps the source basename.
pub fn destination(address: &RemoteAddress, remote_name: &str) -> String {
    format!("{}:./{}", address, remote_name)
}

/// Transfer channel to the cluster master
#[derive(Clone)]
pub struct TransferChannel {
    copier: Arc<dyn FileCopier>,
}

impl TransferChannel {
    pub fn new(copier: Arc<dyn FileCopier>) -> Self {
        Self { copier }
    }

    /// Copy a local file into the remote login directory.
    ///
    /// Any failure is returned as a [`TransferError`]; the caller is expected
    /// to stop the deployment, there is no retry.
    pub async fn transfer(
        &self,
        local: &Path,
        remote_name: &str,
        address: &RemoteAddress,
    ) -> Result<(), TransferError> {
        address.validate()?;

        // Readable, not just present
        tokio::fs::File::open(local)
            .await
            .map_err(|source| TransferError::Source {
                path: local.to_path_buf(),
                source,
            })?;

        let destination = destination(address, remote_name);
        debug!("Copying {:?} to {}", local, destination);

        let status = self
            .copier
            .copy(local, &destination)
            .await
            .map_err(|source| TransferError::Spawn {
                destination: destination.clone(),
                source,
            })?;

        if !status.is_success() {
            error!("Copy of {:?} to {} failed: {:?}", local, destination, status.code);
            return Err(TransferError::Copy {
                local: local.to_path_buf(),
                destination,
                address: address.clone(),
                code: status.code,
                stderr: status.stderr,
                location: crate::trace!(),
            });
        }

        info!("Copied {:?} to {}", local, destination);
        Ok(())
    }
}
