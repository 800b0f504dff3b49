//! Interactive remote shell sessions on the cluster master.
//!
//! A [`ScopedSession`] owns one remote shell process. Commands written to it
//! are executed in write order. The shell is released exactly once: by
//! [`ScopedSession::close`] on the normal path, or when the session is dropped
//! on any early exit.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use crate::deploy::cluster::RemoteAddress;
use crate::errors::SessionError;

/// Line sent to the remote shell when the session closes
pub const EXIT_COMMAND: &[u8] = b"exit\n";

/// Exit status `ssh` reserves for its own failures (connect, auth)
pub const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Captured output of one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTranscript {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,

    /// Exit status of the shell process, `None` when killed by a signal
    pub exit_code: Option<i32>,
}

impl SessionTranscript {
    /// The transport never came up; nothing written was executed
    pub fn transport_failed(&self) -> bool {
        self.exit_code == Some(SSH_TRANSPORT_FAILURE)
    }
}

/// An open remote shell process
#[async_trait]
pub trait RemoteShell: Send {
    /// Write raw bytes to the shell's input stream
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Send the trailer, close input and wait for the process to exit
    async fn finish(&mut self, trailer: &[u8]) -> std::io::Result<SessionTranscript>;

    /// Terminate the process if it is still running. Must not block.
    fn release(&mut self);
}

/// Session collaborator trait for testability
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(&self, address: &RemoteAddress) -> std::io::Result<Box<dyn RemoteShell>>;
}

/// Opens sessions with the `ssh` binary
#[derive(Debug, Clone)]
pub struct SshConnector {
    program: PathBuf,
    port: u16,
    identity_file: Option<PathBuf>,
}

impl SshConnector {
    pub fn new(port: u16, identity_file: Option<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("ssh"),
            port,
            identity_file,
        }
    }

    /// Use another `ssh`-compatible binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, address: &RemoteAddress) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(address.to_string());
        args
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    async fn open(&self, address: &RemoteAddress) -> std::io::Result<Box<dyn RemoteShell>> {
        let mut child = Command::new(&self.program)
            .args(self.args(address))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "ssh stdin unavailable")
        })?;

        Ok(Box::new(SshShell {
            child: Some(child),
            stdin: Some(stdin),
        }))
    }
}

/// Remote shell backed by a local `ssh` child process
struct SshShell {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "ssh stdin closed")
        })?;
        stdin.write_all(bytes).await?;
        stdin.flush().await
    }

    async fn finish(&mut self, trailer: &[u8]) -> std::io::Result<SessionTranscript> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.write_all(trailer).await?;
            stdin.flush().await?;
            // EOF on stdin
            drop(stdin);
        }

        let child = self.child.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "ssh already finished")
        })?;

        let output = child.wait_with_output().await?;
        debug!("Remote shell exited with {}", output.status);

        Ok(SessionTranscript {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
        })
    }

    fn release(&mut self) {
        self.stdin.take();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("Remote shell already gone: {}", e);
            }
        }
    }
}

/// A remote shell released on every exit path
pub struct ScopedSession {
    address: RemoteAddress,
    shell: Option<Box<dyn RemoteShell>>,
}

impl ScopedSession {
    /// Open a session. Failure to start the transport is fatal to the caller.
    pub async fn open(
        connector: &dyn SessionConnector,
        address: &RemoteAddress,
    ) -> Result<Self, SessionError> {
        info!("Opening remote shell on {}", address);
        let shell = connector
            .open(address)
            .await
            .map_err(|source| SessionError::Open {
                address: address.clone(),
                source,
            })?;

        Ok(Self {
            address: address.clone(),
            shell: Some(shell),
        })
    }

    /// Queue one command line; a trailing newline is added when missing
    pub async fn write_command(&mut self, command: &str) -> Result<(), SessionError> {
        let shell = self
            .shell
            .as_mut()
            .ok_or_else(|| SessionError::Closed(self.address.clone()))?;

        let mut line = command.as_bytes().to_vec();
        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }

        debug!("Remote command: {}", command.trim_end());
        shell
            .write(&line)
            .await
            .map_err(|source| SessionError::Write {
                address: self.address.clone(),
                source,
            })
    }

    /// Send `exit`, wait for the shell to terminate and return its output.
    ///
    /// Without a timeout this blocks for as long as the remote shell runs.
    pub async fn close(
        mut self,
        timeout: Option<Duration>,
    ) -> Result<SessionTranscript, SessionError> {
        let mut shell = self
            .shell
            .take()
            .ok_or_else(|| SessionError::Closed(self.address.clone()))?;

        let result = match timeout {
            None => shell.finish(EXIT_COMMAND).await.map_err(|source| SessionError::Close {
                address: self.address.clone(),
                source,
            }),
            Some(limit) => match tokio::time::timeout(limit, shell.finish(EXIT_COMMAND)).await {
                Ok(finished) => finished.map_err(|source| SessionError::Close {
                    address: self.address.clone(),
                    source,
                }),
                Err(_) => {
                    warn!("Remote shell on {} still running after {:?}", self.address, limit);
                    Err(SessionError::CloseTimedOut {
                        address: self.address.clone(),
                        secs: limit.as_secs(),
                    })
                }
            },
        };

        shell.release();

        // Remote command statuses are left to the transcript; only a shell
        // that never came up is an error.
        match result {
            Ok(transcript) if transcript.transport_failed() => {
                let reason = String::from_utf8_lossy(&transcript.stderr).trim().to_string();
                warn!("Remote shell on {} was never established: {}", self.address, reason);
                Err(SessionError::Open {
                    address: self.address.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotConnected, reason),
                })
            }
            other => other,
        }
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if let Some(mut shell) = self.shell.take() {
            warn!("Releasing unclosed remote shell on {}", self.address);
            shell.release();
        }
    }
}
