//! Error types for the deployer

use std::path::PathBuf;

use thiserror::Error;

use crate::deploy::cluster::RemoteAddress;

/// Exit code used when the transport to the cluster master is broken
pub const EXIT_TRANSPORT_FAILURE: u8 = 1;

/// Exit code used for every other deployment failure
pub const EXIT_DEPLOY_FAILURE: u8 = 2;

/// Template rendering errors
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Missing substitution value: {0}")]
    MissingKey(&'static str),

    #[error("Unsupported placeholder '{{{name}}}' on line {line}")]
    UnknownPlaceholder { name: String, line: usize },

    #[error("Unbalanced '{brace}' on line {line}, column {column}")]
    UnbalancedBrace { brace: char, line: usize, column: usize },

    #[error("Unable to read template {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// File transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Local file {path:?} is not readable: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid remote address '{0}': expected user@host")]
    InvalidAddress(String),

    #[error("Unable to run the copy command for {destination}: {source}")]
    Spawn {
        destination: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Copy of {local:?} to {destination} failed with {}", exit_description(.code))]
    Copy {
        local: PathBuf,
        destination: String,
        address: RemoteAddress,
        code: Option<i32>,
        stderr: String,
        location: String,
    },
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// Interactive session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Unable to open a remote shell on {address}: {source}")]
    Open {
        address: RemoteAddress,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to write to the remote shell on {address}: {source}")]
    Write {
        address: RemoteAddress,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote shell on {address} did not terminate cleanly: {source}")]
    Close {
        address: RemoteAddress,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote shell on {address} did not terminate within {secs}s")]
    CloseTimedOut { address: RemoteAddress, secs: u64 },

    #[error("Session on {0} is already closed")]
    Closed(RemoteAddress),
}

/// Main error type for a deployment run
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Launch error: {0}")]
    LaunchError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Broken transport to the cluster master. Nothing after it can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeployError::Transfer(_) | DeployError::Session(_))
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        if self.is_fatal() {
            EXIT_TRANSPORT_FAILURE
        } else {
            EXIT_DEPLOY_FAILURE
        }
    }

    /// Operator hint for failed copies, naming the command to test by hand
    pub fn remediation(&self) -> Option<String> {
        match self {
            DeployError::Transfer(TransferError::Copy { address, .. }) => {
                Some(remediation_for(address))
            }
            _ => None,
        }
    }

    /// Full failure trace: the error, its source chain and, for failed
    /// copies, the call site and the copy command's stderr.
    pub fn trace(&self) -> String {
        let mut lines = vec![format!("Error: {}", self)];

        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            lines.push(format!("Caused by: {}", cause));
            source = cause.source();
        }

        if let DeployError::Transfer(TransferError::Copy {
            location, stderr, ..
        }) = self
        {
            lines.push(format!("  at {}", location));
            for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
                lines.push(format!("  scp: {}", line));
            }
        }

        lines.join("\n")
    }
}

/// The three-line hint printed after a failed copy
pub fn remediation_for(address: &RemoteAddress) -> String {
    format!(
        "Make sure you can ssh into the cluster master without prompts.\n\
         Please run the following command to try it:\n\
         ssh {}",
        address
    )
}
