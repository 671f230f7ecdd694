//! Remote command execution and file transfer over ssh/scp.
//!
//! All operations are synchronous and blocking. Nothing here retries; a
//! failure is returned to the caller, which decides what to abort.

use crate::registry::HostDescriptor;
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Output};
use tracing::debug;

/// Stderr marker ssh prints when the remote host key does not match.
const HOST_KEY_VERIFICATION_FAILED: &str = "Host key verification failed";

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error(
        "Host key verification failed for {host} (add/verify host key in ~/.ssh/known_hosts first)"
    )]
    HostKeyVerification { host: String },
    #[error("Command on {host} failed ({status}): {stderr}")]
    ExecFailed {
        host: String,
        status: String,
        stderr: String,
    },
    #[error("Transfer {from} -> {to} failed ({status}): {stderr}")]
    TransferFailed {
        from: String,
        to: String,
        status: String,
        stderr: String,
    },
}

/// One side of a file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Local(PathBuf),
    /// A path relative to the remote shell's working directory.
    Remote { host: HostDescriptor, path: String },
}

impl Endpoint {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Endpoint::Local(path.into())
    }

    pub fn remote(host: &HostDescriptor, path: impl Into<String>) -> Self {
        Endpoint::Remote {
            host: host.clone(),
            path: path.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local(path) => write!(f, "{}", path.display()),
            Endpoint::Remote { host, path } => write!(f, "{host}:{path}"),
        }
    }
}

/// The remote shell + copy capability every site operation runs through.
pub trait RemoteExecutor {
    /// Runs `command` on `host` and returns its standard output.
    ///
    /// A non-zero exit status or a connection fault is an error.
    fn exec(&self, host: &HostDescriptor, command: &str) -> Result<String, RemoteError>;

    /// Copies a file between two endpoints, overwriting the destination.
    fn transfer(&self, from: &Endpoint, to: &Endpoint) -> Result<(), RemoteError>;
}

impl<T: RemoteExecutor + ?Sized> RemoteExecutor for &T {
    fn exec(&self, host: &HostDescriptor, command: &str) -> Result<String, RemoteError> {
        (**self).exec(host, command)
    }

    fn transfer(&self, from: &Endpoint, to: &Endpoint) -> Result<(), RemoteError> {
        (**self).transfer(from, to)
    }
}

/// [`RemoteExecutor`] backed by the system `ssh` and `scp` binaries.
///
/// Authentication is expected to be provisioned out of band (for example
/// with pre-shared keys); `BatchMode` makes ssh fail instead of prompting.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    pub ssh_program: String,
    pub scp_program: String,
    pub connect_timeout_secs: u64,
}

impl SshExecutor {
    fn option_tokens(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ]
    }

    fn run(program: &str, command: &mut Command) -> Result<Output, RemoteError> {
        command.output().map_err(|source| RemoteError::Spawn {
            program: program.to_string(),
            source,
        })
    }
}

impl RemoteExecutor for SshExecutor {
    fn exec(&self, host: &HostDescriptor, command: &str) -> Result<String, RemoteError> {
        debug!("Running on {}: {}", host, command);

        let output = Self::run(
            &self.ssh_program,
            Command::new(&self.ssh_program)
                .args(self.option_tokens())
                .arg("--")
                .arg(host.as_str())
                .arg(command),
        )?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            if stderr.contains(HOST_KEY_VERIFICATION_FAILED) {
                return Err(RemoteError::HostKeyVerification {
                    host: host.to_string(),
                });
            }
            return Err(RemoteError::ExecFailed {
                host: host.to_string(),
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn transfer(&self, from: &Endpoint, to: &Endpoint) -> Result<(), RemoteError> {
        debug!("Copying {} -> {}", from, to);

        let output = Self::run(
            &self.scp_program,
            Command::new(&self.scp_program)
                .args(self.option_tokens())
                .arg("-q")
                .arg("--")
                .arg(from.to_string())
                .arg(to.to_string()),
        )?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains(HOST_KEY_VERIFICATION_FAILED) {
                let host = match (from, to) {
                    (Endpoint::Remote { host, .. }, _) | (_, Endpoint::Remote { host, .. }) => {
                        host.to_string()
                    }
                    _ => "localhost".to_string(),
                };
                return Err(RemoteError::HostKeyVerification { host });
            }
            return Err(RemoteError::TransferFailed {
                from: from.to_string(),
                to: to.to_string(),
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(())
    }
}
