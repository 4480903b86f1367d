//! Host access errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when reading or changing node state
#[derive(Debug, Error)]
pub enum HostError {
    /// Filesystem read/write failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A sysfs write did not return in time
    #[error("write to {path} timed out, device is probably busy")]
    DeviceBusy { path: PathBuf },

    /// External command exited with a failure status
    #[error("command `{command}` failed with exit code {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    /// External command could not be started
    #[error("failed to execute `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The PCI device list is empty
    #[error("no PCI devices found under {0}")]
    NoPciDevices(PathBuf),

    /// Accelerator discovery config could not be loaded
    #[error("invalid accelerator discovery config {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Requested device is not present
    #[error("PCI device {0} not found")]
    DeviceNotFound(String),
}

impl HostError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HostError::Io {
            path: path.into(),
            source,
        }
    }
}
