//! Daemon-specific error types.

use crds::CrdError;
use kube::Error as KubeError;
use pf_bb_config::BbDevError;
use sriov_host::HostError;
use thiserror::Error;

/// Errors that can occur in the node daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Node access failed (sysfs, commands, inventory)
    #[error(transparent)]
    Host(#[from] HostError),

    /// pf_bb_config setup failed
    #[error(transparent)]
    BbDev(#[from] BbDevError),

    /// Malformed bbDevConfig
    #[error(transparent)]
    Crd(#[from] CrdError),

    /// Spec does not fit the node's environment or hardware
    #[error("{0}")]
    Validation(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Leader lease could not be acquired or was lost
    #[error("Lease error: {0}")]
    Lease(String),

    /// Cordon, drain or uncordon failed
    #[error("Drain failed: {0}")]
    Drain(String),

    /// Probe server failed
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    /// Reconcile loop exited unexpectedly
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Shutdown requested while waiting
    #[error("cancelled")]
    Cancelled,
}
