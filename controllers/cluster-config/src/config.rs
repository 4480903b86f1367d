//! Operator configuration from environment variables.

use crate::error::ControllerError;
use std::path::PathBuf;

const DEFAULT_WEBHOOK_PORT: u16 = 9443;
const DEFAULT_WEBHOOK_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";
const DEFAULT_PROBE_PORT: u16 = 8081;

/// Operator settings read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace holding cluster and node configs
    pub namespace: String,
    /// Serve the admission webhook
    pub enable_webhooks: bool,
    /// HTTPS port of the admission webhook
    pub webhook_port: u16,
    /// Directory holding `tls.crt` and `tls.key`
    pub webhook_cert_dir: PathBuf,
    /// Port for `/healthz` and `/readyz`
    pub probe_port: u16,
    /// Plain Kubernetes rather than OpenShift
    pub generic_k8s: bool,
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ControllerError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ControllerError::InvalidConfig(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_port(name: &str, value: &str) -> Result<u16, ControllerError> {
    value.trim().parse().map_err(|_| {
        ControllerError::InvalidConfig(format!("{name} must be a port number, got '{value}'"))
    })
}

impl Config {
    /// Read the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, so tests need not touch the environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let namespace = lookup("SRIOV_FEC_NAMESPACE")
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(
                    "SRIOV_FEC_NAMESPACE environment variable is required".to_string(),
                )
            })?;

        Ok(Self {
            namespace,
            enable_webhooks: lookup("ENABLE_WEBHOOKS")
                .map(|v| parse_bool("ENABLE_WEBHOOKS", &v))
                .transpose()?
                .unwrap_or(true),
            webhook_port: lookup("WEBHOOK_PORT")
                .map(|v| parse_port("WEBHOOK_PORT", &v))
                .transpose()?
                .unwrap_or(DEFAULT_WEBHOOK_PORT),
            webhook_cert_dir: lookup("WEBHOOK_CERT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WEBHOOK_CERT_DIR)),
            probe_port: lookup("PROBE_PORT")
                .map(|v| parse_port("PROBE_PORT", &v))
                .transpose()?
                .unwrap_or(DEFAULT_PROBE_PORT),
            generic_k8s: lookup("SRIOV_FEC_GENERIC_K8S")
                .map(|v| parse_bool("SRIOV_FEC_GENERIC_K8S", &v))
                .transpose()?
                .unwrap_or(false),
        })
    }
}
