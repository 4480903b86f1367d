//! Daemon configuration from environment variables.

use crds::Family;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DaemonError;

/// Shared VFIO token used when none is configured
pub const DEFAULT_VFIO_TOKEN: &str = "02bddbbf-bbb0-4d79-886b-91bad3fbb510";

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(137);
const DEFAULT_METRIC_GATHER_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_RESYNC: Duration = Duration::from_secs(300);
const DEFAULT_PROBE_PORT: u16 = 8081;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub node_name: String,
    pub namespace: String,
    pub drain_timeout: Duration,
    pub lease_duration: Duration,
    pub metric_gather_interval: Duration,
    pub vfio_token: String,
    pub generic_k8s: bool,
    pub resync: Duration,
    /// Prefix for `/sys` and `/proc`
    pub host_root: PathBuf,
    pub families: Vec<Family>,
    pub probe_port: u16,
}

fn invalid(name: &str, value: &str, expected: &str) -> DaemonError {
    DaemonError::InvalidConfig(format!("{name} must be {expected}, got '{value}'"))
}

fn parse_seconds(name: &str, value: &str) -> Result<Duration, DaemonError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| invalid(name, value, "a number of seconds"))
}

/// Parse a humantime duration (`15s`, `1m 30s`) or a bare number of seconds
pub fn parse_duration(name: &str, value: &str) -> Result<Duration, DaemonError> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value).map_err(|e| invalid(name, value, &format!("a duration such as 15s ({e})")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, DaemonError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(invalid(name, value, "a boolean")),
    }
}

fn parse_families(value: &str) -> Result<Vec<Family>, DaemonError> {
    let mut families = Vec::new();
    for part in value.split(',').filter(|p| !p.trim().is_empty()) {
        let family: Family = part
            .parse()
            .map_err(|e| DaemonError::InvalidConfig(format!("SRIOV_FEC_FAMILIES: {e}")))?;
        if !families.contains(&family) {
            families.push(family);
        }
    }
    if families.is_empty() {
        return Err(invalid("SRIOV_FEC_FAMILIES", value, "a list of fec, vrb"));
    }
    Ok(families)
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, DaemonError> {
    lookup(name).filter(|v| !v.is_empty()).ok_or_else(|| {
        DaemonError::InvalidConfig(format!("{name} environment variable is required"))
    })
}

impl Config {
    pub fn from_env() -> Result<Self, DaemonError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DaemonError> {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            node_name: required(&lookup, "NODENAME")?,
            namespace: required(&lookup, "SRIOV_FEC_NAMESPACE")?,
            drain_timeout: optional("DRAIN_TIMEOUT_SECONDS")
                .map(|v| parse_seconds("DRAIN_TIMEOUT_SECONDS", &v))
                .transpose()?
                .unwrap_or(DEFAULT_DRAIN_TIMEOUT),
            lease_duration: optional("LEASE_DURATION_SECONDS")
                .map(|v| parse_seconds("LEASE_DURATION_SECONDS", &v))
                .transpose()?
                .unwrap_or(DEFAULT_LEASE_DURATION),
            metric_gather_interval: optional("SRIOV_FEC_METRIC_GATHER_INTERVAL")
                .map(|v| parse_duration("SRIOV_FEC_METRIC_GATHER_INTERVAL", &v))
                .transpose()?
                .unwrap_or(DEFAULT_METRIC_GATHER_INTERVAL),
            vfio_token: optional("SRIOV_FEC_VFIO_TOKEN")
                .unwrap_or_else(|| DEFAULT_VFIO_TOKEN.to_string()),
            generic_k8s: optional("SRIOV_FEC_GENERIC_K8S")
                .map(|v| parse_bool("SRIOV_FEC_GENERIC_K8S", &v))
                .transpose()?
                .unwrap_or(false),
            resync: optional("SRIOV_FEC_RESYNC_SECONDS")
                .map(|v| parse_seconds("SRIOV_FEC_RESYNC_SECONDS", &v))
                .transpose()?
                .unwrap_or(DEFAULT_RESYNC),
            host_root: optional("SRIOV_FEC_HOST_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/")),
            families: optional("SRIOV_FEC_FAMILIES")
                .map(|v| parse_families(&v))
                .transpose()?
                .unwrap_or_else(|| vec![Family::Fec, Family::Vrb]),
            probe_port: optional("PROBE_PORT")
                .map(|v| {
                    v.trim()
                        .parse()
                        .map_err(|_| invalid("PROBE_PORT", &v, "a port number"))
                })
                .transpose()?
                .unwrap_or(DEFAULT_PROBE_PORT),
        })
    }

    /// Prefer the token file mounted into the daemon over the environment
    pub fn with_vfio_token_file(mut self, path: &Path) -> Self {
        if let Ok(token) = std::fs::read_to_string(path) {
            let token = token.trim();
            if !token.is_empty() {
                self.vfio_token = token.to_string();
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [("NODENAME", "worker-1"), ("SRIOV_FEC_NAMESPACE", "vran")];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.node_name, "worker-1");
        assert_eq!(config.drain_timeout, Duration::from_secs(90));
        assert_eq!(config.lease_duration, Duration::from_secs(137));
        assert_eq!(config.metric_gather_interval, Duration::from_secs(15));
        assert_eq!(config.vfio_token, DEFAULT_VFIO_TOKEN);
        assert_eq!(config.resync, Duration::from_secs(300));
        assert_eq!(config.host_root, PathBuf::from("/"));
        assert_eq!(config.families, vec![Family::Fec, Family::Vrb]);
        assert_eq!(config.probe_port, 8081);
    }

    #[test]
    fn test_required_variables() {
        assert!(Config::from_lookup(lookup(&[("NODENAME", "worker-1")])).is_err());
        assert!(Config::from_lookup(lookup(&[("SRIOV_FEC_NAMESPACE", "vran")])).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("DRAIN_TIMEOUT_SECONDS", "30"),
            ("SRIOV_FEC_METRIC_GATHER_INTERVAL", "1m"),
            ("SRIOV_FEC_FAMILIES", "vrb"),
            ("SRIOV_FEC_GENERIC_K8S", "true"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
        assert_eq!(config.metric_gather_interval, Duration::from_secs(60));
        assert_eq!(config.families, vec![Family::Vrb]);
        assert!(config.generic_k8s);

        let mut vars = REQUIRED.to_vec();
        vars.push(("SRIOV_FEC_FAMILIES", "fec,acc"));
        assert!(Config::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("x", "15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("x", "250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("x", "20").unwrap(), Duration::from_secs(20));
        assert!(parse_duration("x", "fast").is_err());
        assert_eq!(parse_duration("x", "1m 30s").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("x", "15 parsecs").is_err());
    }

    #[test]
    fn test_vfio_token_file_overrides_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vfiotoken");
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        let unchanged = config.clone().with_vfio_token_file(&path);
        assert_eq!(unchanged.vfio_token, DEFAULT_VFIO_TOKEN);

        std::fs::write(&path, "9a1c6f55-3f5b-4a8e-9d59-0a9d4a1e2b7c\n").unwrap();
        let overridden = config.with_vfio_token_file(&path);
        assert_eq!(overridden.vfio_token, "9a1c6f55-3f5b-4a8e-9d59-0a9d4a1e2b7c");
    }
}
