//! sysfs PCI operations
//!
//! Writes to device files can block for as long as the device is in use, so
//! each one runs on the blocking pool under a timeout.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::HostError;
use crate::paths::HostPaths;
use crate::pci;

/// Ceiling for a single sysfs write
pub const SYSFS_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Driver whose VF count lives in `max_vfs` instead of `sriov_numvfs`
pub const IGB_UIO: &str = "igb_uio";

/// Write `value` to `path`, failing with `DeviceBusy` after `timeout`
pub async fn write_with_timeout(path: &Path, value: &str, timeout: Duration) -> Result<(), HostError> {
    let target: PathBuf = path.to_path_buf();
    let data = value.to_string();
    let write = tokio::task::spawn_blocking(move || fs::write(&target, data));

    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(HostError::io(path, e)),
        Ok(Err(join)) => Err(HostError::io(path, io::Error::other(join))),
        Err(_) => Err(HostError::DeviceBusy {
            path: path.to_path_buf(),
        }),
    }
}

pub async fn write_sysfs(path: &Path, value: &str) -> Result<(), HostError> {
    debug!(path = %path.display(), value, "sysfs write");
    write_with_timeout(path, value, SYSFS_WRITE_TIMEOUT).await
}

/// PCI device operations under `/sys/bus/pci`
#[derive(Debug, Clone)]
pub struct Sysfs {
    paths: HostPaths,
}

impl Sysfs {
    pub fn new(paths: HostPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    pub fn exists(&self, pci: &str) -> bool {
        self.paths.pci_device(pci).exists()
    }

    /// Currently bound driver, empty when unbound
    pub fn driver(&self, pci: &str) -> String {
        pci::bound_driver(&self.paths.pci_device(pci))
    }

    pub fn virtual_functions(&self, pci: &str) -> Result<Vec<String>, HostError> {
        pci::virtual_function_addresses(&self.paths.pci_device(pci))
    }

    /// Unbind from the current driver; no-op when unbound
    pub async fn unbind(&self, pci: &str) -> Result<(), HostError> {
        let driver = self.driver(pci);
        if driver.is_empty() {
            return Ok(());
        }
        write_sysfs(&self.paths.pci_driver(&driver).join("unbind"), pci).await
    }

    /// Bind to `driver` through `driver_override`
    pub async fn bind(&self, pci: &str, driver: &str) -> Result<(), HostError> {
        write_sysfs(&self.paths.pci_device(pci).join("driver_override"), driver).await?;
        write_sysfs(&self.paths.pci_driver(driver).join("bind"), pci).await
    }

    fn num_vfs_file(&self, pci: &str) -> PathBuf {
        let file = if self.driver(pci) == IGB_UIO {
            "max_vfs"
        } else {
            "sriov_numvfs"
        };
        self.paths.pci_device(pci).join(file)
    }

    pub async fn set_num_vfs(&self, pci: &str, count: u32) -> Result<(), HostError> {
        write_sysfs(&self.num_vfs_file(pci), &count.to_string()).await
    }

    /// Function-level reset
    pub async fn reset(&self, pci: &str) -> Result<(), HostError> {
        write_sysfs(&self.paths.pci_device(pci).join("reset"), "1").await
    }
}
