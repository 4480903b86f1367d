//! Host filesystem locations
//!
//! Every path the daemon touches is derived from one `HostPaths` value so the
//! whole stack can run against a mounted host root or a test directory.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// sysfs mount (`/sys`)
    pub sys: PathBuf,
    /// procfs mount (`/proc`)
    pub proc: PathBuf,
    /// Directory holding pf_bb_config sockets (`/tmp`)
    pub tmp: PathBuf,
    /// Directory holding pf_bb_config logs (`/var/log`)
    pub log: PathBuf,
    /// Operator config mount (`/sriov_config`)
    pub config: PathBuf,
    /// Scratch space for generated INI files and FFT tables (`/sriov_workdir`)
    pub workdir: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            sys: PathBuf::from("/sys"),
            proc: PathBuf::from("/proc"),
            tmp: PathBuf::from("/tmp"),
            log: PathBuf::from("/var/log"),
            config: PathBuf::from("/sriov_config"),
            workdir: PathBuf::from("/sriov_workdir"),
        }
    }
}

impl HostPaths {
    /// Read sysfs and procfs from a mounted host root, everything else local
    pub fn with_host_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            sys: root.join("sys"),
            proc: root.join("proc"),
            ..Self::default()
        }
    }

    /// Place every location under `root`
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            sys: root.join("sys"),
            proc: root.join("proc"),
            tmp: root.join("tmp"),
            log: root.join("var/log"),
            config: root.join("sriov_config"),
            workdir: root.join("sriov_workdir"),
        }
    }

    pub fn pci_devices(&self) -> PathBuf {
        self.sys.join("bus/pci/devices")
    }

    pub fn pci_device(&self, pci: &str) -> PathBuf {
        self.pci_devices().join(pci)
    }

    pub fn pci_driver(&self, driver: &str) -> PathBuf {
        self.sys.join("bus/pci/drivers").join(driver)
    }

    /// `/sys/module/<module>/parameters/<param>`; dashes in driver names map to underscores
    pub fn module_parameter(&self, module: &str, param: &str) -> PathBuf {
        self.module(module).join("parameters").join(param)
    }

    pub fn module(&self, module: &str) -> PathBuf {
        self.sys.join("module").join(module.replace('-', "_"))
    }

    pub fn lockdown(&self) -> PathBuf {
        self.sys.join("kernel/security/lockdown")
    }

    pub fn cmdline(&self) -> PathBuf {
        self.proc.join("cmdline")
    }

    pub fn pf_bb_config_socket(&self, pci: &str) -> PathBuf {
        self.tmp.join(format!("pf_bb_config.{pci}.sock"))
    }

    pub fn pf_bb_config_log(&self, pci: &str) -> PathBuf {
        self.log.join(format!("pf_bb_cfg_{pci}.log"))
    }

    pub fn pf_bb_config_response_log(&self, pci: &str) -> PathBuf {
        self.log.join(format!("pf_bb_cfg_{pci}_response.log"))
    }

    pub fn vfio_token(&self) -> PathBuf {
        self.config.join("vfiotoken")
    }

    pub fn accelerator_discovery(&self, file: &str) -> PathBuf {
        self.config.join("config").join(file)
    }
}
