//! Fake host trees for unit tests
//!
//! Builds just enough of `/sys` and `/proc` under a temporary directory for the
//! inventory probe, the kernel checks and the sysfs writer to run against.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use crate::discovery::AcceleratorDiscoveryConfig;
use crate::paths::HostPaths;

#[derive(Debug, Clone)]
pub struct FakeSysfs {
    pub paths: HostPaths,
}

impl FakeSysfs {
    pub fn new(root: &Path) -> Self {
        let paths = HostPaths::under(root);
        for dir in [
            paths.pci_devices(),
            paths.sys.join("bus/pci/drivers"),
            paths.sys.join("module"),
            paths.proc.clone(),
            paths.tmp.clone(),
            paths.log.clone(),
            paths.workdir.clone(),
        ] {
            fs::create_dir_all(dir).unwrap();
        }
        Self { paths }
    }

    pub fn device(&self, pci: &str, vendor: &str, device: &str, class: &str) -> &Self {
        let dir = self.paths.pci_device(pci);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vendor"), format!("0x{vendor}\n")).unwrap();
        fs::write(dir.join("device"), format!("0x{device}\n")).unwrap();
        fs::write(dir.join("class"), format!("0x{class}\n")).unwrap();
        self
    }

    /// Intel SR-IOV capable processing accelerator
    pub fn pf(&self, pci: &str, device: &str, total_vfs: u32) -> &Self {
        self.device(pci, "8086", device, "120000");
        let dir = self.paths.pci_device(pci);
        fs::write(dir.join("sriov_totalvfs"), format!("{total_vfs}\n")).unwrap();
        fs::write(dir.join("sriov_numvfs"), "0\n").unwrap();
        self
    }

    pub fn bind(&self, pci: &str, driver: &str) -> &Self {
        let driver_dir = self.paths.pci_driver(driver);
        fs::create_dir_all(&driver_dir).unwrap();
        let link = self.paths.pci_device(pci).join("driver");
        let _ = fs::remove_file(&link);
        symlink(&driver_dir, link).unwrap();
        self
    }

    pub fn vf(&self, pf: &str, index: u32, vf: &str, device: &str) -> &Self {
        self.device(vf, "8086", device, "120000");
        symlink(
            self.paths.pci_device(vf),
            self.paths.pci_device(pf).join(format!("virtfn{index}")),
        )
        .unwrap();
        self
    }

    pub fn driver(&self, driver: &str) -> &Self {
        fs::create_dir_all(self.paths.pci_driver(driver)).unwrap();
        self
    }

    pub fn cmdline(&self, cmdline: &str) -> &Self {
        fs::write(self.paths.cmdline(), format!("{cmdline}\n")).unwrap();
        self
    }

    pub fn module_parameter(&self, module: &str, param: &str, value: &str) -> &Self {
        let path = self.paths.module_parameter(module, param);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("{value}\n")).unwrap();
        self
    }

    pub fn lockdown(&self, value: &str) -> &Self {
        let path = self.paths.lockdown();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("{value}\n")).unwrap();
        self
    }

    /// Trimmed contents of a file under the PF directory, `None` if never written
    pub fn read_device_file(&self, pci: &str, file: &str) -> Option<String> {
        fs::read_to_string(self.paths.pci_device(pci).join(file))
            .ok()
            .map(|s| s.trim().to_string())
    }

    pub fn read_driver_file(&self, driver: &str, file: &str) -> Option<String> {
        fs::read_to_string(self.paths.pci_driver(driver).join(file))
            .ok()
            .map(|s| s.trim().to_string())
    }
}

/// Discovery table recognizing ACC100 and VRB1 devices
pub fn discovery_fixture() -> AcceleratorDiscoveryConfig {
    AcceleratorDiscoveryConfig {
        vendor_id: BTreeMap::from([("8086".to_string(), "Intel".to_string())]),
        class: "12".to_string(),
        sub_class: "00".to_string(),
        devices: BTreeMap::from([
            ("0d5c".to_string(), "ACC100".to_string()),
            ("57c0".to_string(), "VRB1".to_string()),
        ]),
        node_label: "fpga.intel.com/intel-accelerator-present".to_string(),
    }
}
