//! Device configuration
//!
//! Applies a node spec to the accelerators in a family's inventory. Each PF is
//! torn down before it is reconfigured:
//!
//! 1. unbind its VFs, drop the VF count to zero, function-level reset, stop pf_bb_config
//! 2. load modules, rebind the PF, enable memory and bus mastering
//! 3. write the INI, resolve the FFT table and start pf_bb_config
//! 4. create the VFs and bind them to the VF driver
//!
//! PFs are handled in inventory order. The first failure aborts the pass and
//! leaves whatever was already done in place for the next reconcile to fix.

use crds::{BBDevConfigSet, CardConfig, NodeConfigSpec, NodeInventory, PhysicalFunctionConfigExt};
use pf_bb_config::{fft, write_ini};
use sriov_host::{CommandRunner, Sysfs};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DaemonError;
use crate::process::{self, PF_BB_CONFIG};
use crate::tailer::TailerRegistry;
use crate::validation::VFIO_PCI;

/// Applies node specs to PFs through sysfs and host commands
#[derive(Clone)]
pub struct Configurator {
    sysfs: Sysfs,
    runner: Arc<dyn CommandRunner>,
    http: reqwest::Client,
    vfio_token: String,
    tailers: TailerRegistry,
    token: CancellationToken,
}

impl std::fmt::Debug for Configurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configurator")
            .field("sysfs", &self.sysfs)
            .field("tailers", &self.tailers)
            .finish_non_exhaustive()
    }
}

impl Configurator {
    pub fn new(
        sysfs: Sysfs,
        runner: Arc<dyn CommandRunner>,
        vfio_token: String,
        tailers: TailerRegistry,
        token: CancellationToken,
    ) -> Self {
        Self {
            sysfs,
            runner,
            http: reqwest::Client::new(),
            vfio_token,
            tailers,
            token,
        }
    }

    pub fn sysfs(&self) -> &Sysfs {
        &self.sysfs
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// vfio-pci PFs of `spec` with a live pf_bb_config
    pub async fn running_pf_bb_config<B>(
        &self,
        spec: &NodeConfigSpec<B>,
    ) -> Result<HashSet<String>, DaemonError> {
        let mut running = HashSet::new();
        for pf in spec.physical_functions.iter().filter(|pf| pf.pf_driver == VFIO_PCI) {
            if process::is_running(self.runner(), &pf.pci_address).await? {
                running.insert(pf.pci_address.clone());
            }
        }
        Ok(running)
    }

    /// Reconfigure every PF marked in `update_required` and clear VFs from PFs not in `spec`
    ///
    /// PFs missing from `update_required` are treated as needing an update.
    /// `token` is checked between accelerators.
    pub async fn apply_spec<B: BBDevConfigSet>(
        &self,
        spec: &NodeConfigSpec<B>,
        inventory: &NodeInventory,
        update_required: &HashMap<String, bool>,
        token: &CancellationToken,
    ) -> Result<(), DaemonError> {
        for accelerator in &inventory.sriov_accelerators {
            if token.is_cancelled() {
                return Err(DaemonError::Cancelled);
            }
            let pci = accelerator.pci_address.as_str();

            match spec.find(pci) {
                Some(pf) => {
                    if !update_required.get(pci).copied().unwrap_or(true) {
                        debug!(pci, "PF config unchanged, skipping");
                        continue;
                    }
                    info!(pci, pf_driver = %pf.pf_driver, vf_amount = pf.vf_amount, "Configuring accelerator");
                    self.teardown(pci).await?;
                    self.apply(pf).await?;
                }
                None if accelerator.vf_count() > 0 => {
                    info!(pci, "Accelerator no longer configured, removing VFs");
                    self.teardown(pci).await?;
                }
                None => {}
            }
        }
        Ok(())
    }

    async fn teardown(&self, pci: &str) -> Result<(), DaemonError> {
        let vfs = self.sysfs.virtual_functions(pci)?;
        for vf in &vfs {
            self.sysfs.unbind(vf).await?;
        }
        if !vfs.is_empty() {
            self.sysfs.set_num_vfs(pci, 0).await?;
        }
        self.sysfs.reset(pci).await?;
        process::stop(self.runner(), self.sysfs.paths(), pci).await?;
        Ok(())
    }

    async fn load_module(&self, driver: &str) -> Result<(), DaemonError> {
        if driver.is_empty() {
            return Ok(());
        }
        let mut args = vec![driver.to_string()];
        if driver == VFIO_PCI {
            args.extend(["enable_sriov=1".to_string(), "disable_idle_d3=1".to_string()]);
        }
        self.runner.run_checked("modprobe", &args).await?;
        Ok(())
    }

    async fn apply<B: BBDevConfigSet>(
        &self,
        pf: &PhysicalFunctionConfigExt<B>,
    ) -> Result<(), DaemonError> {
        let pci = pf.pci_address.as_str();

        self.load_module(&pf.pf_driver).await?;
        self.load_module(&pf.vf_driver).await?;

        self.sysfs.unbind(pci).await?;
        self.sysfs.bind(pci, &pf.pf_driver).await?;

        let setpci = ["-v", "-s", pci, "COMMAND=06"].map(String::from);
        self.runner.run_checked("setpci", &setpci).await?;

        if let Some(card) = pf.bb_dev_config.card()? {
            self.start_pf_bb_config(pf, &card).await?;
        }

        self.sysfs.set_num_vfs(pci, pf.vf_amount).await?;

        if !pf.vf_driver.is_empty() {
            for vf in self.sysfs.virtual_functions(pci)? {
                self.sysfs.unbind(&vf).await?;
                self.sysfs.bind(&vf, &pf.vf_driver).await?;
            }
        }
        Ok(())
    }

    async fn start_pf_bb_config<B>(
        &self,
        pf: &PhysicalFunctionConfigExt<B>,
        card: &CardConfig<'_>,
    ) -> Result<(), DaemonError> {
        let pci = pf.pci_address.as_str();
        let paths = self.sysfs.paths();

        let ini = paths.workdir.join(format!("{pci}.ini"));
        write_ini(&ini, card).await?;
        let fft_table = fft::resolve_table(&self.http, &paths.workdir, card).await?;

        let vfio = pf.pf_driver == VFIO_PCI;
        let args = process::arguments(
            card.device_name(),
            &ini,
            pci,
            vfio.then_some(self.vfio_token.as_str()),
            fft_table.as_ref(),
        );
        self.runner.spawn(PF_BB_CONFIG, &args).await?;
        info!(pci, device = card.device_name(), "Started pf_bb_config");

        if vfio {
            self.tailers.ensure(pci, paths.pf_bb_config_log(pci), &self.token);
        }
        Ok(())
    }
}
