//! Node reconciliation
//!
//! Drives this node's NodeConfig of one family towards its spec:
//!
//! 1. create the NodeConfig if missing, recording the inventory
//! 2. validate the spec against the kernel environment and the inventory
//! 3. skip when the generation was observed and the hardware has not drifted
//! 4. otherwise drain (unless skipped) and apply, reporting progress in the
//!    `Configured` condition
//!
//! `observedGeneration` only advances on success, so a failed or partial apply
//! is retried on every pass until it converges or the spec changes.

use crds::{
    AcceleratorFamily, CONFIGURED_CONDITION, Condition, ConditionReason, ConditionStatus,
    NodeConfigSpec, NodeInventory, PhysicalFunctionConfigExt,
};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Resource, ResourceExt};
use operator_common::{Requeue, is_conflict, retry_on_conflict};
use sriov_host::{AcceleratorDiscoveryConfig, HostPaths, get_inventory};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::configurator::Configurator;
use crate::drain::DrainCoordinator;
use crate::error::DaemonError;
use crate::process;
use crate::validation::{VFIO_PCI, validate_against_inventory, validate_environment};

/// Whether `pf` no longer matches what is running on the node
fn drifted<B>(
    pf: &PhysicalFunctionConfigExt<B>,
    inventory: &NodeInventory,
    running: &HashSet<String>,
) -> bool {
    let vf_count_differs = inventory
        .find(&pf.pci_address)
        .is_none_or(|accelerator| accelerator.vf_count() != pf.vf_amount as usize);
    let helper_stopped = pf.pf_driver == VFIO_PCI && !running.contains(&pf.pci_address);
    vf_count_differs || helper_stopped
}

/// Whether the node needs reconfiguring at all
///
/// `running` holds the PCI addresses with a live pf_bb_config.
pub fn is_card_update_required<B>(
    generation: Option<i64>,
    observed_generation: Option<i64>,
    spec: &NodeConfigSpec<B>,
    inventory: &NodeInventory,
    running: &HashSet<String>,
) -> bool {
    if generation != observed_generation {
        return true;
    }
    spec.physical_functions
        .iter()
        .any(|pf| drifted(pf, inventory, running))
}

/// Last applied and in-flight PF configs, keyed by PCI address
#[derive(Debug)]
pub struct ConfigState<B> {
    previous: HashMap<String, PhysicalFunctionConfigExt<B>>,
    current: HashMap<String, PhysicalFunctionConfigExt<B>>,
}

impl<B> Default for ConfigState<B> {
    fn default() -> Self {
        Self {
            previous: HashMap::new(),
            current: HashMap::new(),
        }
    }
}

impl<B: Clone + PartialEq> ConfigState<B> {
    /// Record `spec` as in flight and mark PFs whose config changed since the last success
    pub fn stage(&mut self, spec: &NodeConfigSpec<B>) -> HashMap<String, bool> {
        self.current = spec
            .physical_functions
            .iter()
            .map(|pf| (pf.pci_address.clone(), pf.clone()))
            .collect();
        self.current
            .iter()
            .map(|(pci, pf)| (pci.clone(), self.previous.get(pci) != Some(pf)))
            .collect()
    }

    pub fn commit(&mut self) {
        self.previous = self.current.clone();
    }
}

/// Per-PF update flags: changed since the last success, or drifted
pub fn update_plan<B: Clone + PartialEq>(
    state: &mut ConfigState<B>,
    spec: &NodeConfigSpec<B>,
    inventory: &NodeInventory,
    running: &HashSet<String>,
) -> HashMap<String, bool> {
    let mut plan = state.stage(spec);
    for pf in &spec.physical_functions {
        if drifted(pf, inventory, running) {
            plan.insert(pf.pci_address.clone(), true);
        }
    }
    plan
}

/// Reconciles this node's NodeConfig of family `F`
pub struct NodeReconciler<F: AcceleratorFamily> {
    node_name: String,
    namespace: String,
    api: Api<F::NodeConfig>,
    discovery: AcceleratorDiscoveryConfig,
    configurator: Configurator,
    drain: Arc<DrainCoordinator>,
    state: Mutex<ConfigState<F::BBDevConfig>>,
    token: CancellationToken,
    _family: PhantomData<F>,
}

impl<F: AcceleratorFamily> std::fmt::Debug for NodeReconciler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeReconciler")
            .field("family", &F::FAMILY)
            .field("node_name", &self.node_name)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<F: AcceleratorFamily> NodeReconciler<F> {
    pub fn new(
        api: Api<F::NodeConfig>,
        node_name: &str,
        namespace: &str,
        discovery: AcceleratorDiscoveryConfig,
        configurator: Configurator,
        drain: Arc<DrainCoordinator>,
        token: CancellationToken,
    ) -> Self {
        Self {
            node_name: node_name.to_string(),
            namespace: namespace.to_string(),
            api,
            discovery,
            configurator,
            drain,
            state: Mutex::new(ConfigState::default()),
            token,
            _family: PhantomData,
        }
    }

    fn paths(&self) -> &HostPaths {
        self.configurator.sysfs().paths()
    }

    fn inventory(&self) -> Result<NodeInventory, DaemonError> {
        Ok(get_inventory(self.paths(), &self.discovery)?)
    }

    pub async fn reconcile(&self) -> Result<Requeue, DaemonError> {
        let family = F::FAMILY;
        let Some(node_config) = self.api.get_opt(&self.node_name).await? else {
            info!(%family, node = %self.node_name, "NodeConfig not found, creating it");
            self.create_node_config().await?;
            return Ok(Requeue::Resync);
        };

        let generation = node_config.meta().generation;
        let observed = F::node_status(&node_config).and_then(|status| status.observed_generation());
        let spec = F::node_spec(&node_config);

        if let Err(e) = validate_environment(self.paths(), &spec) {
            warn!(%family, node = %self.node_name, "Node config rejected: {}", e);
            self.set_condition(ConditionReason::Failed, e.to_string(), observed).await?;
            return Ok(Requeue::Resync);
        }

        let inventory = self.inventory()?;
        if let Err(e) = validate_against_inventory(&spec, &inventory) {
            warn!(%family, node = %self.node_name, "Node config rejected: {}", e);
            self.set_condition(ConditionReason::Failed, e.to_string(), observed).await?;
            return Ok(Requeue::Resync);
        }

        let running = self.configurator.running_pf_bb_config(&spec).await?;
        if !is_card_update_required(generation, observed, &spec, &inventory, &running) {
            debug!(%family, node = %self.node_name, "Node config up to date");
            return Ok(Requeue::Resync);
        }

        let plan = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| DaemonError::Watch("config state poisoned".to_string()))?;
            update_plan(&mut state, &spec, &inventory, &running)
        };

        info!(%family, node = %self.node_name, generation = ?generation, "Applying node config");
        self.set_condition(ConditionReason::InProgress, "Configuration started".to_string(), observed)
            .await?;

        let configurator = &self.configurator;
        let applied = self
            .drain
            .drain_and_run(!spec.drain_skip, &self.token, |held| async move {
                let result = configurator.apply_spec(&spec, &inventory, &plan, &held).await;
                (true, result)
            })
            .await
            .and_then(|result| result);

        match applied {
            Ok(()) => {
                if let Ok(mut state) = self.state.lock() {
                    state.commit();
                }
                info!(%family, node = %self.node_name, "Node config applied");
                self.set_condition(ConditionReason::Succeeded, "Configured successfully".to_string(), generation)
                    .await?;
            }
            Err(DaemonError::Cancelled) => {
                info!(%family, node = %self.node_name, "Configuration interrupted");
                return Err(DaemonError::Cancelled);
            }
            Err(e) => {
                error!(%family, node = %self.node_name, "Failed to apply node config: {}", e);
                self.set_condition(ConditionReason::Failed, e.to_string(), observed).await?;
            }
        }
        Ok(Requeue::Resync)
    }

    async fn create_node_config(&self) -> Result<(), DaemonError> {
        let node_config = F::new_node_config(&self.node_name, &self.namespace);
        match self.api.create(&PostParams::default(), &node_config).await {
            Ok(_) => {}
            Err(e) if is_conflict(&e) => debug!(node = %self.node_name, "NodeConfig created concurrently"),
            Err(e) => return Err(e.into()),
        }
        self.set_condition(ConditionReason::NotRequested, "Inventory discovered".to_string(), None)
            .await
    }

    /// Write the `Configured` condition along with a fresh inventory and pf_bb_config version
    async fn set_condition(
        &self,
        reason: ConditionReason,
        message: String,
        observed_generation: Option<i64>,
    ) -> Result<(), DaemonError> {
        let inventory = self.inventory()?;
        let version = process::version(self.configurator.runner()).await;
        let status = if reason == ConditionReason::Succeeded {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };

        retry_on_conflict("node config status", || async {
            let node_config = self.api.get(&self.node_name).await?;
            let mut node_status = F::node_status(&node_config).cloned().unwrap_or_default();
            node_status.set_condition(Condition::new(
                CONFIGURED_CONDITION,
                status,
                reason,
                message.clone(),
                observed_generation,
            ));
            node_status.inventory = inventory.clone();
            node_status.pf_bb_conf_version = version.clone();

            let patch = serde_json::json!({
                "metadata": { "resourceVersion": node_config.resource_version() },
                "status": node_status,
            });
            self.api
                .patch_status(&self.node_name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map(|_| ())
        })
        .await?;

        debug!(node = %self.node_name, reason = reason.as_str(), "NodeConfig status updated");
        Ok(())
    }
}
