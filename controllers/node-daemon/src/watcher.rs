//! NodeConfig watcher.
//!
//! A pass runs when this node's NodeConfig gets a new generation, and on the
//! resync timer so hardware drift is noticed without a spec change.

use crate::reconciler::NodeReconciler;
use crds::AcceleratorFamily;
use kube::Api;
use kube_runtime::watcher;
use operator_common::{LoopConfig, generation_triggers, run_triggered};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drives one family's reconciler for this node.
pub struct Watcher<F: AcceleratorFamily> {
    reconciler: NodeReconciler<F>,
    api: Api<F::NodeConfig>,
    node_name: String,
    resync: Duration,
}

impl<F: AcceleratorFamily> Watcher<F> {
    pub fn new(
        reconciler: NodeReconciler<F>,
        api: Api<F::NodeConfig>,
        node_name: &str,
        resync: Duration,
    ) -> Self {
        Self {
            reconciler,
            api,
            node_name: node_name.to_string(),
            resync,
        }
    }

    /// Runs until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let selector = format!("metadata.name={}", self.node_name);
        let triggers = generation_triggers(self.api, watcher::Config::default().fields(&selector));

        let config = LoopConfig::new(format!("{} node config", F::FAMILY)).resync(self.resync);
        let reconciler = &self.reconciler;
        run_triggered(config, triggers, token, || reconciler.reconcile()).await;
    }
}
