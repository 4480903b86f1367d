//! Kubernetes resource watchers.
//!
//! A matching pass runs whenever a cluster config, node config or accelerator
//! node changes. Passes are serialized per family.

use crate::reconciler::{ACCELERATOR_PRESENT_LABEL, Reconciler};
use crds::AcceleratorFamily;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use kube_runtime::watcher;
use operator_common::{LoopConfig, merge_triggers, object_triggers, run_triggered};
use tokio_util::sync::CancellationToken;

/// Watches one family's resources and drives its reconciler.
pub struct Watcher<F: AcceleratorFamily> {
    reconciler: Reconciler<F>,
    client: Client,
    namespace: String,
}

impl<F: AcceleratorFamily> Watcher<F> {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            reconciler: Reconciler::new(client.clone(), namespace),
            client,
            namespace: namespace.to_string(),
        }
    }

    /// Runs until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let cluster_configs: Api<F::ClusterConfig> =
            Api::namespaced(self.client.clone(), &self.namespace);
        let node_configs: Api<F::NodeConfig> =
            Api::namespaced(self.client.clone(), &self.namespace);
        let nodes: Api<Node> = Api::all(self.client.clone());

        let triggers = merge_triggers(vec![
            object_triggers(cluster_configs, watcher::Config::default()),
            object_triggers(node_configs, watcher::Config::default()),
            object_triggers(
                nodes,
                watcher::Config::default().labels(ACCELERATOR_PRESENT_LABEL),
            ),
        ]);

        let config = LoopConfig::new(format!("{} cluster config", F::FAMILY));
        let reconciler = &self.reconciler;
        run_triggered(config, triggers, token, || reconciler.reconcile()).await;
    }
}
