//! Admission webhook for cluster and node configs.
//!
//! Create and update run the same rules; delete is always allowed. Objects
//! arrive as `DynamicObject` and are decoded into the family's typed resource
//! so a malformed object is denied with the decoding error instead of being
//! rejected at the HTTP layer.

use axum::extract::Json;
use axum::routing::post;
use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use crds::validation::{validate_cluster_config, validate_node_config};
use crds::{AcceleratorFamily, Fec, Vrb};
use kube::ResourceExt;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ControllerError;

/// Admission endpoint paths, one per validated kind
pub const FEC_CLUSTER_CONFIG_PATH: &str = "/validate-sriovfec-intel-com-v2-sriovfecclusterconfig";
pub const VRB_CLUSTER_CONFIG_PATH: &str = "/validate-sriovvrb-intel-com-v1-sriovvrbclusterconfig";
pub const FEC_NODE_CONFIG_PATH: &str = "/validate-sriovfec-intel-com-v2-sriovfecnodeconfig";
pub const VRB_NODE_CONFIG_PATH: &str = "/validate-sriovvrb-intel-com-v1-sriovvrbnodeconfig";

fn decode<K: DeserializeOwned>(object: &DynamicObject) -> Result<K, String> {
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|e| format!("failed to decode object: {e}"))
}

/// Apply `validate` to the request's object
pub fn review<K, V>(req: &AdmissionRequest<DynamicObject>, validate: V) -> AdmissionResponse
where
    K: DeserializeOwned,
    V: Fn(&K) -> Result<(), String>,
{
    let res = AdmissionResponse::from(req);
    if matches!(req.operation, Operation::Delete) {
        return res;
    }
    let Some(object) = &req.object else {
        return res;
    };

    let name = object.name_any();
    match decode::<K>(object).and_then(|typed| validate(&typed)) {
        Ok(()) => {
            info!("accepted: {:?} on resource {}", req.operation, name);
            res
        }
        Err(err) => {
            warn!("denied: {:?} on {} ({})", req.operation, name, err);
            res.deny(err)
        }
    }
}

/// Review a ClusterConfig against the per-PF rules
pub fn review_cluster_config<F: AcceleratorFamily>(
    req: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    review::<F::ClusterConfig, _>(req, |cc| {
        validate_cluster_config::<F>(cc).map_err(|e| e.to_string())
    })
}

/// Review a NodeConfig: per-PF rules plus unique PCI addresses
pub fn review_node_config<F: AcceleratorFamily>(
    req: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    review::<F::NodeConfig, _>(req, |nc| {
        validate_node_config::<F>(nc).map_err(|e| e.to_string())
    })
}

fn respond(
    body: AdmissionReview<DynamicObject>,
    review: fn(&AdmissionRequest<DynamicObject>) -> AdmissionResponse,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(err) => {
            error!("invalid request: {}", err);
            return Json(AdmissionResponse::invalid(err.to_string()).into_review());
        }
    };
    Json(review(&req).into_review())
}

/// Routes for all four admission endpoints
pub fn router() -> Router {
    Router::new()
        .route(
            FEC_CLUSTER_CONFIG_PATH,
            post(|Json(body): Json<AdmissionReview<DynamicObject>>| async move {
                respond(body, review_cluster_config::<Fec>)
            }),
        )
        .route(
            VRB_CLUSTER_CONFIG_PATH,
            post(|Json(body): Json<AdmissionReview<DynamicObject>>| async move {
                respond(body, review_cluster_config::<Vrb>)
            }),
        )
        .route(
            FEC_NODE_CONFIG_PATH,
            post(|Json(body): Json<AdmissionReview<DynamicObject>>| async move {
                respond(body, review_node_config::<Fec>)
            }),
        )
        .route(
            VRB_NODE_CONFIG_PATH,
            post(|Json(body): Json<AdmissionReview<DynamicObject>>| async move {
                respond(body, review_node_config::<Vrb>)
            }),
        )
}

/// Serve the webhook over TLS on `0.0.0.0:<port>` until `token` is cancelled
///
/// The certificate pair is read from `tls.crt`/`tls.key` in `cert_dir`.
pub async fn serve_webhook(
    port: u16,
    cert_dir: &Path,
    token: CancellationToken,
) -> Result<(), ControllerError> {
    let tls = RustlsConfig::from_pem_file(cert_dir.join("tls.crt"), cert_dir.join("tls.key")).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let handle = Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        token.cancelled().await;
        shutdown.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    info!("Serving admission webhook on {}", addr);
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(router().into_make_service())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    fn request(kind: &str, group: &str, version: &str, operation: &str, object: Value) -> AdmissionRequest<DynamicObject> {
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "00000000-0000-0000-0000-000000000001",
                "kind": { "group": group, "version": version, "kind": kind },
                "resource": { "group": group, "version": version, "resource": format!("{}s", kind.to_lowercase()) },
                "name": "config",
                "namespace": "vran-acceleration-operators",
                "operation": operation,
                "userInfo": {},
                "object": object,
                "dryRun": false,
            }
        }))
        .unwrap();
        review.try_into().unwrap()
    }

    fn fec_cluster_config(physical_function: Value) -> Value {
        json!({
            "apiVersion": "sriovfec.intel.com/v2",
            "kind": "SriovFecClusterConfig",
            "metadata": { "name": "config", "namespace": "vran-acceleration-operators" },
            "spec": {
                "priority": 1,
                "physicalFunction": physical_function,
            }
        })
    }

    fn fec_review(operation: &str, physical_function: Value) -> AdmissionResponse {
        let req = request(
            "SriovFecClusterConfig",
            "sriovfec.intel.com",
            "v2",
            operation,
            fec_cluster_config(physical_function),
        );
        review_cluster_config::<Fec>(&req)
    }

    fn acc100() -> Value {
        json!({
            "pfDriver": "pci-pf-stub",
            "vfDriver": "vfio-pci",
            "vfAmount": 2,
            "bbDevConfig": {
                "acc100": {
                    "pfMode": false,
                    "numVfBundles": 2,
                    "maxQueueSize": 1024,
                    "uplink4G": { "numQueueGroups": 2, "numAqsPerGroups": 16, "aqDepthLog2": 4 },
                    "downlink4G": { "numQueueGroups": 2, "numAqsPerGroups": 16, "aqDepthLog2": 4 },
                    "uplink5G": { "numQueueGroups": 2, "numAqsPerGroups": 16, "aqDepthLog2": 4 },
                    "downlink5G": { "numQueueGroups": 2, "numAqsPerGroups": 16, "aqDepthLog2": 4 }
                }
            }
        })
    }

    #[test]
    fn test_valid_cluster_config_is_allowed() {
        for operation in ["CREATE", "UPDATE"] {
            assert!(fec_review(operation, acc100()).allowed);
        }
    }

    #[test]
    fn test_empty_bbdev_config_is_denied() {
        let mut pf = acc100();
        pf["bbDevConfig"] = json!({});
        let res = fec_review("CREATE", pf);
        assert!(!res.allowed);
        assert!(res.result.message.contains("bbDevConfig section cannot be empty"));
    }

    #[test]
    fn test_n3000_queue_overflow_is_denied() {
        let mut pf = acc100();
        pf["bbDevConfig"] = json!({
            "n3000": {
                "networkType": "FPGA_5GNR",
                "pfMode": false,
                "flrTimeout": 610,
                "downlink": { "bandwidth": 8, "loadBalance": 128, "queues": { "vf0": 16 } },
                "uplink": {
                    "bandwidth": 8,
                    "loadBalance": 128,
                    "queues": { "vf0": 16, "vf1": 16, "vf2": 9 }
                }
            }
        });
        let res = fec_review("UPDATE", pf);
        assert!(!res.allowed);
        assert!(res.result.message.contains("sum of all specified queues must be no more than 32"));
    }

    #[test]
    fn test_undecodable_object_is_denied() {
        let res = fec_review("CREATE", json!({ "vfAmount": "many" }));
        assert!(!res.allowed);
        assert!(res.result.message.contains("failed to decode object"));
    }

    #[test]
    fn test_delete_is_always_allowed() {
        let mut pf = acc100();
        pf["bbDevConfig"] = json!({});
        assert!(fec_review("DELETE", pf).allowed);
    }

    #[test]
    fn test_node_config_duplicate_pci_is_denied() {
        let pf = json!({
            "pciAddress": "0000:f7:00.0",
            "pfDriver": "vfio-pci",
            "vfDriver": "vfio-pci",
            "vfAmount": 1,
            "bbDevConfig": {}
        });
        let req = request(
            "SriovVrbNodeConfig",
            "sriovvrb.intel.com",
            "v1",
            "CREATE",
            json!({
                "apiVersion": "sriovvrb.intel.com/v1",
                "kind": "SriovVrbNodeConfig",
                "metadata": { "name": "worker-1", "namespace": "vran-acceleration-operators" },
                "spec": { "physicalFunctions": [pf.clone(), pf] }
            }),
        );
        let res = review_node_config::<Vrb>(&req);
        assert!(!res.allowed);
        assert!(res.result.message.contains("is specified more than once"));
    }

    proptest! {
        #[test]
        fn prop_review_never_panics(
            driver in "[a-z_-]{0,12}",
            vf_amount in 0u32..64,
            bundles in 0u32..64,
            groups in prop::collection::vec(0u32..20, 4),
            operation in prop::sample::select(vec!["CREATE", "UPDATE"]),
        ) {
            let pf = json!({
                "pfDriver": driver,
                "vfDriver": "vfio-pci",
                "vfAmount": vf_amount,
                "bbDevConfig": {
                    "acc100": {
                        "numVfBundles": bundles,
                        "maxQueueSize": 1024,
                        "uplink4G": { "numQueueGroups": groups[0], "numAqsPerGroups": 16, "aqDepthLog2": 4 },
                        "downlink4G": { "numQueueGroups": groups[1], "numAqsPerGroups": 16, "aqDepthLog2": 4 },
                        "uplink5G": { "numQueueGroups": groups[2], "numAqsPerGroups": 16, "aqDepthLog2": 4 },
                        "downlink5G": { "numQueueGroups": groups[3], "numAqsPerGroups": 16, "aqDepthLog2": 4 }
                    }
                }
            });
            let _ = fec_review(operation, pf);
        }
    }
}
