use std::collections::BTreeMap;

use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const NAME_GROUP_ENDPOINT: &str = "endpoints.submariner.io";

/// Backend identifier of the wireguard cable driver.
pub const BACKEND_WIREGUARD: &str = "wireguard";

/// A cluster's gateway as advertised to the rest of the cluster set.
#[derive(CustomResource, JsonSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug)]
#[kube(
    group = "submariner.io",
    version = "v1",
    kind = "Endpoint",
    derive = "Default",
    derive = "PartialEq",
    namespaced
)]
pub struct EndpointSpec {
    #[serde(rename = "cluster_id")]
    pub cluster_id: String,

    #[serde(rename = "cable_name")]
    pub cable_name: String,

    #[serde(default, rename = "healthCheckIP", skip_serializing_if = "Option::is_none")]
    pub health_check_ip: Option<String>,

    pub hostname: String,

    /// CIDRs reachable through this endpoint
    #[serde(default)]
    pub subnets: Vec<String>,

    #[serde(rename = "private_ip")]
    pub private_ip: String,

    #[serde(default, rename = "public_ip", skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,

    #[serde(default, rename = "nat_enabled")]
    pub nat_enabled: bool,

    /// Cable driver in use, e.g. `libreswan` or `wireguard`
    pub backend: String,

    #[serde(default, rename = "backend_config", skip_serializing_if = "BTreeMap::is_empty")]
    pub backend_config: BTreeMap<String, String>,
}

impl Endpoint {
    pub fn is_wireguard(&self) -> bool {
        self.spec.backend == BACKEND_WIREGUARD
    }

    /// Short description used in log lines.
    pub fn describe(&self) -> String {
        format!(
            "{} (cluster {}, backend {}, subnets {:?})",
            self.name_any(),
            self.spec.cluster_id,
            self.spec.backend,
            self.spec.subnets
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_spec_wire_names() {
        let raw = r#"{
            "cluster_id": "cluster-b",
            "cable_name": "submariner-cable-cluster-b-10-0-0-1",
            "hostname": "node-1",
            "subnets": ["172.16.0.0/12"],
            "private_ip": "10.0.0.1",
            "nat_enabled": true,
            "backend": "wireguard",
            "backend_config": {"natt-discovery-port": "4490"}
        }"#;
        let spec: EndpointSpec = serde_json::from_str(raw).expect("spec");
        assert_eq!(spec.cluster_id, "cluster-b");
        assert_eq!(spec.subnets, vec!["172.16.0.0/12".to_string()]);
        assert!(spec.nat_enabled);
        assert_eq!(spec.public_ip, None);

        let endpoint = Endpoint::new("cluster-b-node-1", spec);
        assert!(endpoint.is_wireguard());
    }
}
