use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const NAME_GROUP_GATEWAYROUTE: &str = "gatewayroutes.submariner.io";
pub const NAME_GROUP_NONGATEWAYROUTE: &str = "nongatewayroutes.submariner.io";

/// Routes to remote CIDRs published for the OVN logical router.
pub trait RoutePolicy {
    fn next_hops(&self) -> &[String];
    fn remote_cidrs(&self) -> &[String];

    /// Only the first next hop is programmed; the rest are informational.
    fn next_hop(&self) -> Option<&str> {
        self.next_hops().first().map(String::as_str)
    }
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug)]
#[kube(
    group = "submariner.io",
    version = "v1",
    kind = "GatewayRoute",
    derive = "Default",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRouteSpec {
    #[serde(default)]
    pub next_hops: Vec<String>,

    #[serde(default, rename = "remoteCIDRs")]
    pub remote_cidrs: Vec<String>,
}

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug)]
#[kube(
    group = "submariner.io",
    version = "v1",
    kind = "NonGatewayRoute",
    derive = "Default",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NonGatewayRouteSpec {
    #[serde(default)]
    pub next_hops: Vec<String>,

    #[serde(default, rename = "remoteCIDRs")]
    pub remote_cidrs: Vec<String>,
}

impl RoutePolicy for GatewayRoute {
    fn next_hops(&self) -> &[String] {
        &self.spec.next_hops
    }

    fn remote_cidrs(&self) -> &[String] {
        &self.spec.remote_cidrs
    }
}

impl RoutePolicy for NonGatewayRoute {
    fn next_hops(&self) -> &[String] {
        &self.spec.next_hops
    }

    fn remote_cidrs(&self) -> &[String] {
        &self.spec.remote_cidrs
    }
}
