use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client, ResourceExt};
use route_agent_crds::v1::route::NonGatewayRoute;
use tracing::{info, warn};

use super::{ControllerHandle, RouteSync, WatchConfig, start};
use crate::connection::ConnectionHandler;
use crate::{Error, Result};

pub(crate) const NON_GATEWAY_ROUTE_OWNER: &str = "non-gateway-route";

/// Annotation OVN-Kubernetes sets on nodes running in interconnect mode.
const ZONE_ANNOTATION: &str = "k8s.ovn.org/zone-name";

/// External id key tagging routes with the OVN zone of this node.
pub const ZONE_KEY: &str = "k8s.ovn.org/zone";

const CONTROLLER_NAME: &str = "non-gateway route controller";

/// Programs the routes published in `NonGatewayRoute` resources, tagged with
/// the OVN zone of the local node.
pub struct NonGatewayRouteController {
    handle: ControllerHandle,
}

impl NonGatewayRouteController {
    pub async fn new(
        config: WatchConfig,
        connection: Arc<ConnectionHandler>,
        k8s_client: Client,
        namespace: &str,
    ) -> Result<Self> {
        let mut external_ids = BTreeMap::new();
        match node_zone(k8s_client, &config.node_name).await? {
            Some(zone) => {
                info!("node {} is in OVN zone {}", config.node_name, zone);
                external_ids.insert(ZONE_KEY.to_string(), zone);
            }
            None => warn!("node {} has no {} annotation", config.node_name, ZONE_ANNOTATION),
        }

        let api: Api<NonGatewayRoute> = Api::namespaced(config.client, namespace);
        let sync = RouteSync::new(connection, NON_GATEWAY_ROUTE_OWNER, external_ids);
        let handle = start(CONTROLLER_NAME, api, sync, config.resync_period).await?;
        Ok(Self { handle })
    }

    pub fn stop(&self) {
        self.handle.stop();
    }
}

async fn node_zone(client: Client, node_name: &str) -> Result<Option<String>> {
    let nodes: Api<Node> = Api::all(client);
    let node = nodes
        .get_opt(node_name)
        .await
        .map_err(|source| Error::RouteController {
            controller: CONTROLLER_NAME,
            source,
        })?;
    Ok(node.as_ref().and_then(zone_of))
}

fn zone_of(node: &Node) -> Option<String> {
    node.annotations().get(ZONE_ANNOTATION).cloned()
}
