use std::collections::BTreeMap;
use std::sync::Arc;

use kube::Api;
use route_agent_crds::v1::route::GatewayRoute;

use super::{ControllerHandle, RouteSync, WatchConfig, start};
use crate::Result;
use crate::connection::ConnectionHandler;

pub(crate) const GATEWAY_ROUTE_OWNER: &str = "gateway-route";

/// Programs the routes published in `GatewayRoute` resources.
pub struct GatewayRouteController {
    handle: ControllerHandle,
}

impl GatewayRouteController {
    pub async fn new(config: WatchConfig, connection: Arc<ConnectionHandler>, namespace: &str) -> Result<Self> {
        let api: Api<GatewayRoute> = Api::namespaced(config.client, namespace);
        let sync = RouteSync::new(connection, GATEWAY_ROUTE_OWNER, BTreeMap::new());
        let handle = start("gateway route controller", api, sync, config.resync_period).await?;
        Ok(Self { handle })
    }

    pub fn stop(&self) {
        self.handle.stop();
    }
}
