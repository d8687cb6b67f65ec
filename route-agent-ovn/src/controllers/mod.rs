//! Controllers mirroring `GatewayRoute` and `NonGatewayRoute` resources into
//! static routes on the OVN cluster router.

mod gateway;
mod non_gateway;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::ListParams;
use kube::runtime::{WatchStreamExt, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use route_agent_crds::v1::route::RoutePolicy;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::connection::{ConnectionHandler, ControlPlaneClient, OWNER_KEY, StaticRoute};
use crate::{Error, Result};

pub use gateway::GatewayRouteController;
pub use non_gateway::NonGatewayRouteController;

pub const OVN_CLUSTER_ROUTER: &str = "ovn_cluster_router";

/// External id key holding `<namespace>/<name>` of the resource a route came from.
pub const RESOURCE_KEY: &str = "submariner.io/resource";

/// Watch settings shared by the route controllers.
#[derive(Clone)]
pub struct WatchConfig {
    pub client: Client,
    pub resync_period: Duration,
    pub node_name: String,
}

/// Handle to a running route controller.
pub struct ControllerHandle {
    name: &'static str,
    cancel: CancellationToken,
}

impl ControllerHandle {
    pub fn stop(&self) {
        info!("stopping {}", self.name);
        self.cancel.cancel();
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Turns route resources into the static routes they ask for.
pub(crate) struct RouteSync {
    connection: Arc<ConnectionHandler>,
    owner: &'static str,
    external_ids: BTreeMap<String, String>,
}

impl RouteSync {
    pub(crate) fn new(
        connection: Arc<ConnectionHandler>,
        owner: &'static str,
        external_ids: BTreeMap<String, String>,
    ) -> Self {
        Self {
            connection,
            owner,
            external_ids,
        }
    }

    fn desired_routes<K>(&self, objects: &[Arc<K>]) -> BTreeSet<StaticRoute>
    where
        K: RoutePolicy + ResourceExt,
    {
        desired_routes(objects, self.owner, &self.external_ids)
    }

    async fn sync<K>(&self, objects: &[Arc<K>]) -> Result<()>
    where
        K: RoutePolicy + ResourceExt,
    {
        let desired = self.desired_routes(objects);
        sync_static_routes(self.connection.client().as_ref(), self.owner, &desired).await
    }
}

pub(crate) fn desired_routes<K>(
    objects: &[Arc<K>],
    owner: &str,
    external_ids: &BTreeMap<String, String>,
) -> BTreeSet<StaticRoute>
where
    K: RoutePolicy + ResourceExt,
{
    let mut routes = BTreeSet::new();
    for obj in objects {
        let resource = format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any());
        let Some(nexthop) = obj.next_hop() else {
            debug!("{} has no next hop, skipping", resource);
            continue;
        };
        for cidr in obj.remote_cidrs() {
            let mut ids = external_ids.clone();
            ids.insert(OWNER_KEY.to_string(), owner.to_string());
            ids.insert(RESOURCE_KEY.to_string(), resource.clone());
            routes.insert(StaticRoute {
                ip_prefix: cidr.clone(),
                nexthop: nexthop.to_string(),
                external_ids: ids,
            });
        }
    }
    routes
}

/// Makes the routes owned by `owner` on the cluster router equal `desired`.
pub(crate) async fn sync_static_routes(
    client: &dyn ControlPlaneClient,
    owner: &str,
    desired: &BTreeSet<StaticRoute>,
) -> Result<()> {
    let existing = client.list_static_routes(OVN_CLUSTER_ROUTER, owner).await?;
    let present: BTreeSet<&StaticRoute> = existing.iter().map(|r| &r.route).collect();

    let stale: Vec<String> = existing
        .iter()
        .filter(|r| !desired.contains(&r.route))
        .map(|r| r.uuid.clone())
        .collect();
    let missing: Vec<StaticRoute> = desired
        .iter()
        .filter(|r| !present.contains(r))
        .cloned()
        .collect();

    if !stale.is_empty() {
        info!("deleting {} stale static routes owned by {}", stale.len(), owner);
        client.delete_static_routes(OVN_CLUSTER_ROUTER, &stale).await?;
    }
    if !missing.is_empty() {
        info!("adding {} static routes owned by {}", missing.len(), owner);
        client.add_static_routes(OVN_CLUSTER_ROUTER, &missing).await?;
    }
    Ok(())
}

/// Checks the resource is served, then spawns the watch loop.
pub(crate) async fn start<K>(
    name: &'static str,
    api: Api<K>,
    sync: RouteSync,
    resync_period: Duration,
) -> Result<ControllerHandle>
where
    K: RoutePolicy + Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    api.list(&ListParams::default().limit(1))
        .await
        .map_err(|source| Error::RouteController {
            controller: name,
            source,
        })?;

    let cancel = CancellationToken::new();
    info!("starting {}", name);
    tokio::spawn(run(name, api, sync, resync_period, cancel.clone()).instrument(Span::current()));
    Ok(ControllerHandle { name, cancel })
}

async fn run<K>(name: &'static str, api: Api<K>, sync: RouteSync, resync_period: Duration, cancel: CancellationToken)
where
    K: RoutePolicy + Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    let (store, writer) = reflector::store();
    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer);
    let mut stream = pin!(stream);
    let mut resync = tokio::time::interval(resync_period);
    let mut ready = false;

    loop {
        let changed = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = resync.tick() => ready,
            event = stream.next() => match event {
                Some(Ok(watcher::Event::InitDone)) => {
                    ready = true;
                    true
                }
                Some(Ok(watcher::Event::Apply(_) | watcher::Event::Delete(_))) => ready,
                Some(Ok(_)) => false,
                Some(Err(e)) => {
                    warn!(%e, "{} watch failed", name);
                    false
                }
                None => break,
            },
        };
        if !changed {
            continue;
        }
        if let Err(e) = sync.sync(&store.state()).await {
            error!(?e, "{} failed to sync static routes", name);
        }
    }
    info!("{} exited", name);
}
