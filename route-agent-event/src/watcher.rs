use std::collections::{BTreeMap, BTreeSet};
use std::pin::pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, ResourceExt};
use route_agent_crds::v1::endpoint::Endpoint;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{Event, Registry, Result};

/// Turns `Endpoint` watch events into handler lifecycle events.
///
/// Endpoints whose cluster id matches the local cluster are local, everything
/// else is remote. The node is the gateway while a local endpoint names it as
/// its hostname.
pub struct EndpointWatcher {
    registry: Arc<Registry>,
    cluster_id: String,
    node_name: String,
    local: BTreeMap<String, Arc<Endpoint>>,
    remote: BTreeMap<String, Arc<Endpoint>>,
    /// Last role requested from the handlers.
    is_gateway: bool,
    /// Whether every handler accepted `is_gateway`.
    role_confirmed: bool,
    relisted: Option<BTreeSet<String>>,
}

impl EndpointWatcher {
    pub fn new(registry: Arc<Registry>, cluster_id: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            registry,
            cluster_id: cluster_id.into(),
            node_name: node_name.into(),
            local: BTreeMap::new(),
            remote: BTreeMap::new(),
            is_gateway: false,
            role_confirmed: true,
            relisted: None,
        }
    }

    pub fn is_gateway(&self) -> bool {
        self.is_gateway
    }

    /// Runs until cancelled or until a handler reports a fatal error.
    pub async fn run(mut self, api: Api<Endpoint>, cancel: CancellationToken) -> Result<()> {
        // nodes start out as non-gateways until a local endpoint says otherwise
        self.role_confirmed = self.registry.dispatch(&Event::TransitionToNonGateway).await?;

        let stream = watcher(api, watcher::Config::default()).default_backoff();
        let mut stream = pin!(stream);
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = stream.next() => event,
            };
            match event {
                Some(Ok(event)) => self.on_event(event).await?,
                Some(Err(e)) => error!(%e, "endpoint watch failed"),
                None => break,
            }
        }
        info!("endpoint watcher exited");
        Ok(())
    }

    pub(crate) async fn on_event(&mut self, event: watcher::Event<Endpoint>) -> Result<()> {
        match event {
            watcher::Event::Apply(ep) => self.on_apply(ep).await,
            watcher::Event::Delete(ep) => self.on_delete(ep).await,
            watcher::Event::Init => {
                self.relisted = Some(BTreeSet::new());
                Ok(())
            }
            watcher::Event::InitApply(ep) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(ep.name_any());
                }
                self.on_apply(ep).await
            }
            watcher::Event::InitDone => self.on_relist_done().await,
        }
    }

    async fn on_apply(&mut self, ep: Endpoint) -> Result<()> {
        let name = ep.name_any();
        let is_local = ep.spec.cluster_id == self.cluster_id;
        let cache = if is_local { &self.local } else { &self.remote };
        let ep = Arc::new(ep);

        let event = match cache.get(&name) {
            Some(prev) if prev.spec == ep.spec => None,
            Some(_) if is_local => Some(Event::LocalEndpointUpdated(ep.clone())),
            Some(_) => Some(Event::RemoteEndpointUpdated(ep.clone())),
            None if is_local => Some(Event::LocalEndpointCreated(ep.clone())),
            None => Some(Event::RemoteEndpointCreated(ep.clone())),
        };

        match event {
            Some(event) => {
                info!("processing {}", event);
                if self.registry.dispatch(&event).await? {
                    if is_local {
                        self.local.insert(name, ep.clone());
                    } else {
                        self.remote.insert(name, ep.clone());
                    }
                }
            }
            None => debug!("endpoint {} unchanged", name),
        }

        if is_local {
            self.update_gateway_role(ep.spec.hostname == self.node_name).await?;
        }
        Ok(())
    }

    async fn on_delete(&mut self, ep: Endpoint) -> Result<()> {
        let name = ep.name_any();
        let is_local = ep.spec.cluster_id == self.cluster_id;
        let cached = if is_local {
            self.local.remove(&name)
        } else {
            self.remote.remove(&name)
        };
        let ep = cached.unwrap_or_else(|| Arc::new(ep));

        let event = if is_local {
            Event::LocalEndpointRemoved(ep.clone())
        } else {
            Event::RemoteEndpointRemoved(ep.clone())
        };
        info!("processing {}", event);
        self.registry.dispatch(&event).await?;

        if is_local && ep.spec.hostname == self.node_name {
            self.update_gateway_role(false).await?;
        }
        Ok(())
    }

    /// Endpoints deleted while the watch was down never produce a delete event.
    async fn on_relist_done(&mut self) -> Result<()> {
        let Some(seen) = self.relisted.take() else {
            return Ok(());
        };
        let stale: Vec<Arc<Endpoint>> = self
            .local
            .values()
            .chain(self.remote.values())
            .filter(|ep| !seen.contains(&ep.name_any()))
            .cloned()
            .collect();
        for ep in stale {
            self.on_delete((*ep).clone()).await?;
        }
        Ok(())
    }

    /// Handlers may have partly applied a role they failed to confirm, so an
    /// unconfirmed role is requested again and a change is always delivered.
    async fn update_gateway_role(&mut self, gateway: bool) -> Result<()> {
        if gateway == self.is_gateway && self.role_confirmed {
            return Ok(());
        }
        let event = if gateway {
            Event::TransitionToGateway
        } else {
            Event::TransitionToNonGateway
        };
        info!("node {} processing {}", self.node_name, event);
        self.is_gateway = gateway;
        self.role_confirmed = self.registry.dispatch(&event).await?;
        Ok(())
    }
}
