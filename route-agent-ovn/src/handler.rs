use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use kube::{Client, ResourceExt};
use route_agent_crds::v1::endpoint::Endpoint;
use route_agent_event::HandlerResult;
use route_agent_kernel::constants::WIREGUARD_DEVICE_NAME;
use route_agent_kernel::{IpTables, NetLink, OvsBridge, PacketFilter, RtNetlink, Vsctl};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, info, info_span, warn};

use crate::cidr::{ipv4_subnets, overlapping_subnets};
use crate::connection::{ConnectionHandler, ConnectionOptions, NewControlPlaneClientFn, new_ovsdb_client};
use crate::controllers::{GatewayRouteController, NonGatewayRouteController, WatchConfig};
use crate::dataplane::{Dataplane, State};
use crate::uninstall::TeardownReport;
use crate::{Error, OVN_KUBERNETES, Result, chains, syncer};

const HANDLER_NAME: &str = "ovn-hostroutes-handler";

pub struct HandlerConfig {
    pub namespace: String,
    pub cluster_cidr: Vec<String>,
    pub service_cidr: Vec<String>,
    pub watch_config: WatchConfig,
    pub k8s_client: Client,
    pub connection_options: ConnectionOptions,
    /// Builds the control-plane client during `init`.
    pub new_control_plane_client: NewControlPlaneClientFn,
    /// Parent span of everything the handler logs.
    pub span: Span,
}

impl HandlerConfig {
    pub fn new(
        namespace: impl Into<String>,
        cluster_cidr: Vec<String>,
        service_cidr: Vec<String>,
        watch_config: WatchConfig,
        k8s_client: Client,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            cluster_cidr,
            service_cidr,
            watch_config,
            k8s_client,
            connection_options: ConnectionOptions::default(),
            new_control_plane_client: new_ovsdb_client(),
            span: info_span!("ovn"),
        }
    }

    pub fn with_connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    pub fn with_control_plane_client(mut self, new_client: NewControlPlaneClientFn) -> Self {
        self.new_control_plane_client = new_client;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

struct RouteControllers {
    gateway: GatewayRouteController,
    non_gateway: NonGatewayRouteController,
}

/// OVN dataplane handler: tracks remote endpoints and the gateway role and
/// keeps the node's rules, routes and iptables chains in line with them.
pub struct Handler {
    config: HandlerConfig,
    state: Arc<Mutex<State>>,
    dataplane: Arc<Dataplane>,
    cancel: CancellationToken,
    syncer: OnceLock<JoinHandle<()>>,
    controllers: OnceLock<RouteControllers>,
}

impl Handler {
    pub fn new(
        config: HandlerConfig,
        netlink: Arc<dyn NetLink>,
        ipt: Arc<dyn PacketFilter>,
        ovs: Arc<dyn OvsBridge>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(State::new())),
            dataplane: Arc::new(Dataplane { netlink, ipt, ovs }),
            cancel: CancellationToken::new(),
            syncer: OnceLock::new(),
            controllers: OnceLock::new(),
        }
    }

    /// Handler backed by the host's netlink, iptables and ovs-vsctl.
    pub fn try_default(config: HandlerConfig) -> Result<Self> {
        let ipt = IpTables::try_new().map_err(Error::PacketFilterUnavailable)?;
        let netlink = RtNetlink::try_new()?;
        Ok(Self::new(config, Arc::new(netlink), Arc::new(ipt), Arc::new(Vsctl)))
    }

    pub async fn is_gateway(&self) -> bool {
        self.state.lock().await.is_gateway
    }

    pub async fn remote_endpoint_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().await.remote_endpoints.keys().cloned().collect();
        names.sort();
        names
    }

    #[tracing::instrument(parent = &self.config.span, skip_all)]
    pub async fn init(&self) -> Result<()> {
        chains::legacy_cleanup(self.dataplane.ipt.as_ref());
        chains::init_iptables_chains(self.dataplane.ipt.as_ref()).map_err(Error::IptablesChains)?;

        self.syncer.get_or_init(|| {
            syncer::start_route_config_syncer(
                self.state.clone(),
                self.dataplane.clone(),
                self.cancel.child_token(),
                Span::current(),
            )
        });
        if self.controllers.get().is_some() {
            debug!("route controllers already running");
            return Ok(());
        }

        let connection = ConnectionHandler::init_clients(
            &self.config.new_control_plane_client,
            &self.config.connection_options,
        )
        .await
        .map_err(|e| Error::ConnectionHandler(Box::new(e)))?;

        let gateway = GatewayRouteController::new(
            self.config.watch_config.clone(),
            connection.clone(),
            &self.config.namespace,
        )
        .await?;
        let non_gateway = NonGatewayRouteController::new(
            self.config.watch_config.clone(),
            connection,
            self.config.k8s_client.clone(),
            &self.config.namespace,
        )
        .await?;
        if self
            .controllers
            .set(RouteControllers { gateway, non_gateway })
            .is_err()
        {
            warn!("route controllers already running, keeping the existing ones");
        }
        Ok(())
    }

    /// Resolves the interface cable traffic leaves through.
    #[tracing::instrument(parent = &self.config.span, skip_all, fields(endpoint = %endpoint.name_any()))]
    pub async fn local_endpoint_created(&self, endpoint: &Endpoint) -> Result<()> {
        let iface = if endpoint.is_wireguard() {
            self.dataplane
                .netlink
                .interface_by_name(WIREGUARD_DEVICE_NAME)
                .await
                .map_err(|source| Error::WireguardInterface {
                    name: WIREGUARD_DEVICE_NAME,
                    source,
                })?
        } else {
            self.dataplane
                .netlink
                .default_gateway_interface()
                .await
                .map_err(Error::NoDefaultInterface)?
        };
        info!("cable routing interface is {} (#{})", iface.name, iface.index);
        self.state.lock().await.cable_routing_interface = Some(iface);
        Ok(())
    }

    #[tracing::instrument(parent = &self.config.span, skip_all, fields(endpoint = %endpoint.name_any()))]
    pub async fn remote_endpoint_created(&self, endpoint: &Endpoint) -> Result<()> {
        self.upsert_remote_endpoint(endpoint).await
    }

    #[tracing::instrument(parent = &self.config.span, skip_all, fields(endpoint = %endpoint.name_any()))]
    pub async fn remote_endpoint_updated(&self, endpoint: &Endpoint) -> Result<()> {
        self.upsert_remote_endpoint(endpoint).await
    }

    #[tracing::instrument(parent = &self.config.span, skip_all, fields(endpoint = %endpoint.name_any()))]
    pub async fn remote_endpoint_removed(&self, endpoint: &Endpoint) -> Result<()> {
        let mut state = self.state.lock().await;
        let removed = state.remote_endpoints.remove(&endpoint.name_any());
        self.dataplane
            .update_host_network_dataplane(&state)
            .await
            .map_err(Error::HostNetworkDataplane)?;

        if !state.is_gateway {
            return Ok(());
        }
        let removed = removed.as_deref().unwrap_or(endpoint);
        let still_advertised = state.remote_subnets();
        for subnet in ipv4_subnets(removed) {
            if still_advertised.contains(&subnet) {
                continue;
            }
            self.dataplane
                .remove_no_masquerade(&subnet)
                .map_err(|source| Error::RemoveNoMasquerade {
                    subnet: subnet.to_string(),
                    source,
                })?;
        }
        self.update_gateway_dataplane(&state).await
    }

    /// Exempts every known remote subnet from masquerading, then programs the
    /// gateway forwarding path. A failure part way leaves the rules added so
    /// far in place and the role unchanged; retrying is safe.
    #[tracing::instrument(parent = &self.config.span, skip_all)]
    pub async fn transition_to_gateway(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        for ep in state.remote_endpoints.values() {
            for subnet in ipv4_subnets(ep) {
                self.dataplane
                    .add_no_masquerade(&subnet)
                    .map_err(|source| Error::AddNoMasquerade {
                        subnet: subnet.to_string(),
                        source,
                    })?;
            }
        }
        state.is_gateway = true;
        info!("node is now the gateway");
        self.update_gateway_dataplane(&state).await
    }

    #[tracing::instrument(parent = &self.config.span, skip_all)]
    pub async fn transition_to_non_gateway(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        for ep in state.remote_endpoints.values() {
            for subnet in ipv4_subnets(ep) {
                self.dataplane
                    .remove_no_masquerade(&subnet)
                    .map_err(|source| Error::RemoveNoMasquerade {
                        subnet: subnet.to_string(),
                        source,
                    })?;
            }
        }
        state.is_gateway = false;
        info!("node is no longer the gateway");
        self.dataplane
            .cleanup_gateway_dataplane()
            .await
            .map_err(Error::CleanupGatewayDataplane)
    }

    /// Stops background work. With `uninstall` everything the agent installed
    /// on the node is removed as well; teardown failures are only logged.
    #[tracing::instrument(parent = &self.config.span, skip_all)]
    pub async fn stop(&self, uninstall: bool) -> Result<()> {
        if !uninstall {
            return Ok(());
        }
        let report = self.uninstall().await;
        if report.is_clean() {
            info!("{}", report);
        } else {
            error!("{}", report);
        }
        Ok(())
    }

    /// Best-effort removal of the agent's node state; every step runs.
    pub async fn uninstall(&self) -> TeardownReport {
        info!("uninstalling OVN components from the node");
        self.cancel.cancel();
        if let Some(controllers) = self.controllers.get() {
            controllers.gateway.stop();
            controllers.non_gateway.stop();
        }
        let _state = self.state.lock().await;
        self.dataplane.teardown().await
    }

    async fn upsert_remote_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        if let Err(e) = overlapping_subnets(
            &self.config.service_cidr,
            &self.config.cluster_cidr,
            &endpoint.spec.subnets,
        ) {
            // retrying cannot fix a configuration conflict
            error!(%e, "ignoring remote endpoint {}", endpoint.describe());
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let previous = state
            .remote_endpoints
            .insert(endpoint.name_any(), Arc::new(endpoint.clone()));
        self.dataplane
            .update_host_network_dataplane(&state)
            .await
            .map_err(Error::HostNetworkDataplane)?;

        if !state.is_gateway {
            return Ok(());
        }
        for subnet in ipv4_subnets(endpoint) {
            self.dataplane
                .add_no_masquerade(&subnet)
                .map_err(|source| Error::AddNoMasquerade {
                    subnet: subnet.to_string(),
                    source,
                })?;
        }
        if let Some(previous) = previous {
            let advertised = state.remote_subnets();
            for subnet in ipv4_subnets(&previous) {
                if advertised.contains(&subnet) {
                    continue;
                }
                self.dataplane
                    .remove_no_masquerade(&subnet)
                    .map_err(|source| Error::RemoveNoMasquerade {
                        subnet: subnet.to_string(),
                        source,
                    })?;
            }
        }
        self.update_gateway_dataplane(&state).await
    }

    async fn update_gateway_dataplane(&self, state: &State) -> Result<()> {
        let cable = state
            .cable_routing_interface
            .as_ref()
            .ok_or(Error::CableInterfaceUnknown)?;
        self.dataplane
            .update_gateway_dataplane(state, cable)
            .await
            .map_err(Error::GatewayDataplane)
    }
}

#[async_trait]
impl route_agent_event::Handler for Handler {
    fn name(&self) -> &'static str {
        HANDLER_NAME
    }

    fn network_plugins(&self) -> &[&'static str] {
        &[OVN_KUBERNETES]
    }

    async fn init(&self) -> HandlerResult {
        Ok(Handler::init(self).await?)
    }

    async fn stop(&self, uninstall: bool) -> HandlerResult {
        Ok(Handler::stop(self, uninstall).await?)
    }

    async fn transition_to_gateway(&self) -> HandlerResult {
        Ok(Handler::transition_to_gateway(self).await?)
    }

    async fn transition_to_non_gateway(&self) -> HandlerResult {
        Ok(Handler::transition_to_non_gateway(self).await?)
    }

    async fn local_endpoint_created(&self, endpoint: &Endpoint) -> HandlerResult {
        Ok(Handler::local_endpoint_created(self, endpoint).await?)
    }

    async fn remote_endpoint_created(&self, endpoint: &Endpoint) -> HandlerResult {
        Ok(Handler::remote_endpoint_created(self, endpoint).await?)
    }

    async fn remote_endpoint_updated(&self, endpoint: &Endpoint) -> HandlerResult {
        Ok(Handler::remote_endpoint_updated(self, endpoint).await?)
    }

    async fn remote_endpoint_removed(&self, endpoint: &Endpoint) -> HandlerResult {
        Ok(Handler::remote_endpoint_removed(self, endpoint).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::Uri;
    use kube::Config;
    use route_agent_crds::v1::endpoint::BACKEND_WIREGUARD;
    use route_agent_event::{Handler as EventHandler, HandlerError};
    use route_agent_kernel::constants::{
        FILTER_TABLE, FORWARD_CHAIN, NAT_TABLE, POSTROUTING_CHAIN, SUBMARINER_FWD_CHAIN,
        SUBMARINER_POSTROUTING_CHAIN,
    };

    use super::*;
    use crate::dataplane::tests::{FakeKernel, make_remote};

    fn test_client() -> Client {
        let config = Config::new(Uri::from_static("http://localhost"));
        Client::try_from(config).expect("test client")
    }

    fn make_config() -> HandlerConfig {
        let client = test_client();
        let watch = WatchConfig {
            client: client.clone(),
            resync_period: Duration::from_secs(300),
            node_name: "node-a".into(),
        };
        HandlerConfig::new(
            "submariner-operator",
            vec!["10.0.0.0/8".into()],
            vec!["100.64.0.0/16".into()],
            watch,
            client,
        )
        .with_span(Span::none())
    }

    /// Handler over a kernel that already has the built-in and agent chains.
    fn make_handler_with(kernel: &Arc<FakeKernel>, config: HandlerConfig) -> Handler {
        for (table, parent, chain) in [
            (FILTER_TABLE, FORWARD_CHAIN, SUBMARINER_FWD_CHAIN),
            (NAT_TABLE, POSTROUTING_CHAIN, SUBMARINER_POSTROUTING_CHAIN),
        ] {
            kernel.clear_chain(table, parent).expect("parent");
            kernel.clear_chain(table, chain).expect("chain");
        }
        kernel.clear_calls();
        Handler::new(config, kernel.clone(), kernel.clone(), kernel.clone())
    }

    fn make_handler(kernel: &Arc<FakeKernel>) -> Handler {
        make_handler_with(kernel, make_config())
    }

    fn nat_rules(kernel: &FakeKernel) -> Vec<String> {
        kernel
            .chain_rules(NAT_TABLE, SUBMARINER_POSTROUTING_CHAIN)
            .unwrap_or_default()
    }

    fn nat_inserts(kernel: &FakeKernel) -> usize {
        kernel
            .calls()
            .iter()
            .filter(|c| c.starts_with("insert_unique nat/SUBMARINER-POSTROUTING"))
            .count()
    }

    #[tokio::test]
    async fn test_overlapping_endpoint_is_ignored() {
        let kernel = Arc::new(FakeKernel::new());
        let handler = make_handler(&kernel);

        handler
            .remote_endpoint_created(&make_remote("cluster-b", &["172.16.0.0/12"]))
            .await
            .expect("accepted");
        assert_eq!(handler.remote_endpoint_names().await, vec!["cluster-b"]);

        kernel.clear_calls();
        handler
            .remote_endpoint_created(&make_remote("cluster-c", &["10.1.0.0/16"]))
            .await
            .expect("overlap is not an error");
        handler
            .remote_endpoint_updated(&make_remote("cluster-d", &["100.64.0.0/24"]))
            .await
            .expect("overlap is not an error");
        assert_eq!(handler.remote_endpoint_names().await, vec!["cluster-b"]);
        assert!(kernel.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remote_endpoints_converge_regardless_of_order() {
        let b = make_remote("cluster-b", &["172.16.0.0/12"]);
        let c = make_remote("cluster-c", &["192.168.0.0/16"]);
        let mut c_updated = c.clone();
        c_updated.spec.subnets = vec!["192.168.0.0/17".into()];

        let first = Arc::new(FakeKernel::new());
        let handler = make_handler(&first);
        handler.remote_endpoint_created(&b).await.expect("b");
        handler.remote_endpoint_created(&c).await.expect("c");
        handler.remote_endpoint_updated(&c_updated).await.expect("c update");
        handler.remote_endpoint_removed(&b).await.expect("b removed");

        let second = Arc::new(FakeKernel::new());
        let other = make_handler(&second);
        other.remote_endpoint_created(&c).await.expect("c");
        other.remote_endpoint_created(&b).await.expect("b");
        other.remote_endpoint_removed(&b).await.expect("b removed");
        other.remote_endpoint_updated(&c_updated).await.expect("c update");

        assert_eq!(handler.remote_endpoint_names().await, vec!["cluster-c"]);
        assert_eq!(other.remote_endpoint_names().await, vec!["cluster-c"]);
        let mut first_rules = first.rules.lock().unwrap().clone();
        let mut second_rules = second.rules.lock().unwrap().clone();
        first_rules.sort();
        second_rules.sort();
        assert_eq!(first_rules, second_rules);
        assert_eq!(first_rules.len(), 1);
        assert_eq!(first.routes.lock().unwrap().len(), 1);
        assert_eq!(second.routes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_transitions() {
        let kernel = Arc::new(FakeKernel::new());
        let handler = make_handler(&kernel);
        handler
            .local_endpoint_created(&make_remote("local", &["10.0.0.0/16"]))
            .await
            .expect("local");
        handler
            .remote_endpoint_created(&make_remote("cluster-b", &["172.16.0.0/12"]))
            .await
            .expect("b");
        handler
            .remote_endpoint_created(&make_remote("cluster-c", &["192.168.0.0/16", "192.169.0.0/16"]))
            .await
            .expect("c");
        assert!(nat_rules(&kernel).is_empty());

        kernel.clear_calls();
        handler.transition_to_gateway().await.expect("to gateway");
        assert!(handler.is_gateway().await);
        assert_eq!(nat_inserts(&kernel), 3);
        let mut nat = nat_rules(&kernel);
        nat.sort();
        assert_eq!(
            nat,
            vec![
                "-d 172.16.0.0/12 -j ACCEPT",
                "-d 192.168.0.0/16 -j ACCEPT",
                "-d 192.169.0.0/16 -j ACCEPT",
            ]
        );
        assert_eq!(
            kernel.chain_rules(FILTER_TABLE, SUBMARINER_FWD_CHAIN).map(|r| r.len()),
            Some(2)
        );
        assert!(kernel.rules.lock().unwrap().iter().any(|r| r.table == 149));

        handler.transition_to_non_gateway().await.expect("to non-gateway");
        assert!(!handler.is_gateway().await);
        assert!(nat_rules(&kernel).is_empty());
        assert_eq!(kernel.chain_rules(FILTER_TABLE, SUBMARINER_FWD_CHAIN), Some(vec![]));
        let tables: Vec<u32> = kernel.rules.lock().unwrap().iter().map(|r| r.table).collect();
        assert_eq!(tables, vec![150, 150, 150]);
    }

    #[tokio::test]
    async fn test_failed_transition_keeps_role() {
        let kernel = Arc::new(FakeKernel::new());
        let handler = make_handler(&kernel);
        handler
            .remote_endpoint_created(&make_remote("cluster-b", &["172.16.0.0/12"]))
            .await
            .expect("b");

        kernel.fail("insert_unique nat/");
        let err = handler.transition_to_gateway().await.expect_err("nat failure");
        assert!(matches!(err, Error::AddNoMasquerade { .. }));
        assert!(!handler.is_gateway().await);
        assert!(!HandlerError::from(err).is_fatal());
    }

    #[tokio::test]
    async fn test_transition_without_cable_interface() {
        let kernel = Arc::new(FakeKernel::new());
        let handler = make_handler(&kernel);
        handler
            .remote_endpoint_created(&make_remote("cluster-b", &["172.16.0.0/12"]))
            .await
            .expect("b");

        let err = handler.transition_to_gateway().await.expect_err("no cable");
        assert!(matches!(err, Error::CableInterfaceUnknown));
        // exemptions are in place, the gateway routes follow on retry
        assert!(handler.is_gateway().await);
        assert_eq!(nat_rules(&kernel), vec!["-d 172.16.0.0/12 -j ACCEPT"]);
    }

    #[tokio::test]
    async fn test_gateway_tracks_endpoint_changes() {
        let kernel = Arc::new(FakeKernel::new());
        let handler = make_handler(&kernel);
        handler
            .local_endpoint_created(&make_remote("local", &["10.0.0.0/16"]))
            .await
            .expect("local");
        handler.transition_to_gateway().await.expect("to gateway");

        let b = make_remote("cluster-b", &["172.16.0.0/12"]);
        handler.remote_endpoint_created(&b).await.expect("b");
        assert_eq!(nat_rules(&kernel), vec!["-d 172.16.0.0/12 -j ACCEPT"]);

        let mut b_updated = b.clone();
        b_updated.spec.subnets = vec!["172.20.0.0/16".into()];
        handler.remote_endpoint_updated(&b_updated).await.expect("b update");
        assert_eq!(nat_rules(&kernel), vec!["-d 172.20.0.0/16 -j ACCEPT"]);

        // a subnet still advertised by another endpoint keeps its exemption
        let c = make_remote("cluster-c", &["172.20.0.0/16"]);
        handler.remote_endpoint_created(&c).await.expect("c");
        handler.remote_endpoint_removed(&b_updated).await.expect("b removed");
        assert_eq!(nat_rules(&kernel), vec!["-d 172.20.0.0/16 -j ACCEPT"]);

        handler.remote_endpoint_removed(&c).await.expect("c removed");
        assert!(nat_rules(&kernel).is_empty());
        assert!(kernel.routes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_failures_are_retryable() {
        let kernel = Arc::new(FakeKernel::new());
        let handler = make_handler(&kernel);
        handler
            .local_endpoint_created(&make_remote("local", &["10.0.0.0/16"]))
            .await
            .expect("local");
        handler.transition_to_gateway().await.expect("to gateway");
        let b = make_remote("cluster-b", &["172.16.0.0/12"]);

        kernel.fail("rule_add");
        let err = handler.remote_endpoint_created(&b).await.expect_err("host reconcile");
        assert!(matches!(err, Error::HostNetworkDataplane(_)));
        assert!(!HandlerError::from(err).is_fatal());
        kernel.failing.lock().unwrap().clear();
        handler.remote_endpoint_created(&b).await.expect("retry");

        let mut b_updated = b.clone();
        b_updated.spec.subnets = vec!["172.20.0.0/16".into()];
        kernel.fail("route_list 149");
        let err = handler
            .remote_endpoint_updated(&b_updated)
            .await
            .expect_err("gateway reconcile");
        assert!(matches!(err, Error::GatewayDataplane(_)));
        assert!(!HandlerError::from(err).is_fatal());
        kernel.failing.lock().unwrap().clear();
        handler.remote_endpoint_updated(&b_updated).await.expect("retry");
        let gateway_routes: Vec<String> = kernel
            .routes
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.table == 149)
            .map(|r| r.destination.to_string())
            .collect();
        assert_eq!(gateway_routes, vec!["172.20.0.0/16"]);

        kernel.fail("rule_del");
        let err = handler
            .remote_endpoint_removed(&b_updated)
            .await
            .expect_err("host reconcile");
        assert!(matches!(err, Error::HostNetworkDataplane(_)));
        kernel.failing.lock().unwrap().clear();
        handler.remote_endpoint_removed(&b_updated).await.expect("retry");
        assert!(handler.remote_endpoint_names().await.is_empty());
        assert!(kernel.rules.lock().unwrap().iter().all(|r| r.table != 150));
        assert!(kernel.routes.lock().unwrap().is_empty());
        assert!(nat_rules(&kernel).is_empty());
    }

    #[tokio::test]
    async fn test_local_endpoint_interface() {
        let kernel = Arc::new(FakeKernel::new());
        let handler = make_handler(&kernel);
        handler
            .local_endpoint_created(&make_remote("local", &["10.0.0.0/16"]))
            .await
            .expect("default route interface");
        assert!(kernel.calls().contains(&"default_gateway_interface".to_string()));

        let mut wireguard = make_remote("local", &["10.0.0.0/16"]);
        wireguard.spec.backend = BACKEND_WIREGUARD.into();
        kernel.clear_calls();
        handler.local_endpoint_created(&wireguard).await.expect("wireguard interface");
        assert_eq!(kernel.calls(), vec!["interface_by_name submariner"]);
    }

    #[tokio::test]
    async fn test_local_endpoint_errors() {
        let kernel = Arc::new(FakeKernel {
            default_interface: None,
            interfaces: Vec::new(),
            ..FakeKernel::new()
        });
        let handler = make_handler(&kernel);

        let err = handler
            .local_endpoint_created(&make_remote("local", &["10.0.0.0/16"]))
            .await
            .expect_err("no default route");
        assert!(matches!(err, Error::NoDefaultInterface(_)));
        assert!(HandlerError::from(err).is_fatal());

        let mut wireguard = make_remote("local", &["10.0.0.0/16"]);
        wireguard.spec.backend = BACKEND_WIREGUARD.into();
        let err = handler
            .local_endpoint_created(&wireguard)
            .await
            .expect_err("no wireguard device");
        assert!(matches!(err, Error::WireguardInterface { .. }));
        assert!(!HandlerError::from(err).is_fatal());
    }

    #[tokio::test]
    async fn test_init_fails_without_control_plane() {
        let kernel = Arc::new(FakeKernel::new());
        let failing: NewControlPlaneClientFn =
            Arc::new(|_, options| Err(Error::InvalidEndpoint(options.endpoint.clone())));
        let handler = make_handler_with(&kernel, make_config().with_control_plane_client(failing));

        let err = handler.init().await.expect_err("control plane unavailable");
        assert!(matches!(err, Error::ConnectionHandler(_)));

        // chains are hooked in before the control plane is contacted
        assert_eq!(
            kernel.chain_rules(FILTER_TABLE, FORWARD_CHAIN),
            Some(vec!["-j SUBMARINER-FWD".to_string()])
        );
        assert_eq!(
            kernel.chain_rules(NAT_TABLE, POSTROUTING_CHAIN),
            Some(vec!["-j SUBMARINER-POSTROUTING".to_string()])
        );
        handler.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_init_starts_one_syncer() {
        let kernel = Arc::new(FakeKernel::new());
        let failing: NewControlPlaneClientFn =
            Arc::new(|_, options| Err(Error::InvalidEndpoint(options.endpoint.clone())));
        let handler = make_handler_with(&kernel, make_config().with_control_plane_client(failing));

        handler.init().await.expect_err("control plane unavailable");
        handler.init().await.expect_err("control plane unavailable");
        kernel.clear_calls();

        tokio::time::sleep(crate::syncer::ROUTE_CONFIG_SYNC_INTERVAL + Duration::from_secs(1)).await;
        let host_syncs = kernel
            .calls()
            .iter()
            .filter(|c| c.as_str() == "route_list 150")
            .count();
        assert_eq!(host_syncs, 1);
        handler.cancel.cancel();
    }

    #[tokio::test]
    async fn test_stop_and_uninstall() {
        let kernel = Arc::new(FakeKernel::new());
        let handler = make_handler(&kernel);
        handler
            .remote_endpoint_created(&make_remote("cluster-b", &["172.16.0.0/12"]))
            .await
            .expect("b");

        kernel.clear_calls();
        EventHandler::stop(&handler, false).await.expect("stop");
        assert!(kernel.calls().is_empty());

        EventHandler::stop(&handler, true).await.expect("uninstall");
        assert!(kernel.rules.lock().unwrap().is_empty());
        assert!(kernel.routes.lock().unwrap().is_empty());
        assert_eq!(kernel.chain_rules(FILTER_TABLE, SUBMARINER_FWD_CHAIN), None);
        assert_eq!(kernel.chain_rules(NAT_TABLE, SUBMARINER_POSTROUTING_CHAIN), None);

        // a second pass reports what could not be removed and still succeeds
        kernel.fail("del_bridge");
        let report = handler.uninstall().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, "deleting bridge br-submariner");
        EventHandler::stop(&handler, true).await.expect("stop never fails");
    }

    #[tokio::test]
    async fn test_event_handler_identity() {
        let kernel = Arc::new(FakeKernel::new());
        let handler = make_handler(&kernel);
        assert_eq!(EventHandler::name(&handler), "ovn-hostroutes-handler");
        assert_eq!(EventHandler::network_plugins(&handler), &[OVN_KUBERNETES]);
    }
}
