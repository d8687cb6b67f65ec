use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use ipnetwork::Ipv4Network;
use route_agent_crds::v1::endpoint::Endpoint;
use route_agent_kernel::constants::{
    FILTER_TABLE, HOST_NETWORK_RULE_PRIORITY, HOST_NETWORK_TABLE_ID, INTER_CLUSTER_NETWORK_TABLE_ID,
    INTER_CLUSTER_RULE_PRIORITY, NAT_TABLE, OVN_SUBMARINER_INTERFACE, SUBMARINER_FWD_CHAIN,
    SUBMARINER_POSTROUTING_CHAIN, SUBMARINER_UPSTREAM_IP,
};
use route_agent_kernel::{Family, Interface, NetLink, OvsBridge, PacketFilter, Route, Rule};
use tracing::{debug, info};

use crate::cidr::ipv4_subnets;

type KernelResult<T> = route_agent_kernel::Result<T>;

/// Everything the handler knows about the cluster set, guarded by a single lock.
#[derive(Debug)]
pub(crate) struct State {
    pub remote_endpoints: HashMap<String, Arc<Endpoint>>,
    pub is_gateway: bool,
    /// Interface carrying tunnel traffic; known once the local endpoint is processed.
    pub cable_routing_interface: Option<Interface>,
}

impl State {
    pub(crate) fn new() -> Self {
        Self {
            remote_endpoints: HashMap::new(),
            is_gateway: false,
            cable_routing_interface: None,
        }
    }

    /// Union of the IPv4 subnets of all remote endpoints.
    pub(crate) fn remote_subnets(&self) -> BTreeSet<Ipv4Network> {
        self.remote_endpoints
            .values()
            .flat_map(|ep| ipv4_subnets(ep))
            .collect()
    }
}

/// Kernel facing side of the handler.
pub(crate) struct Dataplane {
    pub netlink: Arc<dyn NetLink>,
    pub ipt: Arc<dyn PacketFilter>,
    pub ovs: Arc<dyn OvsBridge>,
}

fn no_masquerade_rule(subnet: &Ipv4Network) -> String {
    format!("-d {subnet} -j ACCEPT")
}

fn forward_rules(cable: &Interface) -> [String; 2] {
    [
        format!("-i {} -o {} -j ACCEPT", OVN_SUBMARINER_INTERFACE, cable.name),
        format!("-i {} -o {} -j ACCEPT", cable.name, OVN_SUBMARINER_INTERFACE),
    ]
}

impl Dataplane {
    /// Makes table 150 and its lookup rules match the remote subnets: one
    /// `to <subnet>` rule and one route via the OVN submariner router per subnet.
    pub(crate) async fn update_host_network_dataplane(&self, state: &State) -> KernelResult<()> {
        let subnets = state.remote_subnets();

        let desired_rules: BTreeSet<Rule> = subnets
            .iter()
            .map(|subnet| {
                Rule::to_table(HOST_NETWORK_TABLE_ID)
                    .with_priority(HOST_NETWORK_RULE_PRIORITY)
                    .with_destination(*subnet)
            })
            .collect();
        let current_rules = self.rules_in_table(HOST_NETWORK_TABLE_ID).await?;
        self.sync_rules(&current_rules, &desired_rules).await?;

        let desired_routes: BTreeSet<Route> = if subnets.is_empty() {
            BTreeSet::new()
        } else {
            let iface = self.netlink.interface_by_name(OVN_SUBMARINER_INTERFACE).await?;
            subnets
                .iter()
                .map(|subnet| Route {
                    table: HOST_NETWORK_TABLE_ID,
                    destination: *subnet,
                    gateway: Some(SUBMARINER_UPSTREAM_IP),
                    oif: iface.index,
                })
                .collect()
        };
        self.sync_routes(HOST_NETWORK_TABLE_ID, &desired_routes).await
    }

    /// Programs the gateway forwarding path towards `cable`: traffic entering from
    /// OVN looks up table 149, which routes every remote subnet out of the cable
    /// interface, and forwarding between the two interfaces is accepted.
    pub(crate) async fn update_gateway_dataplane(&self, state: &State, cable: &Interface) -> KernelResult<()> {
        let desired_rules = BTreeSet::from([Rule::to_table(INTER_CLUSTER_NETWORK_TABLE_ID)
            .with_priority(INTER_CLUSTER_RULE_PRIORITY)
            .with_iif(OVN_SUBMARINER_INTERFACE)]);
        let current_rules = self.rules_in_table(INTER_CLUSTER_NETWORK_TABLE_ID).await?;
        self.sync_rules(&current_rules, &desired_rules).await?;

        let desired_routes: BTreeSet<Route> = state
            .remote_subnets()
            .iter()
            .map(|subnet| Route {
                table: INTER_CLUSTER_NETWORK_TABLE_ID,
                destination: *subnet,
                gateway: None,
                oif: cable.index,
            })
            .collect();
        self.sync_routes(INTER_CLUSTER_NETWORK_TABLE_ID, &desired_routes).await?;

        for rule in forward_rules(cable) {
            self.ipt.append_unique(FILTER_TABLE, SUBMARINER_FWD_CHAIN, &rule)?;
        }
        Ok(())
    }

    pub(crate) async fn cleanup_gateway_dataplane(&self) -> KernelResult<()> {
        for rule in self.rules_in_table(INTER_CLUSTER_NETWORK_TABLE_ID).await? {
            self.netlink.rule_del(&rule).await?;
        }
        self.netlink.flush_route_table(INTER_CLUSTER_NETWORK_TABLE_ID).await?;
        self.ipt.clear_chain(FILTER_TABLE, SUBMARINER_FWD_CHAIN)
    }

    /// Exempts traffic towards `subnet` from masquerading.
    pub(crate) fn add_no_masquerade(&self, subnet: &Ipv4Network) -> KernelResult<()> {
        self.ipt.insert_unique(
            NAT_TABLE,
            SUBMARINER_POSTROUTING_CHAIN,
            &no_masquerade_rule(subnet),
            1,
        )
    }

    pub(crate) fn remove_no_masquerade(&self, subnet: &Ipv4Network) -> KernelResult<()> {
        let rule = no_masquerade_rule(subnet);
        if self.ipt.exists(NAT_TABLE, SUBMARINER_POSTROUTING_CHAIN, &rule)? {
            self.ipt.delete(NAT_TABLE, SUBMARINER_POSTROUTING_CHAIN, &rule)?;
        }
        Ok(())
    }

    async fn rules_in_table(&self, table: u32) -> KernelResult<BTreeSet<Rule>> {
        Ok(self
            .netlink
            .rule_list(Family::V4)
            .await?
            .into_iter()
            .filter(|rule| rule.table == table)
            .collect())
    }

    async fn sync_rules(&self, current: &BTreeSet<Rule>, desired: &BTreeSet<Rule>) -> KernelResult<()> {
        for rule in current.difference(desired) {
            info!("deleting stale rule {}", rule);
            self.netlink.rule_del(rule).await?;
        }
        for rule in desired.difference(current) {
            info!("adding rule {}", rule);
            self.netlink.rule_add(rule).await?;
        }
        Ok(())
    }

    async fn sync_routes(&self, table: u32, desired: &BTreeSet<Route>) -> KernelResult<()> {
        let current: BTreeSet<Route> = self.netlink.route_list(table).await?.into_iter().collect();
        for route in current.difference(desired) {
            info!("deleting stale route {}", route);
            self.netlink.route_del(route).await?;
        }
        for route in desired.difference(&current) {
            info!("adding route {}", route);
            self.netlink.route_add(route).await?;
        }
        debug!(table, routes = desired.len(), "route table in sync");
        Ok(())
    }
}
