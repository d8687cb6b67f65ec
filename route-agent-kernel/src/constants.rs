use std::net::Ipv4Addr;

/// Route table holding the gateway's routes towards remote clusters.
pub const INTER_CLUSTER_NETWORK_TABLE_ID: u32 = 149;

/// Route table steering host-network traffic for remote subnets into OVN.
pub const HOST_NETWORK_TABLE_ID: u32 = 150;

pub const INTER_CLUSTER_RULE_PRIORITY: u32 = 149;
pub const HOST_NETWORK_RULE_PRIORITY: u32 = 150;

pub const FILTER_TABLE: &str = "filter";
pub const NAT_TABLE: &str = "nat";

pub const INPUT_CHAIN: &str = "INPUT";
pub const FORWARD_CHAIN: &str = "FORWARD";
pub const POSTROUTING_CHAIN: &str = "POSTROUTING";

pub const SUBMARINER_FWD_CHAIN: &str = "SUBMARINER-FWD";
pub const SUBMARINER_POSTROUTING_CHAIN: &str = "SUBMARINER-POSTROUTING";

/// Installed by older route agents, removed during init.
pub const LEGACY_INPUT_CHAIN: &str = "SUBMARINER-INPUT";

pub const OVN_SUBMARINER_BRIDGE: &str = "br-submariner";
pub const OVN_SUBMARINER_INTERFACE: &str = "ovn-k8s-sub0";

/// Address of the submariner router port on the OVN side of `ovn-k8s-sub0`.
pub const SUBMARINER_UPSTREAM_IP: Ipv4Addr = Ipv4Addr::new(169, 254, 34, 1);

pub const WIREGUARD_DEVICE_NAME: &str = "submariner";
