pub mod constants;
mod iptables;
mod netlink;
mod vsctl;

use thiserror::Error;

pub use iptables::{IpTables, PacketFilter};
pub use netlink::{Family, Interface, NetLink, RtNetlink, Route, Rule};
pub use vsctl::{OvsBridge, Vsctl};

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("netlink error: {0}")]
    Netlink(#[from] rtnetlink::Error),

    #[error("failed to initialize iptables: {0}")]
    PacketFilterUnavailable(String),

    #[error("iptables {op} on {table}/{chain} failed: {reason}")]
    Iptables {
        op: &'static str,
        table: String,
        chain: String,
        reason: String,
    },

    #[error("interface {0} not found")]
    InterfaceNotFound(String),

    #[error("no default route found on host")]
    NoDefaultRoute,

    #[error("ovs-vsctl {args} failed: {stderr}")]
    Vsctl { args: String, stderr: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
