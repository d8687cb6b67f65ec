mod chains;
mod cidr;
mod connection;
pub mod controllers;
mod dataplane;
mod error;
mod handler;
mod ovsdb;
mod syncer;
mod uninstall;

pub use cidr::overlapping_subnets;
pub use connection::{
    ConnectionHandler, ConnectionOptions, ControlPlaneClient, DatabaseModel,
    NewControlPlaneClientFn, OVN_NORTHBOUND, StaticRoute, StoredRoute, new_ovsdb_client,
};
pub use error::Error;
pub use handler::{Handler, HandlerConfig};
pub use ovsdb::OvsdbClient;
pub use uninstall::{TeardownFailure, TeardownReport};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Network plugin served by this handler.
pub const OVN_KUBERNETES: &str = "OVNKubernetes";
