use std::time::Duration;

use clap::{Parser, Subcommand};
use route_agent_ovn::{ConnectionOptions, OVN_KUBERNETES};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    /// Run the route agent on this node
    Controller(ControllerArgs),

    /// Remove everything the agent installed on this node and exit
    Uninstall(ControllerArgs),

    /// Print the custom resource definitions
    CrdGen,
}

#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Name of the node the agent is running on
    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    /// Namespace holding endpoints and route resources
    #[arg(long, env = "SUBMARINER_NAMESPACE")]
    pub namespace: String,

    /// ID of the local cluster within the cluster set
    #[arg(long, env = "SUBMARINER_CLUSTERID")]
    pub cluster_id: String,

    /// Pod CIDRs of the local cluster
    #[arg(long, env = "SUBMARINER_CLUSTERCIDR", value_delimiter = ',')]
    pub cluster_cidr: Vec<String>,

    /// Service CIDRs of the local cluster
    #[arg(long, env = "SUBMARINER_SERVICECIDR", value_delimiter = ',')]
    pub service_cidr: Vec<String>,

    /// Network plugin of the local cluster, selects the handlers to run
    #[arg(long, env = "SUBMARINER_NETWORKPLUGIN", default_value = OVN_KUBERNETES)]
    pub network_plugin: String,

    /// OVN northbound database, `unix:<path>` or `tcp:<host>:<port>`
    #[arg(long, env = "OVN_NB_DB", default_value = "unix:/var/run/ovn/ovnnb_db.sock")]
    pub ovn_nb_db: String,

    /// Full resync period of the route controllers
    #[arg(long, default_value_t = 300)]
    pub resync_period_secs: u64,
}

impl ControllerArgs {
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            endpoint: self.ovn_nb_db.clone(),
            ..Default::default()
        }
    }
}
