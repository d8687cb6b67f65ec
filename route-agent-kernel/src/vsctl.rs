use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

const OVS_VSCTL: &str = "ovs-vsctl";

#[async_trait]
pub trait OvsBridge: Send + Sync {
    async fn del_internal_port(&self, bridge: &str, port: &str) -> Result<()>;
    async fn del_bridge(&self, bridge: &str) -> Result<()>;
}

/// Drives Open vSwitch through the `ovs-vsctl` binary.
#[derive(Default, Clone)]
pub struct Vsctl;

impl Vsctl {
    async fn run(&self, args: &[&str]) -> Result<()> {
        debug!("running {} {}", OVS_VSCTL, args.join(" "));
        let output = Command::new(OVS_VSCTL).args(args).output().await?;
        if output.status.success() {
            return Ok(());
        }
        Err(Error::Vsctl {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl OvsBridge for Vsctl {
    async fn del_internal_port(&self, bridge: &str, port: &str) -> Result<()> {
        self.run(&["--if-exists", "del-port", bridge, port]).await
    }

    async fn del_bridge(&self, bridge: &str) -> Result<()> {
        self.run(&["--if-exists", "del-br", bridge]).await
    }
}
