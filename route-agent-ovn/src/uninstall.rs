use std::fmt;

use route_agent_kernel::Family;
use route_agent_kernel::constants::{
    HOST_NETWORK_TABLE_ID, INTER_CLUSTER_NETWORK_TABLE_ID, OVN_SUBMARINER_BRIDGE, OVN_SUBMARINER_INTERFACE,
};
use tracing::{error, info};

use crate::chains::AGENT_CHAINS;
use crate::dataplane::Dataplane;

type KernelError = route_agent_kernel::Error;

#[derive(Debug)]
pub struct TeardownFailure {
    pub step: String,
    pub error: KernelError,
}

/// Failures collected while tearing down; teardown itself never stops early.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, step: impl Into<String>, result: route_agent_kernel::Result<()>) {
        let step = step.into();
        match result {
            Ok(()) => info!("{} done", step),
            Err(error) => {
                error!(%error, "{} failed", step);
                self.failures.push(TeardownFailure { step, error });
            }
        }
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "teardown completed");
        }
        write!(f, "teardown completed with {} failures:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, " [{}: {}]", failure.step, failure.error)?;
        }
        Ok(())
    }
}

impl Dataplane {
    /// Removes everything the agent installed on the node: the OVS bridge,
    /// policy rules and route tables, then the iptables chains.
    pub(crate) async fn teardown(&self) -> TeardownReport {
        let mut report = TeardownReport::default();

        report.record(
            format!("deleting port {OVN_SUBMARINER_INTERFACE}"),
            self.ovs
                .del_internal_port(OVN_SUBMARINER_BRIDGE, OVN_SUBMARINER_INTERFACE)
                .await,
        );
        report.record(
            format!("deleting bridge {OVN_SUBMARINER_BRIDGE}"),
            self.ovs.del_bridge(OVN_SUBMARINER_BRIDGE).await,
        );

        self.cleanup_rules(&mut report).await;

        for table in [INTER_CLUSTER_NETWORK_TABLE_ID, HOST_NETWORK_TABLE_ID] {
            report.record(
                format!("flushing route table {table}"),
                self.netlink.flush_route_table(table).await,
            );
        }

        for (table, parent, chain) in AGENT_CHAINS {
            report.record(
                format!("flushing chain {table}/{chain}"),
                self.ipt.clear_chain(table, chain),
            );
            report.record(
                format!("deleting jump to {chain} from {table}/{parent}"),
                self.ipt.delete(table, parent, &format!("-j {chain}")),
            );
            report.record(
                format!("deleting chain {table}/{chain}"),
                self.ipt.delete_chain(table, chain),
            );
        }

        report
    }

    async fn cleanup_rules(&self, report: &mut TeardownReport) {
        let rules = match self.netlink.rule_list(Family::V4).await {
            Ok(rules) => rules,
            Err(e) => {
                report.record("listing rules", Err(e));
                return;
            }
        };
        let owned = rules
            .iter()
            .filter(|rule| rule.table == INTER_CLUSTER_NETWORK_TABLE_ID || rule.table == HOST_NETWORK_TABLE_ID);
        for rule in owned {
            report.record(format!("deleting rule {rule}"), self.netlink.rule_del(rule).await);
        }
    }
}
