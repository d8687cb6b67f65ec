use route_agent_kernel::PacketFilter;
use route_agent_kernel::constants::{
    FILTER_TABLE, FORWARD_CHAIN, INPUT_CHAIN, LEGACY_INPUT_CHAIN, NAT_TABLE, POSTROUTING_CHAIN,
    SUBMARINER_FWD_CHAIN, SUBMARINER_POSTROUTING_CHAIN,
};
use tracing::{debug, warn};

type KernelResult<T> = route_agent_kernel::Result<T>;

/// Agent chains and the built-in chain that jumps into each of them.
pub(crate) const AGENT_CHAINS: [(&str, &str, &str); 2] = [
    (FILTER_TABLE, FORWARD_CHAIN, SUBMARINER_FWD_CHAIN),
    (NAT_TABLE, POSTROUTING_CHAIN, SUBMARINER_POSTROUTING_CHAIN),
];

fn jump(chain: &str) -> String {
    format!("-j {chain}")
}

fn ensure_chain(ipt: &dyn PacketFilter, table: &str, chain: &str) -> KernelResult<()> {
    if !ipt.chain_exists(table, chain)? {
        ipt.new_chain(table, chain)?;
    }
    Ok(())
}

/// Creates the agent chains and hooks them in first in their parent chains.
pub(crate) fn init_iptables_chains(ipt: &dyn PacketFilter) -> KernelResult<()> {
    for (table, parent, chain) in AGENT_CHAINS {
        debug!("installing {}/{} jump from {}", table, chain, parent);
        ensure_chain(ipt, table, chain)?;
        ipt.insert_unique(table, parent, &jump(chain), 1)?;
    }
    Ok(())
}

/// Removes the input chain older agents installed. Best effort.
pub(crate) fn legacy_cleanup(ipt: &dyn PacketFilter) {
    let exists = match ipt.chain_exists(FILTER_TABLE, LEGACY_INPUT_CHAIN) {
        Ok(exists) => exists,
        Err(e) => {
            warn!(%e, "unable to check for legacy chain {}", LEGACY_INPUT_CHAIN);
            return;
        }
    };
    if !exists {
        return;
    }
    if let Err(e) = flush_and_delete_chain(ipt, FILTER_TABLE, INPUT_CHAIN, LEGACY_INPUT_CHAIN) {
        warn!(%e, "failed to remove legacy chain {}", LEGACY_INPUT_CHAIN);
    }
}

/// Flushes `chain`, removes the jump to it from `parent` and deletes it.
/// Stops at the first failing step.
pub(crate) fn flush_and_delete_chain(
    ipt: &dyn PacketFilter,
    table: &str,
    parent: &str,
    chain: &str,
) -> KernelResult<()> {
    ipt.clear_chain(table, chain)?;
    let rule = jump(chain);
    if ipt.exists(table, parent, &rule)? {
        ipt.delete(table, parent, &rule)?;
    }
    ipt.delete_chain(table, chain)
}
