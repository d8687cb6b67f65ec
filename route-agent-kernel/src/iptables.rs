use crate::{Error, Result};

/// Chain and rule management keyed by table and chain name. Rules are
/// iptables rule specs such as `-d 10.1.0.0/16 -j ACCEPT`.
pub trait PacketFilter: Send + Sync {
    fn new_chain(&self, table: &str, chain: &str) -> Result<()>;
    fn chain_exists(&self, table: &str, chain: &str) -> Result<bool>;
    /// Creates the chain if missing, flushes it otherwise.
    fn clear_chain(&self, table: &str, chain: &str) -> Result<()>;
    fn delete_chain(&self, table: &str, chain: &str) -> Result<()>;
    fn exists(&self, table: &str, chain: &str, rule: &str) -> Result<bool>;
    fn insert_unique(&self, table: &str, chain: &str, rule: &str, position: i32) -> Result<()>;
    fn append_unique(&self, table: &str, chain: &str, rule: &str) -> Result<()>;
    fn delete(&self, table: &str, chain: &str, rule: &str) -> Result<()>;
}

pub struct IpTables {
    ipt: iptables::IPTables,
}

impl IpTables {
    pub fn try_new() -> Result<Self> {
        let ipt = iptables::new(false).map_err(|e| Error::PacketFilterUnavailable(e.to_string()))?;
        Ok(Self { ipt })
    }
}

fn op_error(op: &'static str, table: &str, chain: &str) -> impl FnOnce(Box<dyn std::error::Error>) -> Error {
    let table = table.to_string();
    let chain = chain.to_string();
    move |e| Error::Iptables {
        op,
        table,
        chain,
        reason: e.to_string(),
    }
}

impl PacketFilter for IpTables {
    fn new_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.ipt
            .new_chain(table, chain)
            .map_err(op_error("new-chain", table, chain))
    }

    fn chain_exists(&self, table: &str, chain: &str) -> Result<bool> {
        self.ipt
            .chain_exists(table, chain)
            .map_err(op_error("chain-exists", table, chain))
    }

    fn clear_chain(&self, table: &str, chain: &str) -> Result<()> {
        if self.chain_exists(table, chain)? {
            self.ipt
                .flush_chain(table, chain)
                .map_err(op_error("flush-chain", table, chain))
        } else {
            self.new_chain(table, chain)
        }
    }

    fn delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.ipt
            .delete_chain(table, chain)
            .map_err(op_error("delete-chain", table, chain))
    }

    fn exists(&self, table: &str, chain: &str, rule: &str) -> Result<bool> {
        self.ipt
            .exists(table, chain, rule)
            .map_err(op_error("exists", table, chain))
    }

    fn insert_unique(&self, table: &str, chain: &str, rule: &str, position: i32) -> Result<()> {
        if self.exists(table, chain, rule)? {
            return Ok(());
        }
        self.ipt
            .insert(table, chain, rule, position)
            .map_err(op_error("insert", table, chain))
    }

    fn append_unique(&self, table: &str, chain: &str, rule: &str) -> Result<()> {
        if self.exists(table, chain, rule)? {
            return Ok(());
        }
        self.ipt
            .append(table, chain, rule)
            .map_err(op_error("append", table, chain))
    }

    fn delete(&self, table: &str, chain: &str, rule: &str) -> Result<()> {
        self.ipt
            .delete(table, chain, rule)
            .map_err(op_error("delete", table, chain))
    }
}
