use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use futures::TryStreamExt;
use ipnetwork::Ipv4Network;
use netlink_packet_route::link::LinkAttribute;
use netlink_packet_route::route::{RouteAddress, RouteAttribute, RouteMessage};
use netlink_packet_route::rule::{RuleAttribute, RuleMessage};
use rtnetlink::{Handle, IpVersion};
use tracing::{debug, warn};

use crate::{Error, Result};

const MAIN_TABLE_ID: u32 = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl From<Family> for IpVersion {
    fn from(family: Family) -> Self {
        match family {
            Family::V4 => IpVersion::V4,
            Family::V6 => IpVersion::V6,
        }
    }
}

/// IPv4 policy-routing rule. Only the selectors the agent programs are modelled.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rule {
    pub table: u32,
    pub priority: Option<u32>,
    pub destination: Option<Ipv4Network>,
    pub iif: Option<String>,
}

impl Rule {
    pub fn to_table(table: u32) -> Self {
        Self {
            table,
            priority: None,
            destination: None,
            iif: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_destination(mut self, destination: Ipv4Network) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_iif(mut self, iif: impl Into<String>) -> Self {
        self.iif = Some(iif.into());
        self
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(priority) = self.priority {
            write!(f, "{priority}: ")?;
        }
        if let Some(iif) = &self.iif {
            write!(f, "iif {iif} ")?;
        }
        match &self.destination {
            Some(dst) => write!(f, "to {dst} ")?,
            None => write!(f, "from all ")?,
        }
        write!(f, "lookup {}", self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route {
    pub table: u32,
    pub destination: Ipv4Network,
    pub gateway: Option<Ipv4Addr>,
    pub oif: u32,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(gw) = self.gateway {
            write!(f, " via {gw}")?;
        }
        write!(f, " dev #{} table {}", self.oif, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub index: u32,
    pub name: String,
}

/// Policy-routing rules, route tables and link lookups.
#[async_trait]
pub trait NetLink: Send + Sync {
    async fn rule_list(&self, family: Family) -> Result<Vec<Rule>>;
    async fn rule_add(&self, rule: &Rule) -> Result<()>;
    async fn rule_del(&self, rule: &Rule) -> Result<()>;
    async fn route_list(&self, table: u32) -> Result<Vec<Route>>;
    async fn route_add(&self, route: &Route) -> Result<()>;
    async fn route_del(&self, route: &Route) -> Result<()>;
    async fn flush_route_table(&self, table: u32) -> Result<()>;
    async fn interface_by_name(&self, name: &str) -> Result<Interface>;
    async fn default_gateway_interface(&self) -> Result<Interface>;
}

pub struct RtNetlink {
    handle: Handle,
}

impl RtNetlink {
    /// Opens a netlink socket; the connection task is spawned on the current runtime.
    pub fn try_new() -> Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    async fn rule_messages(&self, family: Family) -> Result<Vec<RuleMessage>> {
        let mut stream = self.handle.rule().get(family.into()).execute();
        let mut rules = Vec::new();
        while let Some(msg) = stream.try_next().await? {
            rules.push(msg);
        }
        Ok(rules)
    }

    async fn route_messages(&self, table: u32) -> Result<Vec<RouteMessage>> {
        let mut stream = self.handle.route().get(IpVersion::V4).execute();
        let mut routes = Vec::new();
        while let Some(msg) = stream.try_next().await? {
            if route_table(&msg) == table {
                routes.push(msg);
            }
        }
        Ok(routes)
    }

    async fn link_name(&self, index: u32) -> Result<String> {
        let mut links = self.handle.link().get().match_index(index).execute();
        if let Some(link) = links.try_next().await? {
            for attr in link.attributes {
                if let LinkAttribute::IfName(name) = attr {
                    return Ok(name);
                }
            }
        }
        Err(Error::InterfaceNotFound(format!("#{index}")))
    }
}

#[async_trait]
impl NetLink for RtNetlink {
    async fn rule_list(&self, family: Family) -> Result<Vec<Rule>> {
        Ok(self
            .rule_messages(family)
            .await?
            .iter()
            .map(rule_from_message)
            .collect())
    }

    async fn rule_add(&self, rule: &Rule) -> Result<()> {
        let mut request = self.handle.rule().add().v4().table_id(rule.table);
        if let Some(priority) = rule.priority {
            request = request.priority(priority);
        }
        if let Some(dst) = rule.destination {
            request = request.destination_prefix(dst.network(), dst.prefix());
        }
        if let Some(iif) = &rule.iif {
            request = request.input_interface(iif.clone());
        }
        match request.execute().await {
            Err(rtnetlink::Error::NetlinkError(e)) if e.raw_code() == -libc::EEXIST => {
                debug!(%rule, "rule already exists");
                Ok(())
            }
            res => res.map_err(Error::from),
        }
    }

    async fn rule_del(&self, rule: &Rule) -> Result<()> {
        for msg in self.rule_messages(Family::V4).await? {
            if rule_from_message(&msg) != *rule {
                continue;
            }
            match self.handle.rule().del(msg).execute().await {
                Err(rtnetlink::Error::NetlinkError(e)) if e.raw_code() == -libc::ENOENT => {}
                res => res?,
            }
        }
        Ok(())
    }

    async fn route_list(&self, table: u32) -> Result<Vec<Route>> {
        Ok(self
            .route_messages(table)
            .await?
            .iter()
            .filter_map(route_from_message)
            .collect())
    }

    async fn route_add(&self, route: &Route) -> Result<()> {
        let mut request = self
            .handle
            .route()
            .add()
            .v4()
            .destination_prefix(route.destination.network(), route.destination.prefix())
            .output_interface(route.oif)
            .table_id(route.table);
        if let Some(gw) = route.gateway {
            request = request.gateway(gw);
        }
        match request.execute().await {
            Err(rtnetlink::Error::NetlinkError(e)) if e.raw_code() == -libc::EEXIST => {
                debug!(%route, "route already exists");
                Ok(())
            }
            res => res.map_err(Error::from),
        }
    }

    async fn route_del(&self, route: &Route) -> Result<()> {
        for msg in self.route_messages(route.table).await? {
            if route_from_message(&msg).as_ref() != Some(route) {
                continue;
            }
            match self.handle.route().del(msg).execute().await {
                Err(rtnetlink::Error::NetlinkError(e)) if e.raw_code() == -libc::ESRCH => {}
                res => res?,
            }
        }
        Ok(())
    }

    async fn flush_route_table(&self, table: u32) -> Result<()> {
        let mut first_err = None;
        for msg in self.route_messages(table).await? {
            if let Err(e) = self.handle.route().del(msg).execute().await {
                warn!(%e, table, "failed to delete route while flushing table");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn interface_by_name(&self, name: &str) -> Result<Interface> {
        let mut links = self.handle.link().get().match_name(name.to_string()).execute();
        match links.try_next().await {
            Ok(Some(link)) => Ok(Interface {
                index: link.header.index,
                name: name.to_string(),
            }),
            Ok(None) => Err(Error::InterfaceNotFound(name.to_string())),
            Err(rtnetlink::Error::NetlinkError(e)) if e.raw_code() == -libc::ENODEV => {
                Err(Error::InterfaceNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn default_gateway_interface(&self) -> Result<Interface> {
        for msg in self.route_messages(MAIN_TABLE_ID).await? {
            if msg.header.destination_prefix_length != 0 {
                continue;
            }
            let oif = msg.attributes.iter().find_map(|attr| match attr {
                RouteAttribute::Oif(idx) => Some(*idx),
                _ => None,
            });
            if let Some(index) = oif {
                let name = self.link_name(index).await?;
                return Ok(Interface { index, name });
            }
        }
        Err(Error::NoDefaultRoute)
    }
}

fn route_table(msg: &RouteMessage) -> u32 {
    msg.attributes
        .iter()
        .find_map(|attr| match attr {
            RouteAttribute::Table(table) => Some(*table),
            _ => None,
        })
        .unwrap_or(msg.header.table as u32)
}

fn route_from_message(msg: &RouteMessage) -> Option<Route> {
    let mut destination = Ipv4Addr::UNSPECIFIED;
    let mut gateway = None;
    let mut oif = None;
    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Destination(RouteAddress::Inet(v4)) => destination = *v4,
            RouteAttribute::Gateway(RouteAddress::Inet(v4)) => gateway = Some(*v4),
            RouteAttribute::Oif(idx) => oif = Some(*idx),
            _ => {}
        }
    }
    let destination = Ipv4Network::new(destination, msg.header.destination_prefix_length).ok()?;
    Some(Route {
        table: route_table(msg),
        destination,
        gateway,
        oif: oif?,
    })
}

fn rule_from_message(msg: &RuleMessage) -> Rule {
    let mut rule = Rule::to_table(msg.header.table as u32);
    for attr in &msg.attributes {
        match attr {
            RuleAttribute::Table(table) => rule.table = *table,
            RuleAttribute::Priority(priority) => rule.priority = Some(*priority),
            RuleAttribute::Destination(IpAddr::V4(dst)) => {
                rule.destination = Ipv4Network::new(*dst, msg.header.dst_len).ok();
            }
            RuleAttribute::Iifname(iif) => rule.iif = Some(iif.clone()),
            _ => {}
        }
    }
    rule
}
