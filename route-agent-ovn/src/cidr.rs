use ipnetwork::{IpNetwork, Ipv4Network};
use route_agent_crds::v1::endpoint::Endpoint;
use tracing::warn;

use crate::{Error, Result};

fn parse(cidr: &str) -> Result<IpNetwork> {
    cidr.trim().parse().map_err(|source| Error::InvalidCidr {
        cidr: cidr.to_string(),
        source,
    })
}

/// Two networks overlap when either contains the other's network address.
fn overlaps(a: &IpNetwork, b: &IpNetwork) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// Rejects remote subnets that collide with the local service or cluster CIDRs.
///
/// Unparseable CIDRs on either side are rejected as well.
pub fn overlapping_subnets(service_cidrs: &[String], cluster_cidrs: &[String], remote: &[String]) -> Result<()> {
    let local = service_cidrs
        .iter()
        .chain(cluster_cidrs)
        .map(|cidr| parse(cidr).map(|net| (cidr, net)))
        .collect::<Result<Vec<_>>>()?;

    for subnet in remote {
        let remote_net = parse(subnet)?;
        if let Some((cidr, _)) = local.iter().find(|(_, net)| overlaps(net, &remote_net)) {
            return Err(Error::OverlappingSubnets {
                remote: subnet.clone(),
                local: cidr.to_string(),
            });
        }
    }
    Ok(())
}

/// IPv4 subnets advertised by the endpoint, masked to their network address.
/// The dataplane is IPv4 only, anything else is skipped.
pub(crate) fn ipv4_subnets(endpoint: &Endpoint) -> Vec<Ipv4Network> {
    endpoint
        .spec
        .subnets
        .iter()
        .filter_map(|subnet| match subnet.trim().parse::<IpNetwork>() {
            // the kernel reports prefixes with host bits cleared
            Ok(IpNetwork::V4(net)) => Ipv4Network::new(net.network(), net.prefix()).ok(),
            Ok(IpNetwork::V6(_)) => {
                warn!("skipping non-IPv4 subnet {}", subnet);
                None
            }
            Err(e) => {
                warn!(%e, "skipping invalid subnet {}", subnet);
                None
            }
        })
        .collect()
}
