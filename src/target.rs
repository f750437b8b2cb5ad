use ipnetwork::IpNetwork;
use std::net::IpAddr;
use tracing::{info, warn};

use crate::error::{Result, ScanError};

/// Parse an explicit target: an address or a CIDR block. Host names are
/// rejected; the engine is never asked to resolve anything.
pub fn parse_network(raw: &str) -> Result<IpNetwork> {
    let raw = raw.trim();
    let network: IpNetwork = raw
        .parse()
        .map_err(|e| ScanError::invalid(format!("target '{}': {}", raw, e)))?;

    if let IpNetwork::V4(v4) = network {
        if v4.prefix() < 16 {
            warn!("Target {} spans {} addresses", network, v4.size());
        }
    }

    Ok(network)
}

pub fn parse_host(raw: &str) -> Result<IpAddr> {
    raw.trim()
        .parse()
        .map_err(|_| ScanError::invalid(format!("'{}' is not an IP address", raw.trim())))
}

/// Explicit target if given, otherwise the local private IPv4 subnet.
pub fn resolve(raw: Option<&str>) -> Result<IpNetwork> {
    match raw {
        Some(raw) => parse_network(raw),
        None => {
            let network = local_subnet().ok_or_else(|| {
                ScanError::invalid("no target given and no local IPv4 subnet detected")
            })?;
            info!("Auto-detected local subnet {}", network);
            Ok(network)
        }
    }
}

/// First private IPv4 network on an interface that is up and not loopback.
pub fn local_subnet() -> Option<IpNetwork> {
    pnet::datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .flat_map(|iface| iface.ips.into_iter())
        .find_map(|net| match net {
            pnet::ipnetwork::IpNetwork::V4(v4) if v4.ip().is_private() => {
                IpNetwork::new(IpAddr::V4(v4.network()), v4.prefix()).ok()
            }
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_addresses_and_cidr_blocks() {
        assert_eq!(parse_network("10.0.0.0/24").unwrap().prefix(), 24);
        assert_eq!(parse_network("192.168.1.7").unwrap().prefix(), 32);
        assert_eq!(parse_network("fd00::/64").unwrap().prefix(), 64);
    }

    #[test]
    fn rejects_names_and_bad_prefixes() {
        for bad in ["example.org", "10.0.0.0/33", "", "10.0.0.256"] {
            assert!(matches!(parse_network(bad), Err(ScanError::InvalidInput(_))), "{}", bad);
        }
        assert!(parse_host("10.0.0.0/24").is_err());
        assert!(parse_host("::1").is_ok());
    }
}
