use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A live host found during discovery. Identity is the address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub address: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
}

impl Host {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            mac: None,
            vendor: None,
        }
    }

    pub fn with_hardware(mut self, mac: Option<String>, vendor: Option<String>) -> Self {
        self.mac = mac;
        self.vendor = vendor;
        self
    }

    /// Merge metadata from a repeated sighting of the same address.
    /// Already-known fields are never overwritten.
    pub fn absorb(&mut self, other: &Host) {
        debug_assert_eq!(self.address, other.address);
        if self.mac.is_none() {
            self.mac = other.mac.clone();
        }
        if self.vendor.is_none() {
            self.vendor = other.vendor.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_fills_missing_metadata_only() {
        let ip: IpAddr = "192.168.1.10".parse().unwrap();
        let mut host = Host::new(ip).with_hardware(Some("AA:BB:CC:DD:EE:FF".into()), None);
        let again = Host::new(ip).with_hardware(Some("11:22:33:44:55:66".into()), Some("Acme".into()));

        host.absorb(&again);

        assert_eq!(host.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(host.vendor.as_deref(), Some("Acme"));
    }
}
