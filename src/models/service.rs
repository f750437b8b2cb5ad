use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tcp" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            "sctp" => Some(Self::Sctp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Unknown,
}

impl PortState {
    /// Engine states such as `open|filtered` are not open.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "open" => Self::Open,
            "closed" => Self::Closed,
            "filtered" => Self::Filtered,
            _ => Self::Unknown,
        }
    }
}

/// A port on one host. `host` is a back-link by address, not ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub host: IpAddr,
    pub number: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip)]
    refined: bool,
}

impl Port {
    pub fn new(host: IpAddr, number: u16, protocol: Protocol, state: PortState) -> Self {
        Self {
            host,
            number,
            protocol,
            state,
            service: None,
            fingerprint: None,
            refined: false,
        }
    }

    pub fn with_service(mut self, service: Option<String>) -> Self {
        self.service = service.filter(|s| !s.is_empty());
        self
    }

    pub fn key(&self) -> PortKey {
        PortKey {
            host: self.host,
            number: self.number,
            protocol: self.protocol,
        }
    }

    /// Apply the version-detected service name. Only the first refinement
    /// sticks; later calls return false and change nothing.
    pub fn refine(&mut self, service: Option<String>, fingerprint: Option<String>) -> bool {
        if self.refined {
            return false;
        }
        if let Some(name) = service.filter(|s| !s.is_empty()) {
            self.service = Some(name);
        }
        self.fingerprint = fingerprint.filter(|s| !s.is_empty());
        self.refined = true;
        true
    }
}

/// Port identity: (host, port, protocol).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortKey {
    pub host: IpAddr,
    pub number: u16,
    pub protocol: Protocol,
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            IpAddr::V6(v6) => write!(f, "[{}]:{}/{}", v6, self.number, self.protocol),
            IpAddr::V4(v4) => write!(f, "{}:{}/{}", v4, self.number, self.protocol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refine_applies_once() {
        let mut port = Port::new("10.0.0.1".parse().unwrap(), 80, Protocol::Tcp, PortState::Open)
            .with_service(Some("http".into()));

        assert!(port.refine(Some("http".into()), Some("nginx 1.24.0".into())));
        assert!(!port.refine(Some("https".into()), Some("other".into())));

        assert_eq!(port.service.as_deref(), Some("http"));
        assert_eq!(port.fingerprint.as_deref(), Some("nginx 1.24.0"));
    }

    #[test]
    fn compound_states_are_not_open() {
        assert_eq!(PortState::parse("open"), PortState::Open);
        assert_eq!(PortState::parse("open|filtered"), PortState::Unknown);
    }

    #[test]
    fn port_key_display() {
        let key = PortKey {
            host: "::1".parse().unwrap(),
            number: 443,
            protocol: Protocol::Tcp,
        };
        assert_eq!(key.to_string(), "[::1]:443/tcp");
    }
}
