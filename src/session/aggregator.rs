use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::error::{Result, ScanError};
use crate::models::{Host, Port, PortActionResult, PortKey, PortState, Protocol};
use crate::scanner::xml::{EngineReport, ServiceDetail};

/// One action-phase work item: an open port with its current service name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ActionTarget {
    pub host: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
    pub service: Option<String>,
}

impl ActionTarget {
    pub fn key(&self) -> PortKey {
        PortKey {
            host: self.host,
            number: self.port,
            protocol: self.protocol,
        }
    }
}

/// Consistent copy of everything recorded so far.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub hosts: Vec<HostSnapshot>,
    pub action_results: Vec<PortActionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    #[serde(flatten)]
    pub host: Host,
    pub ports: Vec<Port>,
}

/// Accumulates hosts, then open ports, then action results for one session.
///
/// Each phase has its own lock, so writers within a phase are serialized
/// while readers of an earlier phase never wait on a later one. Maps are
/// ordered so every read is sorted by address, then port number.
#[derive(Default)]
pub struct ResultAggregator {
    hosts: Mutex<BTreeMap<IpAddr, Host>>,
    ports: Mutex<BTreeMap<PortKey, Port>>,
    actions: Mutex<Vec<PortActionResult>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // State stays usable even if a writer panicked mid-phase.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge live hosts from a discovery report. Returns only hosts not seen
    /// before; repeated sightings enrich MAC/vendor metadata.
    pub fn record_discovery(&self, report: &EngineReport) -> Vec<Host> {
        let mut hosts = lock(&self.hosts);
        let mut added = Vec::new();

        for found in report.live_hosts() {
            let host = Host::new(found.address).with_hardware(found.mac.clone(), found.vendor.clone());
            match hosts.get_mut(&found.address) {
                Some(existing) => existing.absorb(&host),
                None => {
                    info!("New host discovered: {}", found.address);
                    hosts.insert(found.address, host.clone());
                    added.push(host);
                }
            }
        }

        added.sort_by_key(|h| h.address);
        added
    }

    /// Register a host without a discovery report, for single-host commands.
    pub fn seed_host(&self, address: IpAddr) {
        lock(&self.hosts)
            .entry(address)
            .or_insert_with(|| Host::new(address));
    }

    /// Keep the open ports reported for `host`. Returns newly recorded
    /// ports in ascending order. Reports for unknown hosts are ignored.
    pub fn record_ports(&self, host: IpAddr, report: &EngineReport) -> Vec<Port> {
        if !lock(&self.hosts).contains_key(&host) {
            debug!("Ignoring port report for unrecorded host {}", host);
            return Vec::new();
        }

        let Some(found) = report.host(host) else {
            return Vec::new();
        };

        let mut ports = lock(&self.ports);
        let mut added = Vec::new();

        for reported in found.ports.iter().filter(|p| p.state == PortState::Open) {
            let port = Port::new(host, reported.number, reported.protocol, PortState::Open)
                .with_service(reported.service.as_ref().and_then(|s| s.name.clone()));
            let key = port.key();
            if ports.contains_key(&key) {
                continue;
            }
            debug!("Port discovered: {}", key);
            ports.insert(key, port.clone());
            added.push(port);
        }

        added.sort_by_key(|p| (p.number, p.protocol));
        added
    }

    /// Record an open port directly, for the standalone action command.
    pub fn seed_port(&self, port: Port) {
        self.seed_host(port.host);
        lock(&self.ports).entry(port.key()).or_insert(port);
    }

    /// Distinct open (host, port, protocol) work items, in port order.
    pub fn action_targets(&self) -> Vec<ActionTarget> {
        lock(&self.ports)
            .values()
            .filter(|p| p.state == PortState::Open)
            .map(|p| ActionTarget {
                host: p.host,
                port: p.number,
                protocol: p.protocol,
                service: p.service.clone(),
            })
            .collect()
    }

    /// Append an action result. The port must already be recorded open.
    /// Returns true when `refinement` updated the port's service.
    pub fn record_action(
        &self,
        result: PortActionResult,
        refinement: Option<&ServiceDetail>,
    ) -> Result<bool> {
        let key = PortKey {
            host: result.host,
            number: result.port,
            protocol: result.protocol,
        };

        let refined = {
            let mut ports = lock(&self.ports);
            let port = ports
                .get_mut(&key)
                .filter(|p| p.state == PortState::Open)
                .ok_or_else(|| ScanError::invalid(format!("{} was never recorded open", key)))?;

            match refinement {
                Some(detail) => port.refine(detail.name.clone(), detail.fingerprint()),
                None => false,
            }
        };

        lock(&self.actions).push(result);
        Ok(refined)
    }

    pub fn hosts(&self) -> Vec<Host> {
        lock(&self.hosts).values().cloned().collect()
    }

    pub fn host_count(&self) -> usize {
        lock(&self.hosts).len()
    }

    pub fn port(&self, key: &PortKey) -> Option<Port> {
        lock(&self.ports).get(key).cloned()
    }

    /// Ports of one host, ascending by number.
    pub fn ports_for(&self, host: IpAddr) -> Vec<Port> {
        let ports = lock(&self.ports);
        let mut found: Vec<Port> = ports.values().filter(|p| p.host == host).cloned().collect();
        found.sort_by_key(|p| (p.number, p.protocol));
        found
    }

    pub fn port_count(&self) -> usize {
        lock(&self.ports).len()
    }

    pub fn action_results(&self) -> Vec<PortActionResult> {
        lock(&self.actions).clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let hosts = self
            .hosts()
            .into_iter()
            .map(|host| HostSnapshot {
                ports: self.ports_for(host.address),
                host,
            })
            .collect();

        SessionSnapshot {
            hosts,
            action_results: self.action_results(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;
    use crate::scanner::xml::fixtures::{port, report};
    use crate::scanner::xml::parse;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn discovery_merge_is_idempotent() {
        let aggregator = ResultAggregator::new();
        let discovery = parse(&report(&[
            ("10.0.0.2", true, ""),
            ("10.0.0.1", true, ""),
            ("10.0.0.3", false, ""),
        ]))
        .unwrap();

        let first = aggregator.record_discovery(&discovery);
        let once = aggregator.hosts();
        let second = aggregator.record_discovery(&discovery);

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(aggregator.hosts(), once);
        assert_eq!(once[0].address, ip("10.0.0.1"));
    }

    #[test]
    fn hosts_sort_numerically_not_lexically() {
        let aggregator = ResultAggregator::new();
        let discovery = parse(&report(&[
            ("10.0.0.10", true, ""),
            ("10.0.0.9", true, ""),
        ]))
        .unwrap();
        aggregator.record_discovery(&discovery);

        let order: Vec<String> = aggregator.hosts().iter().map(|h| h.address.to_string()).collect();
        assert_eq!(order, ["10.0.0.9", "10.0.0.10"]);
    }

    #[test]
    fn ports_keep_open_only_deduplicated_and_ascending() {
        let aggregator = ResultAggregator::new();
        aggregator.seed_host(ip("10.0.0.1"));

        let ports = [
            port(8080, "open", "http-proxy"),
            port(443, "open", "https"),
            port(25, "closed", "smtp"),
            port(80, "open", "http"),
            port(443, "open", "https"),
            port(9, "filtered", "discard"),
        ]
        .concat();
        let scan = parse(&report(&[("10.0.0.1", true, ports.as_str())])).unwrap();

        let added = aggregator.record_ports(ip("10.0.0.1"), &scan);
        let again = aggregator.record_ports(ip("10.0.0.1"), &scan);
        let numbers: Vec<u16> = aggregator.ports_for(ip("10.0.0.1")).iter().map(|p| p.number).collect();

        assert_eq!(added.len(), 3);
        assert!(again.is_empty());
        assert_eq!(numbers, [80, 443, 8080]);
    }

    #[test]
    fn ports_for_unknown_hosts_are_ignored() {
        let aggregator = ResultAggregator::new();
        let scan = parse(&report(&[("10.0.0.7", true, port(22, "open", "ssh").as_str())])).unwrap();

        assert!(aggregator.record_ports(ip("10.0.0.7"), &scan).is_empty());
        assert!(aggregator.action_targets().is_empty());
    }

    #[test]
    fn action_results_require_an_open_port() {
        let aggregator = ResultAggregator::new();
        let result = PortActionResult {
            host: ip("10.0.0.1"),
            port: 80,
            protocol: Protocol::Tcp,
            actions: vec!["http-title".into()],
            outcome: Outcome::Empty,
            scripts: Vec::new(),
        };

        assert!(matches!(
            aggregator.record_action(result.clone(), None),
            Err(ScanError::InvalidInput(_))
        ));

        aggregator.seed_port(
            Port::new(ip("10.0.0.1"), 80, Protocol::Tcp, PortState::Open).with_service(Some("http".into())),
        );
        aggregator.record_action(result.clone(), None).unwrap();
        aggregator.record_action(result, None).unwrap();

        // Repeated runs are distinct events.
        assert_eq!(aggregator.action_results().len(), 2);
    }

    #[test]
    fn refinement_sticks_once() {
        let aggregator = ResultAggregator::new();
        aggregator.seed_port(Port::new(ip("10.0.0.1"), 8000, Protocol::Tcp, PortState::Open));
        let result = PortActionResult {
            host: ip("10.0.0.1"),
            port: 8000,
            protocol: Protocol::Tcp,
            actions: vec!["banner".into()],
            outcome: Outcome::Found,
            scripts: Vec::new(),
        };
        let detail = ServiceDetail {
            name: Some("http".into()),
            product: Some("gunicorn".into()),
            ..ServiceDetail::default()
        };

        assert!(aggregator.record_action(result.clone(), Some(&detail)).unwrap());
        assert!(!aggregator.record_action(result, Some(&ServiceDetail::default())).unwrap());

        let key = PortKey {
            host: ip("10.0.0.1"),
            number: 8000,
            protocol: Protocol::Tcp,
        };
        let port = aggregator.port(&key).unwrap();
        assert_eq!(port.service.as_deref(), Some("http"));
        assert_eq!(port.fingerprint.as_deref(), Some("gunicorn"));
    }

    #[test]
    fn snapshot_nests_ports_under_hosts() {
        let aggregator = ResultAggregator::new();
        aggregator.seed_port(Port::new(ip("10.0.0.2"), 22, Protocol::Tcp, PortState::Open));
        aggregator.seed_host(ip("10.0.0.1"));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.hosts.len(), 2);
        assert!(snapshot.hosts[0].ports.is_empty());
        assert_eq!(snapshot.hosts[1].ports[0].number, 22);
    }
}
