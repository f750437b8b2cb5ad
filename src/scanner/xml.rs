//! Defensive reader for the engine's XML report.
//!
//! Missing elements mean "nothing found", never an error. Only input that is
//! not an `nmaprun` document at all is `MalformedResult`.

use roxmltree::{Document, Node, ParsingOptions};
use std::net::IpAddr;
use tracing::trace;

use crate::error::{Result, ScanError};
use crate::models::{Finding, PortState, Protocol, ScriptOutput};

/// Well-formed zero-findings document handed downstream in place of output
/// that was never produced.
pub const EMPTY_DOCUMENT: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<nmaprun scanner="nmap" args="" start="0" version="placeholder">"#,
    r#"<runstats><finished time="0" exit="success"/><hosts up="0" down="0" total="0"/></runstats>"#,
    r#"</nmaprun>"#
);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineReport {
    pub hosts: Vec<ReportHost>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportHost {
    pub address: IpAddr,
    pub up: bool,
    pub mac: Option<String>,
    pub vendor: Option<String>,
    pub ports: Vec<ReportPort>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportPort {
    pub number: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub reason: Option<String>,
    pub service: Option<ServiceDetail>,
    pub scripts: Vec<ScriptOutput>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDetail {
    pub name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub extra_info: Option<String>,
}

impl ServiceDetail {
    /// `product version extrainfo`, blanks dropped. None if all are blank.
    pub fn fingerprint(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.product, &self.version, &self.extra_info]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

impl EngineReport {
    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn live_hosts(&self) -> impl Iterator<Item = &ReportHost> {
        self.hosts.iter().filter(|h| h.up)
    }

    pub fn host(&self, address: IpAddr) -> Option<&ReportHost> {
        self.hosts.iter().find(|h| h.address == address)
    }
}

pub fn parse(xml: &str) -> Result<EngineReport> {
    if xml.trim().is_empty() {
        return Ok(EngineReport::default());
    }

    // The engine emits a DOCTYPE line.
    let mut options = ParsingOptions::default();
    options.allow_dtd = true;
    let doc = Document::parse_with_options(xml, options)
        .map_err(|e| ScanError::MalformedResult(e.to_string()))?;

    let root = doc.root_element();
    if root.tag_name().name() != "nmaprun" {
        return Err(ScanError::MalformedResult(format!(
            "unexpected root element <{}>",
            root.tag_name().name()
        )));
    }

    let hosts = children(root, "host").filter_map(parse_host).collect();
    Ok(EngineReport { hosts })
}

fn parse_host(node: Node) -> Option<ReportHost> {
    let up = child(node, "status")
        .and_then(|s| s.attribute("state"))
        .map(|state| state == "up")
        .unwrap_or(false);

    let mut ipv4 = None;
    let mut ipv6 = None;
    let mut mac = None;
    let mut vendor = None;

    for addr in children(node, "address") {
        let Some(value) = addr.attribute("addr") else {
            continue;
        };
        match addr.attribute("addrtype").unwrap_or("ipv4") {
            "ipv4" => ipv4 = value.parse::<IpAddr>().ok(),
            "ipv6" => ipv6 = value.parse::<IpAddr>().ok(),
            "mac" => {
                mac = Some(value.to_string());
                vendor = addr.attribute("vendor").map(str::to_string);
            }
            other => trace!("Ignoring address type {}", other),
        }
    }

    let address = ipv4.or(ipv6)?;
    let ports = child(node, "ports")
        .map(|ports| children(ports, "port").filter_map(parse_port).collect())
        .unwrap_or_default();

    Some(ReportHost {
        address,
        up,
        mac,
        vendor,
        ports,
    })
}

fn parse_port(node: Node) -> Option<ReportPort> {
    let number = node
        .attribute("portid")
        .and_then(|p| p.parse::<u16>().ok())
        .filter(|p| *p != 0)?;
    let protocol = Protocol::parse(node.attribute("protocol").unwrap_or("tcp"))?;

    let state_node = child(node, "state");
    let state = state_node
        .and_then(|s| s.attribute("state"))
        .map(PortState::parse)
        .unwrap_or(PortState::Unknown);
    let reason = state_node
        .and_then(|s| s.attribute("reason"))
        .map(str::to_string);

    let service = child(node, "service").map(|s| ServiceDetail {
        name: non_blank(s.attribute("name")),
        product: non_blank(s.attribute("product")),
        version: non_blank(s.attribute("version")),
        extra_info: non_blank(s.attribute("extrainfo")),
    });

    let scripts = children(node, "script")
        .map(|script| {
            let mut findings = Vec::new();
            collect_findings(script, "", &mut findings);
            ScriptOutput {
                action: script.attribute("id").unwrap_or("unknown").to_string(),
                output: script.attribute("output").unwrap_or("").trim().to_string(),
                findings,
            }
        })
        .collect();

    Some(ReportPort {
        number,
        protocol,
        state,
        reason,
        service,
        scripts,
    })
}

/// Flatten `<elem key>` values, joining nested `<table key>` names with `.`.
/// Unkeyed entries are numbered by position.
fn collect_findings(node: Node, prefix: &str, out: &mut Vec<Finding>) {
    for (idx, item) in node.children().filter(Node::is_element).enumerate() {
        let key = match item.attribute("key") {
            Some(k) => k.to_string(),
            None => idx.to_string(),
        };
        let path = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };

        match item.tag_name().name() {
            "elem" => out.push(Finding {
                key: path,
                value: item.text().unwrap_or("").trim().to_string(),
            }),
            "table" => collect_findings(item, &path, out),
            _ => {}
        }
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Build a minimal report: one `<host>` per `(addr, up, ports_xml)`.
    pub fn report(hosts: &[(&str, bool, &str)]) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\"?>\n<!DOCTYPE nmaprun>\n<nmaprun scanner=\"nmap\">\n",
        );
        for (addr, up, ports) in hosts {
            let kind = if addr.contains(':') { "ipv6" } else { "ipv4" };
            xml.push_str(&format!(
                "<host><status state=\"{}\" reason=\"syn-ack\"/><address addr=\"{}\" addrtype=\"{}\"/>",
                if *up { "up" } else { "down" },
                addr,
                kind
            ));
            if !ports.is_empty() {
                xml.push_str(&format!("<ports>{}</ports>", ports));
            }
            xml.push_str("</host>\n");
        }
        xml.push_str("</nmaprun>\n");
        xml
    }

    pub fn port(number: u16, state: &str, service: &str) -> String {
        format!(
            "<port protocol=\"tcp\" portid=\"{}\"><state state=\"{}\" reason=\"syn-ack\"/><service name=\"{}\" method=\"table\" conf=\"3\"/></port>",
            number, state, service
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{port, report};
    use super::*;

    const DISCOVERY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sn -oX - 192.168.1.0/24" start="1700000000">
  <host><status state="up" reason="arp-response"/>
    <address addr="192.168.1.1" addrtype="ipv4"/>
    <address addr="AA:BB:CC:00:11:22" addrtype="mac" vendor="Netgear"/>
  </host>
  <host><status state="down" reason="no-response"/>
    <address addr="192.168.1.2" addrtype="ipv4"/>
  </host>
  <runstats><finished time="1700000003" exit="success"/></runstats>
</nmaprun>"#;

    #[test]
    fn parses_discovery_hosts_with_hardware() {
        let report = parse(DISCOVERY).unwrap();
        let live: Vec<_> = report.live_hosts().collect();

        assert_eq!(report.hosts.len(), 2);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].address.to_string(), "192.168.1.1");
        assert_eq!(live[0].mac.as_deref(), Some("AA:BB:CC:00:11:22"));
        assert_eq!(live[0].vendor.as_deref(), Some("Netgear"));
    }

    #[test]
    fn parses_ports_and_states() {
        let ports = format!("{}{}", port(80, "open", "http"), port(81, "filtered", "hosts2-ns"));
        let report = parse(&report(&[("10.0.0.1", true, ports.as_str())])).unwrap();
        let host = &report.hosts[0];

        assert_eq!(host.ports.len(), 2);
        assert_eq!(host.ports[0].number, 80);
        assert_eq!(host.ports[0].state, PortState::Open);
        assert_eq!(host.ports[1].state, PortState::Filtered);
        assert_eq!(
            host.ports[0].service.as_ref().and_then(|s| s.name.as_deref()),
            Some("http")
        );
    }

    #[test]
    fn parses_script_output_and_structured_findings() {
        let xml = r#"<nmaprun>
  <host><status state="up"/><address addr="10.0.0.5" addrtype="ipv4"/>
    <ports><port protocol="tcp" portid="443">
      <state state="open" reason="syn-ack"/>
      <service name="https" product="nginx" version="1.24.0" extrainfo="Ubuntu"/>
      <script id="ssl-cert" output="Subject: commonName=example.org">
        <table key="subject"><elem key="commonName">example.org</elem></table>
        <elem key="sig_algo">sha256WithRSAEncryption</elem>
      </script>
    </port></ports>
  </host>
</nmaprun>"#;
        let report = parse(xml).unwrap();
        let port = &report.hosts[0].ports[0];
        let script = &port.scripts[0];

        assert_eq!(script.action, "ssl-cert");
        assert_eq!(script.output, "Subject: commonName=example.org");
        assert_eq!(script.findings[0].key, "subject.commonName");
        assert_eq!(script.findings[0].value, "example.org");
        assert_eq!(script.findings[1].key, "sig_algo");
        assert_eq!(
            port.service.as_ref().unwrap().fingerprint().as_deref(),
            Some("nginx 1.24.0 Ubuntu")
        );
    }

    #[test]
    fn absent_fields_are_empty_not_errors() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("<nmaprun/>").unwrap().is_empty());

        let report = parse(&report(&[("10.0.0.9", true, "")])).unwrap();
        assert!(report.hosts[0].ports.is_empty());
    }

    #[test]
    fn placeholder_document_parses_to_nothing() {
        assert!(parse(EMPTY_DOCUMENT).unwrap().is_empty());
    }

    #[test]
    fn truncated_or_foreign_input_is_malformed() {
        assert!(matches!(
            parse("<nmaprun><host>"),
            Err(ScanError::MalformedResult(_))
        ));
        assert!(matches!(
            parse("<html></html>"),
            Err(ScanError::MalformedResult(_))
        ));
    }

    #[test]
    fn blank_service_fields_give_no_fingerprint() {
        let detail = ServiceDetail {
            name: Some("http".into()),
            product: Some("  ".into()),
            ..ServiceDetail::default()
        };
        assert_eq!(detail.fingerprint(), None);
    }
}
