use chrono::{DateTime, Utc};
use colored::Colorize;
use ipnetwork::{Ipv4Network, Ipv6Network};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::net::IpAddr;

use super::palette;
use crate::models::{Outcome, Protocol};
use crate::session::PhaseStats;

/// Ports whose exposure is called out in the assessment.
pub const RISKY_PORTS: &[u16] = &[21, 22, 23, 80, 443, 3389, 5900, 8080, 8443];

const TOP_N: usize = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostEntry {
    pub mac: Option<String>,
    pub vendor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortEntry {
    pub service: Option<String>,
    pub fingerprint: Option<String>,
}

impl PortEntry {
    pub fn service_name(&self) -> &str {
        self.service.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionEntry {
    pub target: String,
    pub actions: Vec<String>,
    pub outcome: Outcome,
    pub findings: usize,
}

/// Everything the interpreter has read, enough to render the final report.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub complete: bool,
    pub cancelled: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub hosts: BTreeMap<IpAddr, HostEntry>,
    pub ports: BTreeMap<(IpAddr, u16, Protocol), PortEntry>,
    pub actions: Vec<ActionEntry>,
    pub phase_stats: Vec<PhaseStats>,
    pub passthrough: usize,
}

impl ScanSummary {
    pub fn duration_secs(&self) -> i64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_seconds().max(0),
            _ => 0,
        }
    }

    /// Action sub-scans that actually ran.
    pub fn actions_executed(&self) -> usize {
        self.actions.iter().filter(|a| a.outcome != Outcome::Skipped).count()
    }

    /// Ran but produced nothing: empty, timed out or unreadable.
    pub fn attempted_empty(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a.outcome, Outcome::Empty | Outcome::Timeout | Outcome::Malformed))
            .count()
    }

    pub fn timed_out(&self) -> usize {
        self.actions.iter().filter(|a| a.outcome == Outcome::Timeout).count()
    }

    pub fn hosts_with_ports(&self) -> BTreeSet<IpAddr> {
        self.ports.keys().map(|(ip, _, _)| *ip).collect()
    }

    /// Hosts with any open port over all hosts, as a percentage.
    pub fn exposure_percent(&self) -> f64 {
        percent(self.hosts_with_ports().len(), self.hosts.len())
    }

    pub fn risky(&self) -> Vec<(IpAddr, u16, &PortEntry)> {
        self.ports
            .iter()
            .filter(|((_, port, _), _)| RISKY_PORTS.contains(port))
            .map(|((ip, port, _), entry)| (*ip, *port, entry))
            .collect()
    }

    pub fn risky_host_percent(&self) -> f64 {
        let hosts: BTreeSet<IpAddr> = self.risky().iter().map(|(ip, _, _)| *ip).collect();
        percent(hosts.len(), self.hosts.len())
    }

    /// Most common open ports, count descending then port ascending.
    pub fn top_ports(&self) -> Vec<(u16, usize)> {
        let mut counts: BTreeMap<u16, usize> = BTreeMap::new();
        for (_, port, _) in self.ports.keys() {
            *counts.entry(*port).or_default() += 1;
        }
        top(counts)
    }

    /// Most common services, count descending then name ascending.
    pub fn top_services(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for entry in self.ports.values() {
            *counts.entry(entry.service_name().to_string()).or_default() += 1;
        }
        top(counts)
    }

    pub fn vendor_count(&self) -> usize {
        self.hosts
            .values()
            .filter_map(|h| h.vendor.as_deref())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn fingerprints(&self) -> Vec<(IpAddr, u16, &str)> {
        self.ports
            .iter()
            .filter_map(|((ip, port, _), entry)| entry.fingerprint.as_deref().map(|f| (*ip, *port, f)))
            .collect()
    }

    pub fn ports_of(&self, host: IpAddr) -> Vec<(u16, Protocol, &PortEntry)> {
        self.ports
            .range((host, 0, Protocol::Tcp)..)
            .take_while(|((ip, _, _), _)| *ip == host)
            .map(|((_, port, proto), entry)| (*port, *proto, entry))
            .collect()
    }

    /// Final report printed at end of stream.
    pub fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        if !self.complete {
            writeln!(out, "\n{}", palette::warning("! scan interrupted - showing partial results"))?;
        }

        let title = if self.complete && !self.cancelled {
            "+ SCAN COMPLETED"
        } else {
            "+ SCAN STOPPED"
        };
        writeln!(out, "\n{}", palette::found(title).bold())?;
        writeln!(out, "{}", palette::rule(80))?;

        let secs = self.duration_secs();
        writeln!(out, "\n{}", palette::emphasis("SCAN SUMMARY"))?;
        writeln!(out, "{}", palette::rule(20))?;
        writeln!(out, "Scan Duration     : {:02}m {:02}s", secs / 60, secs % 60)?;
        writeln!(out, "Hosts Discovered  : {}", self.hosts.len())?;
        writeln!(out, "Open Ports Found  : {}", self.ports.len())?;
        writeln!(out, "Actions Executed  : {}", self.actions_executed())?;
        writeln!(
            out,
            "Attempted, Empty  : {} ({} timed out)",
            self.attempted_empty(),
            self.timed_out()
        )?;
        if self.passthrough > 0 {
            writeln!(out, "Unparsed Lines    : {}", self.passthrough)?;
        }

        if self.hosts.is_empty() {
            writeln!(out, "\n{}", palette::warning("0 active hosts found"))?;
        } else if self.ports.is_empty() {
            writeln!(out, "\n{}", palette::warning("0 open ports found"))?;
        }

        if !self.ports.is_empty() {
            self.render_assessment(out)?;
            self.render_common(out)?;
        }

        let fingerprints = self.fingerprints();
        if !fingerprints.is_empty() {
            writeln!(out, "\n{}", palette::emphasis("SERVICE FINGERPRINTS"))?;
            writeln!(out, "{}", palette::rule(25))?;
            for (ip, port, fingerprint) in fingerprints {
                writeln!(out, "   {}", endpoint(ip, port))?;
                writeln!(out, "   L- {}", fingerprint)?;
            }
        }

        if !self.hosts.is_empty() {
            writeln!(out, "\n{}", palette::emphasis("NETWORK TOPOLOGY"))?;
            writeln!(out, "{}", palette::rule(20))?;
            writeln!(out, "Device Vendors    : {} different manufacturers", self.vendor_count())?;
        }

        self.render_tree(out)?;
        writeln!(out)
    }

    fn render_assessment(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "\n{}", palette::emphasis("SECURITY ASSESSMENT"))?;
        writeln!(out, "{}", palette::rule(25))?;
        writeln!(
            out,
            "Network Exposure  : {:.1}% ({}/{} hosts)",
            self.exposure_percent(),
            self.hosts_with_ports().len(),
            self.hosts.len()
        )?;

        let risky = self.risky();
        if risky.is_empty() {
            writeln!(out, "{}", palette::found("Risky Services    : None detected"))?;
            return Ok(());
        }

        writeln!(
            out,
            "{}",
            palette::critical(&format!(
                "Risky Services    : {} found on {:.1}% of hosts",
                risky.len(),
                self.risky_host_percent()
            ))
        )?;
        for (ip, port, entry) in risky {
            writeln!(out, "   L- {} ({})", endpoint(ip, port), entry.service_name())?;
        }
        Ok(())
    }

    fn render_common(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "\n{}", palette::emphasis("MOST COMMON"))?;
        writeln!(out, "{}", palette::rule(20))?;

        let ports: Vec<String> = self
            .top_ports()
            .into_iter()
            .map(|(port, n)| format!("{} ({})", port, n))
            .collect();
        let services: Vec<String> = self
            .top_services()
            .into_iter()
            .map(|(name, n)| format!("{} ({})", name, n))
            .collect();

        writeln!(out, "Ports             : {}", ports.join(", "))?;
        writeln!(out, "Services          : {}", services.join(", "))
    }

    /// Hosts under their network, open ports under each host, fingerprint
    /// under each port.
    pub fn render_tree(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "\n{}", palette::emphasis("NETWORK TREE"))?;
        writeln!(out, "{}", palette::rule(15))?;

        let Some(first) = self.hosts.keys().next() else {
            writeln!(out, "Network: unknown")?;
            return writeln!(out, "   └── (no hosts discovered)");
        };
        writeln!(out, "Network: {}", network_of(*first))?;

        let count = self.hosts.len();
        for (i, (ip, host)) in self.hosts.iter().enumerate() {
            let last_host = i + 1 == count;
            let branch = if last_host { "└──" } else { "├──" };
            let indent = if last_host { "       " } else { "   │   " };

            let vendor = host
                .vendor
                .as_deref()
                .map(|v| format!(" [{}]", v))
                .unwrap_or_default();
            writeln!(out, "   {} {}{}", branch, ip, vendor)?;

            let ports = self.ports_of(*ip);
            if ports.is_empty() {
                writeln!(out, "{}└── (no open ports)", indent)?;
                continue;
            }

            for (j, (port, proto, entry)) in ports.iter().enumerate() {
                let last_port = j + 1 == ports.len();
                let port_branch = if last_port { "└──" } else { "├──" };
                writeln!(
                    out,
                    "{}{} {}/{} ({})",
                    indent,
                    port_branch,
                    port,
                    proto,
                    entry.service_name()
                )?;
                if let Some(fingerprint) = &entry.fingerprint {
                    let leaf = if last_port { "    " } else { "│   " };
                    writeln!(out, "{}{}└── {}", indent, leaf, fingerprint)?;
                }
            }
        }
        Ok(())
    }

    /// Markdown rendition of the same report, for `scan-report.md`.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let secs = self.duration_secs();

        md.push_str("## Summary\n\n");
        if !self.complete {
            md.push_str("> Scan interrupted - showing partial results.\n\n");
        }
        md.push_str(&format!("- **Duration:** {:02}m {:02}s\n", secs / 60, secs % 60));
        md.push_str(&format!("- **Hosts Discovered:** {}\n", self.hosts.len()));
        md.push_str(&format!("- **Open Ports:** {}\n", self.ports.len()));
        md.push_str(&format!("- **Actions Executed:** {}\n", self.actions_executed()));
        md.push_str(&format!(
            "- **Attempted, Empty:** {} ({} timed out)\n",
            self.attempted_empty(),
            self.timed_out()
        ));
        md.push_str(&format!(
            "- **Network Exposure:** {:.1}% ({}/{} hosts)\n",
            self.exposure_percent(),
            self.hosts_with_ports().len(),
            self.hosts.len()
        ));
        md.push_str(&format!(
            "- **Hosts With Risky Ports:** {:.1}%\n\n",
            self.risky_host_percent()
        ));

        if self.hosts.is_empty() {
            md.push_str("0 active hosts found.\n");
            return md;
        }

        md.push_str("## Hosts\n\n");
        for (ip, host) in &self.hosts {
            md.push_str(&format!("### {}\n\n", ip));
            if let Some(mac) = &host.mac {
                md.push_str(&format!("- **MAC:** `{}`\n", mac));
            }
            if let Some(vendor) = &host.vendor {
                md.push_str(&format!("- **Vendor:** {}\n", vendor));
            }

            let ports = self.ports_of(*ip);
            if ports.is_empty() {
                md.push_str("- **Open Ports:** None detected\n\n");
                continue;
            }

            md.push_str(&format!("- **Open Ports ({}):**\n", ports.len()));
            for (port, proto, entry) in ports {
                match &entry.fingerprint {
                    Some(fp) => md.push_str(&format!(
                        "  - {}/{}: {} ({})\n",
                        port,
                        proto,
                        entry.service_name(),
                        fp
                    )),
                    None => md.push_str(&format!("  - {}/{}: {}\n", port, proto, entry.service_name())),
                }
            }
            md.push('\n');
        }

        if !self.actions.is_empty() {
            md.push_str("## Service Actions\n\n");
            md.push_str("| Target | Actions | Outcome | Findings |\n");
            md.push_str("|---|---|---|---|\n");
            for action in &self.actions {
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    action.target,
                    action.actions.join(", "),
                    action.outcome,
                    action.findings
                ));
            }
        }

        md
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn top<K: Ord + Clone>(counts: BTreeMap<K, usize>) -> Vec<(K, usize)> {
    let mut ranked: Vec<(K, usize)> = counts.into_iter().collect();
    // BTreeMap order already breaks ties by key; the sort is stable.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(TOP_N);
    ranked
}

pub(crate) fn endpoint(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V6(v6) => format!("[{}]:{}", v6, port),
        IpAddr::V4(v4) => format!("{}:{}", v4, port),
    }
}

fn network_of(ip: IpAddr) -> String {
    let network = match ip {
        IpAddr::V4(v4) => Ipv4Network::new(v4, 24).map(|n| format!("{}/24", n.network())),
        IpAddr::V6(v6) => Ipv6Network::new(v6, 64).map(|n| format!("{}/64", n.network())),
    };
    network.unwrap_or_else(|_| ip.to_string())
}
