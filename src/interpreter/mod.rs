//! Line-at-a-time reader of the orchestrator's event stream.
//!
//! The interpreter keeps its own phase tag, driven by the `phase` field of
//! each record and only ever moving forward, so a dropped or mangled line
//! never desynchronizes it. Lines that are not event records are echoed and
//! counted. The same code path serves a live session and a stored
//! transcript.

pub mod palette;
pub mod summary;

use std::collections::{BTreeSet, HashMap};
use std::io::{self, BufRead, Write};
use std::net::IpAddr;
use tracing::trace;

use crate::models::{Outcome, Phase, Protocol};
use crate::session::{EventRecord, ScanEvent};
pub use summary::{ActionEntry, HostEntry, PortEntry, ScanSummary};

pub struct StreamInterpreter<W: Write> {
    out: W,
    phase: Phase,
    summarized: BTreeSet<Phase>,
    pending_actions: HashMap<String, Vec<String>>,
    summary: ScanSummary,
}

impl<W: Write> StreamInterpreter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            phase: Phase::Idle,
            summarized: BTreeSet::new(),
            pending_actions: HashMap::new(),
            summary: ScanSummary::default(),
        }
    }

    #[cfg(test)]
    fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    fn summary(&self) -> &ScanSummary {
        &self.summary
    }

    /// Read `reader` to exhaustion. Invalid UTF-8 is replaced, not fatal.
    pub fn run<R: BufRead>(&mut self, mut reader: R) -> io::Result<()> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            self.process_line(&line)?;
        }
        Ok(())
    }

    pub fn process_line(&mut self, line: &str) -> io::Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        match EventRecord::from_line(line) {
            Ok(record) => self.process_record(&record),
            Err(e) => {
                trace!("Passing through unparsed line: {}", e);
                self.summary.passthrough += 1;
                writeln!(self.out, "{}", palette::muted(line))
            }
        }
    }

    pub fn process_record(&mut self, record: &EventRecord) -> io::Result<()> {
        if self.summary.started_at.is_none() {
            self.summary.started_at = Some(record.timestamp);
        }
        self.summary.finished_at = Some(record.timestamp);
        self.sync_phase(record.phase)?;

        match &record.event {
            ScanEvent::SessionStarted {
                session_id,
                target,
                profile,
            } => {
                writeln!(self.out, "{}", palette::rule(80))?;
                writeln!(self.out, "{}", palette::emphasis("NETWORK SECURITY ASSESSMENT"))?;
                writeln!(self.out, "Target : {} ({} profile)", target, profile)?;
                writeln!(self.out, "Session: {}", session_id)?;
                writeln!(self.out, "Started: {}", record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"))?;
                writeln!(self.out, "{}", palette::rule(80))?;
            }
            ScanEvent::PhaseStarted { .. } => {}
            ScanEvent::HostDiscovered {
                address,
                mac,
                vendor,
            } => {
                let entry = HostEntry {
                    mac: mac.clone(),
                    vendor: vendor.clone(),
                };
                if self.summary.hosts.insert(*address, entry).is_none() {
                    let text = format!("+ Host discovered: {}{}", address, bracketed(vendor.as_deref()));
                    writeln!(self.out, "{}", palette::found(&text))?;
                }
            }
            ScanEvent::SubScanStarted { target, actions } => match record.phase {
                Phase::Discovery => writeln!(self.out, "-> Sweeping {}...", target)?,
                Phase::PortScan => writeln!(self.out, "\n-> Scanning {}...", target)?,
                Phase::ActionExec => {
                    writeln!(self.out, "\n-> Analyzing {} ({})...", target, actions.join(", "))?;
                    self.pending_actions.insert(target.clone(), actions.clone());
                }
                _ => {}
            },
            ScanEvent::PortOpen {
                address,
                port,
                protocol,
                service,
            } => {
                self.summary.hosts.entry(*address).or_default();
                let entry = PortEntry {
                    service: service.clone(),
                    fingerprint: None,
                };
                if self.summary.ports.insert((*address, *port, *protocol), entry).is_none() {
                    let text = format!(
                        "  + Port {}:{} open ({})",
                        address,
                        port,
                        service.as_deref().unwrap_or("unknown")
                    );
                    writeln!(self.out, "{}", palette::found(&text))?;
                }
            }
            ScanEvent::ActionOutput {
                address,
                port,
                action,
                output,
                ..
            } => {
                let mut lines = output.lines().map(str::trim_end).filter(|l| !l.trim().is_empty());
                let first = lines.next().unwrap_or("(no output)");
                writeln!(
                    self.out,
                    "  | {} {}: {}",
                    summary::endpoint(*address, *port),
                    action,
                    first.trim()
                )?;
                for rest in lines {
                    writeln!(self.out, "  |   {}", rest)?;
                }
            }
            ScanEvent::ServiceRefined {
                address,
                port,
                protocol,
                service,
                fingerprint,
            } => {
                self.refine((*address, *port, *protocol), service, fingerprint.as_deref());
                let detail = fingerprint.as_deref().map(|f| format!(" -> {}", f)).unwrap_or_default();
                writeln!(
                    self.out,
                    "  + Service {}/{} ({}){}",
                    summary::endpoint(*address, *port),
                    protocol,
                    service,
                    detail
                )?;
            }
            ScanEvent::SubScanFinished {
                target,
                outcome,
                findings,
            } => self.finish_sub(record.phase, target, *outcome, *findings)?,
            ScanEvent::PhaseCompleted { stats } => {
                self.summary.phase_stats.push(*stats);
                self.summarize(record.phase)?;
            }
            ScanEvent::ScanComplete { cancelled, .. } => {
                self.summary.complete = true;
                self.summary.cancelled = *cancelled;
            }
        }
        Ok(())
    }

    /// Print the final report and hand back what was collected.
    pub fn finish(mut self) -> io::Result<ScanSummary> {
        let current = self.phase;
        self.summarize(current)?;
        self.summary.render(&mut self.out)?;
        self.out.flush()?;
        Ok(self.summary)
    }

    fn sync_phase(&mut self, next: Phase) -> io::Result<()> {
        if next <= self.phase {
            return Ok(());
        }
        let leaving = self.phase;
        self.summarize(leaving)?;
        self.phase = next;

        if matches!(next, Phase::Discovery | Phase::PortScan | Phase::ActionExec) {
            let title = next.title();
            writeln!(self.out, "\n{}", palette::phase(title))?;
            writeln!(self.out, "{}", palette::rule(title.chars().count()))?;
        }
        Ok(())
    }

    fn finish_sub(&mut self, phase: Phase, target: &str, outcome: Outcome, findings: usize) -> io::Result<()> {
        match phase {
            Phase::Discovery if outcome == Outcome::Timeout => {
                writeln!(self.out, "{}", palette::warning(&format!("  ({}: discovery timed out)", target)))?;
            }
            Phase::PortScan if findings == 0 => match outcome {
                Outcome::Empty | Outcome::Found => writeln!(self.out, "  ({}: no open ports)", target)?,
                other => writeln!(
                    self.out,
                    "{}",
                    palette::warning(&format!("  ({}: no open ports, {})", target, other))
                )?,
            },
            Phase::ActionExec => {
                let actions = self.pending_actions.remove(target).unwrap_or_default();
                if !outcome.has_findings() {
                    writeln!(
                        self.out,
                        "{}",
                        palette::warning(&format!("  ({}: no findings, {})", target, outcome))
                    )?;
                }
                self.summary.actions.push(ActionEntry {
                    target: target.to_string(),
                    actions,
                    outcome,
                    findings,
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn refine(&mut self, key: (IpAddr, u16, Protocol), service: &str, fingerprint: Option<&str>) {
        if let Some(entry) = self.summary.ports.get_mut(&key) {
            entry.service = Some(service.to_string());
            entry.fingerprint = fingerprint.map(str::to_string);
        }
    }

    /// Per-phase summary, printed once per phase.
    fn summarize(&mut self, phase: Phase) -> io::Result<()> {
        if !matches!(phase, Phase::Discovery | Phase::PortScan | Phase::ActionExec) {
            return Ok(());
        }
        if !self.summarized.insert(phase) {
            return Ok(());
        }

        match phase {
            Phase::Discovery => self.discovery_summary(),
            Phase::PortScan => self.port_summary(),
            _ => self.action_summary(),
        }
    }

    fn discovery_summary(&mut self) -> io::Result<()> {
        let out = &mut self.out;
        let summary = &self.summary;

        writeln!(out, "\n{}", palette::emphasis("HOST DISCOVERY COMPLETE"))?;
        writeln!(out, "{}", palette::rule(25))?;
        writeln!(out, "Total hosts found: {}", summary.hosts.len())?;

        if summary.hosts.is_empty() {
            return writeln!(out, "\n{}", palette::warning("0 active hosts found"));
        }

        writeln!(out, "\nDiscovered hosts:")?;
        for (ip, host) in &summary.hosts {
            writeln!(out, "  • {}{}", ip, bracketed(host.vendor.as_deref()))?;
        }
        let vendors = summary.vendor_count();
        if vendors > 0 {
            writeln!(out, "\nDevice manufacturers: {}", vendors)?;
        }
        Ok(())
    }

    fn port_summary(&mut self) -> io::Result<()> {
        let out = &mut self.out;
        let summary = &self.summary;

        writeln!(out, "\n{}", palette::emphasis("PORT SCANNING COMPLETE"))?;
        writeln!(out, "{}", palette::rule(25))?;
        writeln!(out, "Total open ports: {}", summary.ports.len())?;

        if summary.ports.is_empty() {
            return writeln!(out, "\nNo open ports discovered on any hosts");
        }

        writeln!(out, "\nOpen ports by host:")?;
        for ip in summary.hosts_with_ports() {
            let ports: Vec<String> = summary
                .ports_of(ip)
                .into_iter()
                .map(|(port, _, entry)| format!("{}/{}", port, entry.service_name()))
                .collect();
            writeln!(out, "  • {}: {}", ip, ports.join(", "))?;
        }
        writeln!(
            out,
            "\nHosts with open ports: {}/{}",
            summary.hosts_with_ports().len(),
            summary.hosts.len()
        )
    }

    fn action_summary(&mut self) -> io::Result<()> {
        let out = &mut self.out;
        let summary = &self.summary;

        writeln!(out, "\n{}", palette::emphasis("SERVICE ACTIONS COMPLETE"))?;
        writeln!(out, "{}", palette::rule(28))?;
        writeln!(out, "Targets analyzed: {}", summary.actions.len())?;

        for action in &summary.actions {
            writeln!(
                out,
                "  • {}: {} -> {} ({} findings)",
                action.target,
                if action.actions.is_empty() {
                    "-".to_string()
                } else {
                    action.actions.join(", ")
                },
                action.outcome,
                action.findings
            )?;
        }
        Ok(())
    }
}

fn bracketed(value: Option<&str>) -> String {
    value.map(|v| format!(" [{}]", v)).unwrap_or_default()
}
