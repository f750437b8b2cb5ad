//! Phase state machine: IDLE -> DISCOVERY -> PORT_SCAN -> ACTION_EXEC -> DONE.
//!
//! A phase fans its targets out on a `JoinSet` and is complete only once the
//! set has drained, so no event of a later phase can precede the completion
//! event of an earlier one. Failed or empty sub-scans are counted and the
//! phase carries on; only fatal errors abort the session.

use ipnetwork::IpNetwork;
use std::collections::BTreeSet;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::EngineSettings;
use crate::error::Result;
use crate::models::{Host, Outcome, Phase, PhaseKind, PortActionResult};
use crate::rate_limit::RateLimiter;
use crate::scanner::xml::{self, EngineReport};
use crate::scanner::{EmptyReason, InvokeTarget, Invocation, PhaseParams, ScanEngine};
use crate::selector::ScriptSelector;
use crate::session::{ActionTarget, EventEmitter, PhaseStats, ResultAggregator, ScanEvent, SessionInfo};

/// Totals reported once the session reaches DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub hosts: usize,
    pub open_ports: usize,
    pub actions: usize,
    pub cancelled: bool,
}

/// Everything a sub-scan task needs. Cheap to clone into each task.
#[derive(Clone)]
struct Worker {
    engine: Arc<dyn ScanEngine>,
    selector: ScriptSelector,
    aggregator: Arc<ResultAggregator>,
    limiter: RateLimiter,
    emitter: EventEmitter,
    settings: EngineSettings,
    shutdown: watch::Receiver<bool>,
}

pub struct Orchestrator {
    worker: Worker,
    state: Phase,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn ScanEngine>,
        settings: EngineSettings,
        emitter: EventEmitter,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let limiter = RateLimiter::new(settings.max_parallel, settings.max_per_host);
        Self {
            worker: Worker {
                engine,
                selector: ScriptSelector::new(),
                aggregator: Arc::new(ResultAggregator::new()),
                limiter,
                emitter,
                settings,
                shutdown,
            },
            state: Phase::Idle,
        }
    }

    #[cfg(test)]
    fn state(&self) -> Phase {
        self.state
    }

    pub fn aggregator(&self) -> Arc<ResultAggregator> {
        self.worker.aggregator.clone()
    }

    /// Drive a whole session to DONE.
    pub async fn run(&mut self, session: &SessionInfo) -> Result<SessionOutcome> {
        self.worker.emit(
            Phase::Idle,
            ScanEvent::SessionStarted {
                session_id: session.id,
                target: session.target.to_string(),
                profile: session.profile.clone(),
            },
        );
        info!("Session {} against {} ({})", session.id, session.target, session.profile);

        if !self.worker.is_cancelled() {
            self.discover(session.target).await?;
        }

        let hosts: Vec<IpAddr> = self.worker.aggregator.hosts().iter().map(|h| h.address).collect();
        if hosts.is_empty() {
            info!("No live hosts, skipping port scan");
            return Ok(self.finish());
        }
        if self.worker.is_cancelled() {
            return Ok(self.finish());
        }

        self.scan_ports(&hosts).await?;

        let targets = self.worker.aggregator.action_targets();
        if targets.is_empty() {
            info!("No open ports, skipping service actions");
            return Ok(self.finish());
        }
        if self.worker.is_cancelled() {
            return Ok(self.finish());
        }

        self.execute_actions(targets).await?;

        Ok(self.finish())
    }

    /// DISCOVERY: one ping sweep over the target network.
    pub async fn discover(&mut self, target: IpNetwork) -> Result<Vec<Host>> {
        self.transition(Phase::Discovery);
        let worker = &self.worker;
        let kind = PhaseKind::Discovery;

        worker.emit(Phase::Discovery, ScanEvent::PhaseStarted { targets: 1 });

        let invoke_target = InvokeTarget::Network(target);
        worker.emit(
            Phase::Discovery,
            ScanEvent::SubScanStarted {
                target: invoke_target.to_string(),
                actions: Vec::new(),
            },
        );

        let mut stats = PhaseStats::default();
        let invocation = worker
            .guarded(worker.engine.invoke(
                kind,
                &invoke_target,
                &PhaseParams::default(),
                worker.settings.discovery_timeout,
            ))
            .await;

        let hosts = match invocation {
            Some(invocation) => {
                let (report, fixed) = read_report(&invocation?, &invoke_target);
                let hosts = worker.aggregator.record_discovery(&report);
                for host in &hosts {
                    worker.emit(
                        Phase::Discovery,
                        ScanEvent::HostDiscovered {
                            address: host.address,
                            mac: host.mac.clone(),
                            vendor: host.vendor.clone(),
                        },
                    );
                }
                let outcome = fixed.unwrap_or(found_or_empty(hosts.len()));
                stats.record(worker.finish_sub(kind, &invoke_target, outcome, hosts.len()));
                hosts
            }
            None => {
                stats.record(worker.finish_sub(kind, &invoke_target, Outcome::Skipped, 0));
                Vec::new()
            }
        };

        info!("Discovery found {} live host(s)", hosts.len());
        worker.emit(Phase::Discovery, ScanEvent::PhaseCompleted { stats });
        Ok(hosts)
    }

    /// PORT_SCAN: one invocation per host, bounded by the rate limiter.
    pub async fn scan_ports(&mut self, hosts: &[IpAddr]) -> Result<PhaseStats> {
        self.transition(Phase::PortScan);
        let worker = self.worker.clone();
        worker.emit(Phase::PortScan, ScanEvent::PhaseStarted { targets: hosts.len() });

        let mut stats = PhaseStats::default();
        let mut set = JoinSet::new();

        for &host in hosts {
            if worker.is_cancelled() {
                let target = InvokeTarget::Host(host);
                stats.record(worker.finish_sub(PhaseKind::PortScan, &target, Outcome::Skipped, 0));
                continue;
            }
            let task = worker.clone();
            set.spawn(async move { task.scan_host(host).await });
        }

        drain(&mut set, &mut stats).await?;

        info!(
            "Port scan complete: {} open port(s) across {} host(s)",
            worker.aggregator.port_count(),
            hosts.len()
        );
        worker.emit(Phase::PortScan, ScanEvent::PhaseCompleted { stats });
        Ok(stats)
    }

    /// ACTION_EXEC: select then invoke for each distinct open port.
    pub async fn execute_actions(&mut self, targets: Vec<ActionTarget>) -> Result<PhaseStats> {
        self.transition(Phase::ActionExec);
        let worker = self.worker.clone();

        // Identical (host, port) requests are dispatched once.
        let mut seen = BTreeSet::new();
        let targets: Vec<ActionTarget> = targets.into_iter().filter(|t| seen.insert(t.key())).collect();

        worker.emit(Phase::ActionExec, ScanEvent::PhaseStarted { targets: targets.len() });

        let mut stats = PhaseStats::default();
        let mut set = JoinSet::new();

        for target in targets {
            if worker.is_cancelled() {
                let invoke_target = InvokeTarget::Service {
                    host: target.host,
                    port: target.port,
                    protocol: target.protocol,
                };
                stats.record(worker.finish_sub(PhaseKind::Action, &invoke_target, Outcome::Skipped, 0));
                continue;
            }
            let task = worker.clone();
            set.spawn(async move { task.run_actions(target).await });
        }

        drain(&mut set, &mut stats).await?;

        info!(
            "Service actions complete: {} found, {} empty, {} timed out",
            stats.found, stats.empty, stats.timed_out
        );
        worker.emit(Phase::ActionExec, ScanEvent::PhaseCompleted { stats });
        Ok(stats)
    }

    fn finish(&mut self) -> SessionOutcome {
        self.transition(Phase::Done);
        let aggregator = &self.worker.aggregator;
        let outcome = SessionOutcome {
            hosts: aggregator.host_count(),
            open_ports: aggregator.port_count(),
            actions: aggregator.action_results().len(),
            cancelled: self.worker.is_cancelled(),
        };

        if outcome.cancelled {
            warn!("Scan interrupted, results are partial");
        }
        self.worker.emit(
            Phase::Done,
            ScanEvent::ScanComplete {
                hosts: outcome.hosts,
                open_ports: outcome.open_ports,
                actions: outcome.actions,
                cancelled: outcome.cancelled,
            },
        );
        outcome
    }

    fn transition(&mut self, next: Phase) {
        if next <= self.state {
            warn!("Ignoring backward transition {} -> {}", self.state, next);
            return;
        }
        debug!("Phase {} -> {}", self.state, next);
        self.state = next;
    }
}

impl Worker {
    fn emit(&self, phase: Phase, event: ScanEvent) {
        self.emitter.emit(phase, event);
    }

    fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn finish_sub(&self, kind: PhaseKind, target: &InvokeTarget, outcome: Outcome, findings: usize) -> Outcome {
        self.emit(
            kind.phase(),
            ScanEvent::SubScanFinished {
                target: target.to_string(),
                outcome,
                findings,
            },
        );
        outcome
    }

    /// Run `fut` to completion unless an interrupt arrives. After an
    /// interrupt it gets the grace period, then is dropped (killing the
    /// child process).
    async fn guarded<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        let mut shutdown = self.shutdown.clone();
        tokio::pin!(fut);

        tokio::select! {
            out = &mut fut => Some(out),
            _ = interrupted(&mut shutdown) => {
                // Wake tasks still queued for a permit so they report Skipped.
                self.limiter.close().await;
                debug!("Interrupted, allowing {}s for in-flight scan", self.settings.grace.as_secs());
                tokio::time::timeout(self.settings.grace, fut).await.ok()
            }
        }
    }

    async fn scan_host(&self, host: IpAddr) -> Result<Outcome> {
        let kind = PhaseKind::PortScan;
        let target = InvokeTarget::Host(host);

        let Some(_permit) = self.limiter.acquire(host).await else {
            return Ok(self.finish_sub(kind, &target, Outcome::Skipped, 0));
        };
        if self.is_cancelled() {
            return Ok(self.finish_sub(kind, &target, Outcome::Skipped, 0));
        }

        self.emit(
            Phase::PortScan,
            ScanEvent::SubScanStarted {
                target: target.to_string(),
                actions: Vec::new(),
            },
        );

        let invocation = self
            .guarded(self.engine.invoke(kind, &target, &PhaseParams::default(), self.settings.port_timeout))
            .await;
        let Some(invocation) = invocation else {
            return Ok(self.finish_sub(kind, &target, Outcome::Skipped, 0));
        };

        let (report, fixed) = read_report(&invocation?, &target);
        let ports = self.aggregator.record_ports(host, &report);
        for port in &ports {
            self.emit(
                Phase::PortScan,
                ScanEvent::PortOpen {
                    address: host,
                    port: port.number,
                    protocol: port.protocol,
                    service: port.service.clone(),
                },
            );
        }

        let outcome = fixed.unwrap_or(found_or_empty(ports.len()));
        Ok(self.finish_sub(kind, &target, outcome, ports.len()))
    }

    async fn run_actions(&self, target: ActionTarget) -> Result<Outcome> {
        let kind = PhaseKind::Action;
        let service = target.service.as_deref().unwrap_or("unknown");
        let invoke_target = InvokeTarget::Service {
            host: target.host,
            port: target.port,
            protocol: target.protocol,
        };

        let actions: Vec<String> = self
            .selector
            .select(service, u32::from(target.port), self.settings.action_limit)?
            .into_iter()
            .map(|a| a.name)
            .collect();

        let Some(_permit) = self.limiter.acquire(target.host).await else {
            return Ok(self.finish_sub(kind, &invoke_target, Outcome::Skipped, 0));
        };
        if self.is_cancelled() {
            return Ok(self.finish_sub(kind, &invoke_target, Outcome::Skipped, 0));
        }

        self.emit(
            Phase::ActionExec,
            ScanEvent::SubScanStarted {
                target: invoke_target.to_string(),
                actions: actions.clone(),
            },
        );

        let params = PhaseParams::actions(actions.clone());
        let invocation = self
            .guarded(self.engine.invoke(kind, &invoke_target, &params, self.settings.action_timeout))
            .await;
        let Some(invocation) = invocation else {
            return Ok(self.finish_sub(kind, &invoke_target, Outcome::Skipped, 0));
        };

        let (report, fixed) = read_report(&invocation?, &invoke_target);
        let reported = report.host(target.host).and_then(|h| {
            h.ports
                .iter()
                .find(|p| p.number == target.port && p.protocol == target.protocol)
        });
        let scripts = reported.map(|p| p.scripts.clone()).unwrap_or_default();
        let refinement = reported.and_then(|p| p.service.as_ref());

        for script in &scripts {
            self.emit(
                Phase::ActionExec,
                ScanEvent::ActionOutput {
                    address: target.host,
                    port: target.port,
                    action: script.action.clone(),
                    output: script.output.clone(),
                    findings: script.findings.clone(),
                },
            );
        }

        let outcome = fixed.unwrap_or(found_or_empty(scripts.len()));
        let findings = scripts.len();
        let refined = self.aggregator.record_action(
            PortActionResult {
                host: target.host,
                port: target.port,
                protocol: target.protocol,
                actions,
                outcome,
                scripts,
            },
            refinement,
        )?;

        if refined {
            if let Some(port) = self.aggregator.port(&target.key()) {
                if let Some(service) = port.service.clone() {
                    self.emit(
                        Phase::ActionExec,
                        ScanEvent::ServiceRefined {
                            address: target.host,
                            port: target.port,
                            protocol: target.protocol,
                            service,
                            fingerprint: port.fingerprint.clone(),
                        },
                    );
                }
            }
        }

        Ok(self.finish_sub(kind, &invoke_target, outcome, findings))
    }
}

/// Collect every sub-scan of a phase. A fatal error aborts the siblings.
async fn drain(set: &mut JoinSet<Result<Outcome>>, stats: &mut PhaseStats) -> Result<()> {
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(outcome)) => stats.record(outcome),
            Ok(Err(e)) if e.is_fatal() => {
                error!("Aborting phase: {}", e);
                set.abort_all();
                return Err(e);
            }
            Ok(Err(e)) => {
                warn!("Sub-scan failed: {}", e);
                stats.record(Outcome::Empty);
            }
            Err(e) => {
                error!("Sub-scan task failed: {}", e);
                stats.record(Outcome::Empty);
            }
        }
    }
    Ok(())
}

/// Parse whatever the engine produced. Empty results parse the placeholder
/// document and carry a fixed outcome; unparseable output is Malformed.
fn read_report(invocation: &Invocation, target: &InvokeTarget) -> (EngineReport, Option<Outcome>) {
    let fixed = invocation.result.empty_reason().map(|reason| match reason {
        EmptyReason::Timeout => Outcome::Timeout,
        EmptyReason::NoOutput => Outcome::Empty,
        EmptyReason::Skipped => Outcome::Skipped,
    });

    debug!("Engine finished {} in {:.1}s", target, invocation.elapsed.as_secs_f64());

    match xml::parse(invocation.result.document()) {
        Ok(report) => (report, fixed),
        Err(e) => {
            warn!("Discarding engine output for {}: {}", target, e);
            if !invocation.stderr.trim().is_empty() {
                warn!("Engine stderr for {}: {}", target, invocation.stderr.trim());
            }
            (EngineReport::default(), Some(Outcome::Malformed))
        }
    }
}

fn found_or_empty(count: usize) -> Outcome {
    if count > 0 {
        Outcome::Found
    } else {
        Outcome::Empty
    }
}

async fn interrupted(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender can never signal, so wait forever.
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
