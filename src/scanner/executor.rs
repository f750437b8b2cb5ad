use async_trait::async_trait;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::error::{Result, ScanError};
use crate::models::{PhaseKind, Protocol};
use crate::scanner::xml::EMPTY_DOCUMENT;

/// What one invocation is pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeTarget {
    Network(IpNetwork),
    Host(IpAddr),
    Service {
        host: IpAddr,
        port: u16,
        protocol: Protocol,
    },
}

impl InvokeTarget {
    fn address(&self) -> IpAddr {
        match self {
            InvokeTarget::Network(net) => net.ip(),
            InvokeTarget::Host(ip) => *ip,
            InvokeTarget::Service { host, .. } => *host,
        }
    }
}

impl fmt::Display for InvokeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeTarget::Network(net) => write!(f, "{}", net),
            InvokeTarget::Host(ip) => write!(f, "{}", ip),
            InvokeTarget::Service {
                host: IpAddr::V6(v6),
                port,
                ..
            } => write!(f, "[{}]:{}", v6, port),
            InvokeTarget::Service { host, port, .. } => write!(f, "{}:{}", host, port),
        }
    }
}

/// Phase-specific extras. Only the action phase carries any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseParams {
    pub actions: Vec<String>,
}

impl PhaseParams {
    pub fn actions(actions: Vec<String>) -> Self {
        Self { actions }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    Timeout,
    NoOutput,
    Skipped,
}

/// Engine output, or an explicit "no data" sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawResult {
    Document(String),
    Empty(EmptyReason),
}

impl RawResult {
    /// The document to parse. Empty results yield the placeholder document.
    pub fn document(&self) -> &str {
        match self {
            RawResult::Document(xml) => xml,
            RawResult::Empty(_) => EMPTY_DOCUMENT,
        }
    }

    pub fn empty_reason(&self) -> Option<EmptyReason> {
        match self {
            RawResult::Empty(reason) => Some(*reason),
            RawResult::Document(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub result: RawResult,
    /// Engine standard error, kept for diagnostics only.
    pub stderr: String,
    pub elapsed: Duration,
}

impl Invocation {
    pub fn empty(reason: EmptyReason) -> Self {
        Self {
            result: RawResult::Empty(reason),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// One engine call per phase target.
///
/// Implementations return `Err` only for `InvalidInput` and
/// `EngineUnavailable`; anything else becomes `RawResult::Empty`.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    async fn invoke(
        &self,
        phase: PhaseKind,
        target: &InvokeTarget,
        params: &PhaseParams,
        timeout: Duration,
    ) -> Result<Invocation>;
}

/// Wrapper for executing the nmap binary
pub struct NmapEngine {
    binary: PathBuf,
    settings: EngineSettings,
}

impl NmapEngine {
    pub fn new(binary: impl Into<PathBuf>, settings: EngineSettings) -> Self {
        Self {
            binary: binary.into(),
            settings,
        }
    }

    /// Confirm the binary runs before a session starts.
    pub async fn locate(binary: &Path, settings: EngineSettings) -> Result<Self> {
        let unavailable = |reason: String| ScanError::EngineUnavailable {
            engine: binary.display().to_string(),
            reason,
        };

        let mut probe = Command::new(binary);
        probe.arg("--version").stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(10), probe.output())
            .await
            .map_err(|_| unavailable("version probe timed out".to_string()))?
            .map_err(|e| unavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(unavailable(format!("version probe exited with {}", output.status)));
        }

        let banner = String::from_utf8_lossy(&output.stdout);
        info!(
            "Using {}",
            banner.lines().find(|l| !l.trim().is_empty()).unwrap_or("nmap")
        );

        Ok(Self::new(binary, settings))
    }

    /// Engine arguments for one invocation. XML goes to stdout.
    pub fn build_args(
        &self,
        phase: PhaseKind,
        target: &InvokeTarget,
        params: &PhaseParams,
    ) -> Result<Vec<String>> {
        let s = &self.settings;
        let mut args: Vec<String> = Vec::new();

        if target.address().is_ipv6() {
            args.push("-6".into());
        }

        match (phase, target) {
            (PhaseKind::Discovery, InvokeTarget::Network(_) | InvokeTarget::Host(_)) => {
                // Ping sweep only
                args.extend(["-sn".into(), "-n".into()]);
                args.extend(["--max-retries".into(), s.max_retries.to_string()]);
            }
            (PhaseKind::PortScan, InvokeTarget::Host(_)) => {
                args.extend(["-Pn".into(), "-n".into()]);
                args.extend(["--top-ports".into(), s.top_ports.to_string()]);
                args.extend(["--host-timeout".into(), secs(s.host_timeout)]);
                args.extend(["--max-rtt-timeout".into(), millis(s.max_rtt_timeout)]);
                args.extend(["--scan-delay".into(), millis(s.scan_delay)]);
                args.extend(["--max-retries".into(), s.max_retries.to_string()]);
            }
            (PhaseKind::Action, InvokeTarget::Service { port, protocol, .. }) => {
                if params.actions.is_empty() {
                    return Err(ScanError::invalid("action phase needs at least one action"));
                }
                args.extend(["-Pn".into(), "-n".into(), "-sV".into()]);
                let port_spec = match protocol {
                    Protocol::Tcp => port.to_string(),
                    Protocol::Udp => {
                        args.push("-sU".into());
                        format!("U:{}", port)
                    }
                    Protocol::Sctp => {
                        args.push("-sY".into());
                        format!("S:{}", port)
                    }
                };
                args.extend(["-p".into(), port_spec]);
                args.extend(["--script".into(), params.actions.join(",")]);
                args.extend(["--host-timeout".into(), secs(s.host_timeout)]);
            }
            (phase, target) => {
                return Err(ScanError::invalid(format!(
                    "{} cannot target {}",
                    phase, target
                )));
            }
        }

        args.extend(["-oX".into(), "-".into()]);
        args.push(match target {
            InvokeTarget::Network(net) => net.to_string(),
            other => other.address().to_string(),
        });

        Ok(args)
    }
}

#[async_trait]
impl ScanEngine for NmapEngine {
    async fn invoke(
        &self,
        phase: PhaseKind,
        target: &InvokeTarget,
        params: &PhaseParams,
        timeout: Duration,
    ) -> Result<Invocation> {
        if phase == PhaseKind::Action && params.actions.is_empty() {
            debug!("No actions selected for {}, skipping engine", target);
            return Ok(Invocation::empty(EmptyReason::Skipped));
        }

        let args = self.build_args(phase, target, params)?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing {} {}", self.binary.display(), args.join(" "));

        let started = Instant::now();
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ScanError::EngineUnavailable {
                    engine: self.binary.display().to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                warn!("Failed to start engine for {}: {}", target, e);
                return Ok(Invocation::empty(EmptyReason::NoOutput));
            }
        };

        // Dropping the wait future on timeout kills the child.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Engine I/O failed for {}: {}", target, e);
                return Ok(Invocation::empty(EmptyReason::NoOutput));
            }
            Err(_) => {
                let err = ScanError::InvocationTimeout {
                    phase: phase.to_string(),
                    target: target.to_string(),
                    after: timeout,
                };
                warn!("{}", err);
                return Ok(Invocation {
                    result: RawResult::Empty(EmptyReason::Timeout),
                    stderr: String::new(),
                    elapsed: started.elapsed(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let elapsed = started.elapsed();

        if !output.status.success() {
            warn!(
                "Engine exited with {} for {}: {}",
                output.status,
                target,
                stderr.trim()
            );
        } else if !stderr.trim().is_empty() {
            debug!("Engine stderr for {}: {}", target, stderr.trim());
        }

        let result = if stdout.trim().is_empty() {
            let err = ScanError::InvocationEmpty {
                phase: phase.to_string(),
                target: target.to_string(),
            };
            info!("{}", err);
            RawResult::Empty(EmptyReason::NoOutput)
        } else {
            RawResult::Document(stdout)
        };

        Ok(Invocation {
            result,
            stderr,
            elapsed,
        })
    }
}

fn secs(d: Duration) -> String {
    format!("{}s", d.as_secs().max(1))
}

fn millis(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> NmapEngine {
        NmapEngine::new("nmap", EngineSettings::default())
    }

    #[test]
    fn discovery_is_a_ping_sweep_over_the_network() {
        let net: IpNetwork = "192.168.1.0/24".parse().unwrap();
        let args = engine()
            .build_args(PhaseKind::Discovery, &InvokeTarget::Network(net), &PhaseParams::default())
            .unwrap();

        assert_eq!(args[0], "-sn");
        assert_eq!(args.last().unwrap(), "192.168.1.0/24");
        assert!(args.windows(2).any(|w| w == ["-oX", "-"]));
    }

    #[test]
    fn port_scan_carries_session_timeouts() {
        let args = engine()
            .build_args(
                PhaseKind::PortScan,
                &InvokeTarget::Host("10.0.0.1".parse().unwrap()),
                &PhaseParams::default(),
            )
            .unwrap();

        assert!(args.windows(2).any(|w| w == ["--top-ports", "1000"]));
        assert!(args.windows(2).any(|w| w == ["--host-timeout", "300s"]));
        assert!(args.windows(2).any(|w| w == ["--max-rtt-timeout", "500ms"]));
        assert!(args.windows(2).any(|w| w == ["--max-retries", "2"]));
    }

    #[test]
    fn action_restricts_to_one_port_and_joins_scripts() {
        let target = InvokeTarget::Service {
            host: "10.0.0.1".parse().unwrap(),
            port: 80,
            protocol: Protocol::Tcp,
        };
        let params = PhaseParams::actions(vec!["http-title".into(), "http-headers".into()]);
        let args = engine().build_args(PhaseKind::Action, &target, &params).unwrap();

        assert!(args.contains(&"-sV".to_string()));
        assert!(args.windows(2).any(|w| w == ["-p", "80"]));
        assert!(args.windows(2).any(|w| w == ["--script", "http-title,http-headers"]));
        assert_eq!(args.last().unwrap(), "10.0.0.1");
    }

    #[test]
    fn udp_actions_use_protocol_prefixed_ports() {
        let target = InvokeTarget::Service {
            host: "fd00::5".parse().unwrap(),
            port: 161,
            protocol: Protocol::Udp,
        };
        let args = engine()
            .build_args(PhaseKind::Action, &target, &PhaseParams::actions(vec!["snmp-info".into()]))
            .unwrap();

        assert_eq!(args[0], "-6");
        assert!(args.contains(&"-sU".to_string()));
        assert!(args.windows(2).any(|w| w == ["-p", "U:161"]));
    }

    #[test]
    fn mismatched_phase_and_target_is_invalid() {
        let net: IpNetwork = "10.0.0.0/24".parse().unwrap();
        let result = engine().build_args(PhaseKind::PortScan, &InvokeTarget::Network(net), &PhaseParams::default());
        assert!(matches!(result, Err(ScanError::InvalidInput(_))));
    }

    #[test]
    fn empty_results_hand_out_the_placeholder() {
        assert_eq!(RawResult::Empty(EmptyReason::Timeout).document(), EMPTY_DOCUMENT);
        assert_eq!(RawResult::Document("<nmaprun/>".into()).document(), "<nmaprun/>");
    }

    #[tokio::test]
    async fn skipped_action_never_spawns() {
        let engine = NmapEngine::new("/nonexistent/engine", EngineSettings::default());
        let target = InvokeTarget::Service {
            host: "10.0.0.1".parse().unwrap(),
            port: 80,
            protocol: Protocol::Tcp,
        };
        let invocation = engine
            .invoke(PhaseKind::Action, &target, &PhaseParams::default(), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(invocation.result, RawResult::Empty(EmptyReason::Skipped));
    }

    #[tokio::test]
    async fn missing_binary_is_engine_unavailable() {
        let engine = NmapEngine::new("/nonexistent/engine", EngineSettings::default());
        let result = engine
            .invoke(
                PhaseKind::PortScan,
                &InvokeTarget::Host("10.0.0.1".parse().unwrap()),
                &PhaseParams::default(),
                Duration::from_secs(1),
            )
            .await;

        assert!(matches!(result, Err(ScanError::EngineUnavailable { .. })));
    }

    /// Stand-in engine binary: a shell script with the given body.
    #[cfg(unix)]
    fn fake_engine(body: &str) -> (NmapEngine, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let path = std::env::temp_dir().join(format!("phasescan-engine-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (NmapEngine::new(&path, EngineSettings::default()), path)
    }

    #[cfg(unix)]
    async fn scan(engine: &NmapEngine, timeout: Duration) -> Invocation {
        engine
            .invoke(
                PhaseKind::PortScan,
                &InvokeTarget::Host("10.0.0.1".parse().unwrap()),
                &PhaseParams::default(),
                timeout,
            )
            .await
            .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_engine_is_cut_off_as_timeout() {
        let (engine, path) = fake_engine("exec sleep 30");

        let started = Instant::now();
        let invocation = scan(&engine, Duration::from_millis(200)).await;

        assert_eq!(invocation.result, RawResult::Empty(EmptyReason::Timeout));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(invocation.elapsed >= Duration::from_millis(200));
        std::fs::remove_file(path).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_is_kept_apart_from_the_document() {
        let (engine, path) = fake_engine("echo 'warning: no raw sockets' >&2\necho '<nmaprun/>'");

        let invocation = scan(&engine, Duration::from_secs(10)).await;

        assert_eq!(invocation.result, RawResult::Document("<nmaprun/>\n".into()));
        assert_eq!(invocation.stderr.trim(), "warning: no raw sockets");
        std::fs::remove_file(path).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_run_without_output_is_empty() {
        let (engine, path) = fake_engine("echo 'bad option' >&2\nexit 1");

        let invocation = scan(&engine, Duration::from_secs(10)).await;

        assert_eq!(invocation.result, RawResult::Empty(EmptyReason::NoOutput));
        assert_eq!(invocation.result.document(), EMPTY_DOCUMENT);
        std::fs::remove_file(path).unwrap();
    }
}
