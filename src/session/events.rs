//! Event stream emitted by the orchestrator.
//!
//! One JSON object per line. The field and variant names below are read by
//! the interpreter, including stored transcripts, and must stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{Finding, Outcome, Phase, Protocol};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    SessionStarted {
        session_id: Uuid,
        target: String,
        profile: String,
    },
    PhaseStarted {
        targets: usize,
    },
    HostDiscovered {
        address: IpAddr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mac: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vendor: Option<String>,
    },
    SubScanStarted {
        target: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        actions: Vec<String>,
    },
    PortOpen {
        address: IpAddr,
        port: u16,
        protocol: Protocol,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service: Option<String>,
    },
    ActionOutput {
        address: IpAddr,
        port: u16,
        action: String,
        output: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        findings: Vec<Finding>,
    },
    ServiceRefined {
        address: IpAddr,
        port: u16,
        #[serde(default = "default_protocol")]
        protocol: Protocol,
        service: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fingerprint: Option<String>,
    },
    SubScanFinished {
        target: String,
        outcome: Outcome,
        findings: usize,
    },
    PhaseCompleted {
        stats: PhaseStats,
    },
    ScanComplete {
        hosts: usize,
        open_ports: usize,
        actions: usize,
        #[serde(default)]
        cancelled: bool,
    },
}

fn default_protocol() -> Protocol {
    Protocol::Tcp
}

/// Per-phase tally of sub-scan outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub targets: usize,
    pub found: usize,
    pub empty: usize,
    pub timed_out: usize,
    pub malformed: usize,
    pub skipped: usize,
}

impl PhaseStats {
    pub fn record(&mut self, outcome: Outcome) {
        self.targets += 1;
        match outcome {
            Outcome::Found => self.found += 1,
            Outcome::Empty => self.empty += 1,
            Outcome::Timeout => self.timed_out += 1,
            Outcome::Malformed => self.malformed += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

/// One line of the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    #[serde(flatten)]
    pub event: ScanEvent,
}

impl EventRecord {
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

/// Sequenced sender side of the stream. Clones share the counter, and a
/// sequence number is taken and sent under the same lock so the channel
/// order always matches `seq`.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<EventRecord>>,
    seq: Arc<Mutex<u64>>,
}

impl EventEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Self {
            tx: Some(tx),
            seq: Arc::new(Mutex::new(0)),
        };
        (emitter, rx)
    }

    /// Emitter with no consumer, for standalone phase commands.
    pub fn detached() -> Self {
        Self {
            tx: None,
            seq: Arc::new(Mutex::new(0)),
        }
    }

    pub fn emit(&self, phase: Phase, event: ScanEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        let mut seq = self.seq.lock().unwrap_or_else(|e| e.into_inner());
        let record = EventRecord {
            seq: *seq,
            timestamp: Utc::now(),
            phase,
            event,
        };
        *seq += 1;
        // A closed receiver only means nobody is listening any more.
        let _ = tx.send(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_flatten_into_one_object_per_line() {
        let record = EventRecord {
            seq: 7,
            timestamp: Utc::now(),
            phase: Phase::PortScan,
            event: ScanEvent::PortOpen {
                address: "10.0.0.1".parse().unwrap(),
                port: 80,
                protocol: Protocol::Tcp,
                service: Some("http".into()),
            },
        };
        let line = record.to_line().unwrap();

        assert!(!line.contains('\n'));
        assert!(line.contains(r#""event":"port_open""#));
        assert!(line.contains(r#""phase":"PORT_SCAN""#));
        assert_eq!(EventRecord::from_line(&line).unwrap(), record);
    }

    #[test]
    fn completion_event_carries_phase_stats() {
        let mut stats = PhaseStats::default();
        stats.record(Outcome::Found);
        stats.record(Outcome::Timeout);

        let record = EventRecord {
            seq: 0,
            timestamp: Utc::now(),
            phase: Phase::ActionExec,
            event: ScanEvent::PhaseCompleted { stats },
        };
        let value: serde_json::Value = serde_json::from_str(&record.to_line().unwrap()).unwrap();

        assert_eq!(value["event"], "phase_completed");
        assert_eq!(value["stats"]["targets"], 2);
        assert_eq!(value["stats"]["timed_out"], 1);
    }

    #[tokio::test]
    async fn emitter_sequences_across_clones() {
        let (emitter, mut rx) = EventEmitter::new();
        let other = emitter.clone();

        emitter.emit(Phase::Discovery, ScanEvent::PhaseStarted { targets: 1 });
        other.emit(Phase::Discovery, ScanEvent::PhaseStarted { targets: 1 });
        drop(emitter);
        drop(other);

        let mut seqs = Vec::new();
        while let Some(record) = rx.recv().await {
            seqs.push(record.seq);
        }
        assert_eq!(seqs, [0, 1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_emitters_deliver_in_sequence_order() {
        let (emitter, mut rx) = EventEmitter::new();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let emitter = emitter.clone();
            tasks.spawn(async move {
                for _ in 0..200 {
                    emitter.emit(Phase::PortScan, ScanEvent::PhaseStarted { targets: 0 });
                }
            });
        }
        while tasks.join_next().await.is_some() {}
        drop(emitter);

        let mut expected = 0;
        while let Some(record) = rx.recv().await {
            assert_eq!(record.seq, expected);
            expected += 1;
        }
        assert_eq!(expected, 1600);
    }

    #[test]
    fn refinement_carries_protocol_and_defaults_to_tcp() {
        let record = EventRecord {
            seq: 3,
            timestamp: Utc::now(),
            phase: Phase::ActionExec,
            event: ScanEvent::ServiceRefined {
                address: "10.0.0.1".parse().unwrap(),
                port: 53,
                protocol: Protocol::Udp,
                service: "domain".into(),
                fingerprint: None,
            },
        };
        let line = record.to_line().unwrap();
        assert!(line.contains(r#""protocol":"udp""#));

        let legacy = line.replace(r#""protocol":"udp","#, "");
        match EventRecord::from_line(&legacy).unwrap().event {
            ScanEvent::ServiceRefined { protocol, .. } => assert_eq!(protocol, Protocol::Tcp),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
