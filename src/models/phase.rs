use serde::{Deserialize, Serialize};
use std::fmt;

/// Orchestrator state. The serialized names are part of the event stream
/// contract and must not change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    Discovery,
    PortScan,
    ActionExec,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::Discovery => "DISCOVERY",
            Phase::PortScan => "PORT_SCAN",
            Phase::ActionExec => "ACTION_EXEC",
            Phase::Done => "DONE",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::Discovery => "HOST DISCOVERY",
            Phase::PortScan => "PORT SCANNING",
            Phase::ActionExec => "SERVICE ACTIONS",
            Phase::Done => "SCAN COMPLETE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three phases that invoke the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    Discovery,
    PortScan,
    Action,
}

impl PhaseKind {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseKind::Discovery => Phase::Discovery,
            PhaseKind::PortScan => Phase::PortScan,
            PhaseKind::Action => Phase::ActionExec,
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.phase().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_names_match_wire_format() {
        for phase in [
            Phase::Idle,
            Phase::Discovery,
            Phase::PortScan,
            Phase::ActionExec,
            Phase::Done,
        ] {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase.as_str()));
        }
    }
}
