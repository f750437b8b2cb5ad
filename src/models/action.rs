use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use super::service::Protocol;

/// Resolution tier an action was selected from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ActionSource {
    ExactMatch,
    CategoryFallback,
    GenericFallback,
}

impl fmt::Display for ActionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionSource::ExactMatch => "exact-match",
            ActionSource::CategoryFallback => "category-fallback",
            ActionSource::GenericFallback => "generic-fallback",
        })
    }
}

/// A follow-up probe (an NSE script) ranked for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub description: String,
    pub score: f32,
    pub source: ActionSource,
}

/// How one action-phase dispatch ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Found,
    Empty,
    Timeout,
    Malformed,
    Skipped,
}

impl Outcome {
    pub fn has_findings(&self) -> bool {
        matches!(self, Outcome::Found)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Found => "found",
            Outcome::Empty => "empty",
            Outcome::Timeout => "timeout",
            Outcome::Malformed => "malformed",
            Outcome::Skipped => "skipped",
        })
    }
}

/// One `key = value` pair pulled out of a script's structured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub key: String,
    pub value: String,
}

/// Output of a single action against a single port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutput {
    pub action: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

/// Result of one action-phase dispatch against (host, port).
/// Append-only; repeated runs produce repeated entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortActionResult {
    pub host: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
    pub actions: Vec<String>,
    pub outcome: Outcome,
    pub scripts: Vec<ScriptOutput>,
}
