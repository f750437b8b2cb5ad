//! Service to action ranking.
//!
//! Resolution runs in three explicit tiers: an exact entry for the
//! normalized service name, then every service family whose patterns match
//! the name (or, for an unnamed service, the well-known port), and finally a
//! generic list. Output order is score descending, table order on ties.

mod table;

use std::collections::HashMap;
use tracing::debug;

use crate::error::{Result, ScanError};
use crate::models::{Action, ActionSource};

pub use table::TABLE_VERSION;
use table::{ActionSpec, CATEGORIES, GENERIC_ACTIONS, PORT_HINTS, SERVICE_TABLE};

/// Fallback candidates are less certain than an exact entry.
const CATEGORY_WEIGHT: f32 = 0.8;

/// Names the engine uses when it could not identify the service.
const UNNAMED: &[&str] = &["", "unknown", "tcpwrapped"];

#[derive(Debug, Clone, Default)]
pub struct ScriptSelector;

/// Candidate while resolving: `rank` is the position in the mapping table.
struct Candidate {
    name: &'static str,
    description: &'static str,
    score_sum: f32,
    hits: u32,
    rank: usize,
}

impl ScriptSelector {
    pub fn new() -> Self {
        Self
    }

    pub fn table_version(&self) -> u32 {
        TABLE_VERSION
    }

    /// Rank at most `limit` actions for `service` on `port`.
    ///
    /// Never empty for `limit > 0`. Unknown services fall through to the
    /// generic tier instead of failing.
    pub fn select(&self, service: &str, port: u32, limit: usize) -> Result<Vec<Action>> {
        if port == 0 || port > u32::from(u16::MAX) {
            return Err(ScanError::invalid(format!(
                "port {} outside 1-65535",
                port
            )));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let name = normalize(service);
        let mut actions = self
            .exact(&name)
            .or_else(|| self.category(&name, port as u16))
            .unwrap_or_else(generic);

        // Stable sort keeps table order for equal scores.
        actions.sort_by(|a, b| b.score.total_cmp(&a.score));
        actions.truncate(limit);

        debug!(
            "Selected {} action(s) for {}/{} via {}",
            actions.len(),
            name,
            port,
            actions.first().map(|a| a.source).unwrap_or(ActionSource::GenericFallback)
        );

        Ok(actions)
    }

    fn exact(&self, name: &str) -> Option<Vec<Action>> {
        let entry = SERVICE_TABLE.iter().find(|e| e.service == name)?;
        Some(
            entry
                .actions
                .iter()
                .map(|spec| to_action(spec, spec.score, ActionSource::ExactMatch))
                .collect(),
        )
    }

    fn category(&self, name: &str, port: u16) -> Option<Vec<Action>> {
        let mut families: Vec<&str> = Vec::new();

        if UNNAMED.contains(&name) {
            if let Some((_, service)) = PORT_HINTS.iter().find(|(p, _)| *p == port) {
                families.push(*service);
            }
        } else {
            for category in CATEGORIES {
                if category.patterns.iter().any(|p| name.contains(p)) {
                    debug!("Service {} falls in the {} family", name, category.name);
                    families.extend(category.services.iter().copied());
                }
            }
            // Loose containment against table keys, both ways: "mysqlx" ->
            // "mysql", "oracle" -> "oracle-tns".
            for entry in SERVICE_TABLE {
                let wider = entry.service.len() >= 3 && name.contains(entry.service);
                let narrower = name.len() >= 3 && entry.service.contains(name);
                if wider || narrower {
                    families.push(entry.service);
                }
            }
        }

        families.dedup();
        if families.is_empty() {
            return None;
        }

        Some(merge_families(&families))
    }
}

/// Merge the action lists of several families. An action offered by more
/// than one family gets the mean of its scores.
fn merge_families(families: &[&str]) -> Vec<Action> {
    let mut merged: HashMap<&'static str, Candidate> = HashMap::new();
    let mut seen = Vec::new();

    for (entry_idx, entry) in SERVICE_TABLE.iter().enumerate() {
        if !families.contains(&entry.service) || seen.contains(&entry.service) {
            continue;
        }
        seen.push(entry.service);

        for (action_idx, spec) in entry.actions.iter().enumerate() {
            let rank = entry_idx * 100 + action_idx;
            merged
                .entry(spec.name)
                .and_modify(|c| {
                    c.score_sum += spec.score;
                    c.hits += 1;
                    c.rank = c.rank.min(rank);
                })
                .or_insert(Candidate {
                    name: spec.name,
                    description: spec.description,
                    score_sum: spec.score,
                    hits: 1,
                    rank,
                });
        }
    }

    let mut candidates: Vec<Candidate> = merged.into_values().collect();
    // HashMap order is discarded here; rank restores table order.
    candidates.sort_by_key(|c| c.rank);

    candidates
        .into_iter()
        .map(|c| Action {
            name: c.name.to_string(),
            description: c.description.to_string(),
            score: (c.score_sum / c.hits as f32) * CATEGORY_WEIGHT,
            source: ActionSource::CategoryFallback,
        })
        .collect()
}

fn generic() -> Vec<Action> {
    GENERIC_ACTIONS
        .iter()
        .map(|spec| to_action(spec, spec.score, ActionSource::GenericFallback))
        .collect()
}

fn to_action(spec: &ActionSpec, score: f32, source: ActionSource) -> Action {
    Action {
        name: spec.name.to_string(),
        description: spec.description.to_string(),
        score,
        source,
    }
}

/// Lowercase, drop the engine's `?` guess marker, and fold `ssl/<svc>`
/// tunnels onto their TLS service name.
pub fn normalize(service: &str) -> String {
    let name = service.trim().trim_end_matches('?').to_ascii_lowercase();
    match name.strip_prefix("ssl/") {
        Some("http") => "https".to_string(),
        Some(inner) => inner.to_string(),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(actions: &[Action]) -> Vec<&str> {
        actions.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn exact_match_returns_top_three_in_score_order() {
        let selector = ScriptSelector::new();
        let actions = selector.select("http", 80, 3).unwrap();

        assert_eq!(names(&actions), ["http-title", "http-headers", "http-methods"]);
        assert!(actions.iter().all(|a| a.source == ActionSource::ExactMatch));
    }

    #[test]
    fn results_are_bounded_sorted_and_deterministic() {
        let selector = ScriptSelector::new();
        for service in ["http", "ssh", "http-proxy", "mysqlx", "mystery", "", "ssl/http"] {
            let first = selector.select(service, 8080, 3).unwrap();
            let second = selector.select(service, 8080, 3).unwrap();

            assert!(!first.is_empty() && first.len() <= 3, "{}", service);
            assert!(first.windows(2).all(|w| w[0].score >= w[1].score), "{}", service);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn category_fallback_matches_substrings() {
        let selector = ScriptSelector::new();
        let actions = selector.select("http-proxy", 3128, 3).unwrap();

        assert_eq!(actions[0].name, "http-title");
        assert!(actions.iter().all(|a| a.source == ActionSource::CategoryFallback));
        assert!(actions[0].score < 0.95);
    }

    #[test]
    fn merged_categories_average_shared_actions() {
        // "ssl-web" hits both the web and tls families; http-title is in both.
        let selector = ScriptSelector::new();
        let actions = selector.select("ssl-web", 4443, 10).unwrap();
        let title = actions.iter().find(|a| a.name == "http-title").unwrap();

        let expected = ((0.95 + 0.8) / 2.0) * CATEGORY_WEIGHT;
        assert!((title.score - expected).abs() < 1e-6);
        assert_eq!(names(&actions).iter().filter(|n| **n == "http-title").count(), 1);
    }

    #[test]
    fn ties_follow_table_order() {
        // snmp-info and snmp-sysdescr share a score.
        let selector = ScriptSelector::new();
        let actions = selector.select("snmp", 161, 3).unwrap();
        assert_eq!(names(&actions), ["snmp-info", "snmp-sysdescr"]);
    }

    #[test]
    fn unnamed_service_uses_port_hint() {
        let selector = ScriptSelector::new();
        let actions = selector.select("unknown", 22, 3).unwrap();

        assert_eq!(actions[0].name, "ssh-hostkey");
        assert_eq!(actions[0].source, ActionSource::CategoryFallback);
    }

    #[test]
    fn truncated_service_name_matches_longer_table_key() {
        let selector = ScriptSelector::new();
        let actions = selector.select("oracle", 1521, 3).unwrap();

        assert_eq!(names(&actions), ["oracle-tns-version", "oracle-sid-brute"]);
        assert!(actions.iter().all(|a| a.source == ActionSource::CategoryFallback));
    }

    #[test]
    fn short_fragments_do_not_match_table_keys() {
        let selector = ScriptSelector::new();
        let actions = selector.select("ms", 40000, 3).unwrap();
        assert!(actions.iter().all(|a| a.source == ActionSource::GenericFallback));
    }

    #[test]
    fn unknown_service_gets_generic_fallback() {
        let selector = ScriptSelector::new();
        let actions = selector.select("zzz-proprietary", 40000, 3).unwrap();

        assert!(!actions.is_empty());
        assert!(actions.iter().all(|a| a.source == ActionSource::GenericFallback));
        assert_eq!(actions[0].name, "banner");
    }

    #[test]
    fn guess_marker_and_tls_prefix_are_normalized() {
        assert_eq!(normalize(" HTTP? "), "http");
        assert_eq!(normalize("ssl/http"), "https");
        assert_eq!(normalize("ssl/imap"), "imap");
    }

    #[test]
    fn zero_limit_is_empty() {
        let selector = ScriptSelector::new();
        assert!(selector.select("http", 80, 0).unwrap().is_empty());
    }

    #[test]
    fn rejects_out_of_range_ports() {
        let selector = ScriptSelector::new();
        assert!(matches!(
            selector.select("http", 0, 3),
            Err(ScanError::InvalidInput(_))
        ));
        assert!(matches!(
            selector.select("http", 65536, 3),
            Err(ScanError::InvalidInput(_))
        ));
        assert!(selector.select("http", 65535, 3).is_ok());
    }
}
