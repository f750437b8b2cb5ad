pub mod aggregator;
pub mod events;

pub use aggregator::*;
pub use events::*;

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::Serialize;
use uuid::Uuid;

use crate::config::ScanProfile;

/// Identity of one orchestrated run.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub target: IpNetwork,
    pub profile: String,
    pub started_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(target: IpNetwork, profile: ScanProfile) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            profile: profile.name().to_string(),
            started_at: Utc::now(),
        }
    }
}
