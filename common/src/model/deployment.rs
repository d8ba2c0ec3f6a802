use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChangeId, DeploymentId, ServiceId};
use crate::model::service::ServiceSpec;

/// The frozen, fully-resolved service definition captured inside a deployment.
/// Every later activity reads this, never the live service.
pub type Snapshot = ServiceSpec;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub service_id: ServiceId,
    /// Short opaque token, prefixed by a type marker (`d-` docker, `g-` git).
    pub hash: String,
    pub slot: Slot,
    pub status: DeploymentStatus,
    pub status_reason: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub build_started_at: Option<DateTime<Utc>>,
    pub build_finished_at: Option<DateTime<Utc>>,
    pub snapshot: Snapshot,
    pub changes: Vec<ChangeId>,
    pub is_current_production: bool,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub image_tag: Option<String>,
    /// Generated per-slot network alias, e.g. `blue-my-service`.
    pub network_alias: String,
    /// Set once the deployment's swarm service has actually been created.
    /// Distinguishes "failed while still provisioning" from "failed after
    /// it was already running", which is what the slot reuse-vs-alternate
    /// rule keys off.
    pub reached_swarm_service: bool,
}

impl Deployment {
    /// `srv-<project_id>-<service_id>-<deployment_hash>`.
    pub fn swarm_service_name(&self, project_id_slug: &str) -> String {
        format!("srv-{}-{}-{}", project_id_slug, self.service_id, self.hash)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            DeploymentStatus::Healthy
                | DeploymentStatus::Unhealthy
                | DeploymentStatus::Failed
                | DeploymentStatus::Cancelled
                | DeploymentStatus::Sleeping
                | DeploymentStatus::Removed
        )
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.status,
            DeploymentStatus::Queued
                | DeploymentStatus::Preparing
                | DeploymentStatus::Building
                | DeploymentStatus::Starting
                | DeploymentStatus::Restarting
                | DeploymentStatus::Cancelling
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Queued,
    Preparing,
    Building,
    Starting,
    Restarting,
    Cancelling,
    Healthy,
    Unhealthy,
    Failed,
    Cancelled,
    Sleeping,
    Removed,
}

impl DeploymentStatus {
    /// Terminal-without-ever-running statuses: the deploy gave up before or
    /// during provisioning rather than after going live.
    pub fn is_failed_without_service(self) -> bool {
        matches!(self, DeploymentStatus::Failed | DeploymentStatus::Cancelled)
    }
}

/// Blue/green slot. The wire format uses the literal strings `BLUE`/`GREEN`,
/// so `Display`/`FromStr` are hand-rolled rather than derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    Blue,
    Green,
}

impl Slot {
    pub fn alternate(self) -> Self {
        match self {
            Slot::Blue => Slot::Green,
            Slot::Green => Slot::Blue,
        }
    }

    /// The alias this slot's deployment is addressed by inside the environment
    /// overlay network: `<slot>-<network_alias>`.
    pub fn qualify_alias(self, network_alias: &str) -> String {
        format!("{}-{}", self.to_string().to_lowercase(), network_alias)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Blue => write!(f, "BLUE"),
            Slot::Green => write!(f, "GREEN"),
        }
    }
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BLUE" => Ok(Slot::Blue),
            "GREEN" => Ok(Slot::Green),
            other => Err(format!("unknown slot: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_alternates() {
        assert_eq!(Slot::Blue.alternate(), Slot::Green);
        assert_eq!(Slot::Green.alternate(), Slot::Blue);
    }

    #[test]
    fn slot_roundtrips_as_uppercase_literal() {
        assert_eq!(Slot::Blue.to_string(), "BLUE");
        assert_eq!("GREEN".parse::<Slot>().unwrap(), Slot::Green);
    }

    #[test]
    fn qualify_alias_lowercases_slot_prefix() {
        assert_eq!(Slot::Blue.qualify_alias("api"), "blue-api");
    }
}
