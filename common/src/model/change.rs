use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChangeId, DeploymentId, ServiceId};

/// A pending, typed mutation to a [`crate::model::service::Service`], accumulated by
/// the change ledger until a deploy validates and applies it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub service_id: ServiceId,
    pub field: String,
    pub change_type: ChangeType,
    pub new_value: Value,
    pub old_value: Option<Value>,
    /// Set when this change targets one item of a list-valued field (a volume,
    /// config, port, or URL) by id.
    pub item_id: Option<String>,
    pub applied: bool,
    pub deployment_id: Option<DeploymentId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Update,
    Delete,
}
