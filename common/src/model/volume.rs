use serde::{Deserialize, Serialize};

use crate::ids::{ServiceId, VolumeId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub service_id: ServiceId,
    pub name: String,
    pub container_path: String,
    pub mode: AccessMode,
    /// Bind mount source on the host, if not a managed named volume.
    pub host_path: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Rw,
    Ro,
}

impl AccessMode {
    pub fn is_read_only(self) -> bool {
        matches!(self, AccessMode::Ro)
    }
}
