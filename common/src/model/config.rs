use serde::{Deserialize, Serialize};

use crate::ids::{ConfigId, ServiceId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub id: ConfigId,
    pub service_id: ServiceId,
    pub name: String,
    pub contents: String,
    pub mount_path: String,
    pub language_hint: Option<String>,
}
