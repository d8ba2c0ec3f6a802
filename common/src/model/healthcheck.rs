use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    pub kind: HealthcheckKind,
    pub value: String,
    pub timeout_seconds: u32,
    pub interval_seconds: u32,
    pub associated_port: Option<u16>,
}

impl Healthcheck {
    pub const DEFAULT_TIMEOUT_SECONDS: u32 = 30;
    pub const DEFAULT_INTERVAL_SECONDS: u32 = 30;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthcheckKind {
    Command,
    HttpPath,
}
