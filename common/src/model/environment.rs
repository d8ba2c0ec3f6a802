use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{EnvironmentId, ProjectId};

/// `production` is reserved: it cannot be renamed or archived.
pub const PRODUCTION_ENVIRONMENT_NAME: &str = "production";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub project_id: ProjectId,
    pub name: String,
    pub status: EnvironmentStatus,
    /// Private overlay network this environment's services join.
    pub network_name: String,
    /// Name of the buildkit builder attached to this environment's network,
    /// created on demand the first time a Git service builds in it.
    pub builder_name: String,
    pub variables: BTreeMap<String, String>,
    pub preview: Option<PreviewConfig>,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        self.name == PRODUCTION_ENVIRONMENT_NAME
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentStatus {
    Active,
    Archived,
}

/// Present only on ephemeral, typically pull-request-tied environments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewConfig {
    pub basic_auth: Option<BasicAuthCredentials>,
    /// Opaque reference to the external PR this preview tracks, e.g. `owner/repo#42`.
    pub pull_request_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuthCredentials {
    pub username: String,
    /// Password hash computed at upsert time by the proxy configurator;
    /// never the plaintext password.
    pub password_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_name_is_reserved() {
        let env = Environment {
            id: EnvironmentId::new(),
            project_id: ProjectId::new(),
            name: PRODUCTION_ENVIRONMENT_NAME.to_string(),
            status: EnvironmentStatus::Active,
            network_name: "net".into(),
            builder_name: "builder".into(),
            variables: Default::default(),
            preview: None,
        };
        assert!(env.is_production());
    }
}
