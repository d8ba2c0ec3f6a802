use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{EnvironmentId, ServiceId};
use crate::model::config::Config;
use crate::model::healthcheck::Healthcheck;
use crate::model::port::PortMapping;
use crate::model::url::UrlRoute;
use crate::model::volume::Volume;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub environment_id: EnvironmentId,
    pub deploy_token: String,
    pub spec: ServiceSpec,
}

/// The fully-resolved declarative definition of a service. A [`crate::model::deployment::Deployment`]
/// carries a frozen copy of this as its snapshot; the live [`Service`] carries
/// the same shape as its currently-applied state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub slug: String,
    pub network_alias: String,
    pub source: ServiceSource,
    pub volumes: Vec<Volume>,
    pub configs: Vec<Config>,
    pub env_vars: BTreeMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub urls: Vec<UrlRoute>,
    pub healthcheck: Option<Healthcheck>,
    pub resource_limits: Option<ResourceLimits>,
    pub command: Option<String>,
}

impl ServiceSpec {
    pub fn has_rw_volumes_or_host_ports(&self) -> bool {
        self.volumes.iter().any(|v| !v.mode.is_read_only()) || self.ports.iter().any(|p| p.host_port.is_some())
    }

    pub fn requires_http_healthcheck_target(&self) -> bool {
        !self.urls.is_empty() || self.ports.iter().any(|p| p.is_http_only() || p.forwarded_port > 0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceSource {
    DockerImage {
        image: String,
        credentials: Option<RegistryCredentials>,
    },
    Git {
        repository_url: String,
        branch: String,
        commit_sha: Option<String>,
        builder: Builder,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Builder {
    Dockerfile {
        dockerfile_path: String,
        build_context: String,
    },
    StaticDir {
        publish_directory: String,
        is_spa: bool,
        index_page: String,
        not_found_page: Option<String>,
    },
    Nixpacks {
        is_static: bool,
    },
    Railpack {
        is_static: bool,
    },
}

impl Builder {
    pub fn name(&self) -> &'static str {
        match self {
            Builder::Dockerfile { .. } => "dockerfile",
            Builder::StaticDir { .. } => "static_dir",
            Builder::Nixpacks { .. } => "nixpacks",
            Builder::Railpack { .. } => "railpack",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpus: Option<f64>,
    pub memory_mb: Option<u64>,
}

// `f64` doesn't implement `Eq`; the control plane never NaNs these values so
// treating equality bitwise is safe and keeps `ServiceSpec: Eq` for snapshot
// byte-for-byte comparisons.
impl Eq for ResourceLimits {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_dir_default_fields_roundtrip_through_json() {
        let builder = Builder::StaticDir {
            publish_directory: "dist".into(),
            is_spa: true,
            index_page: "index.html".into(),
            not_found_page: None,
        };
        let json = serde_json::to_string(&builder).unwrap();
        let back: Builder = serde_json::from_str(&json).unwrap();
        assert_eq!(builder, back);
    }
}
