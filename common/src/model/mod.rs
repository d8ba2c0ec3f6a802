pub mod change;
pub mod config;
pub mod deployment;
pub mod environment;
pub mod healthcheck;
pub mod port;
pub mod project;
pub mod service;
pub mod url;
pub mod volume;

pub use change::{Change, ChangeType};
pub use config::Config;
pub use deployment::{Deployment, DeploymentStatus, Slot, Snapshot};
pub use environment::{BasicAuthCredentials, Environment, EnvironmentStatus, PreviewConfig};
pub use healthcheck::{Healthcheck, HealthcheckKind};
pub use port::PortMapping;
pub use project::{Project, ProjectStatus};
pub use service::{Builder, RegistryCredentials, ResourceLimits, Service, ServiceSource, ServiceSpec};
pub use url::{RedirectTarget, UrlRoute};
pub use volume::{AccessMode, Volume};
