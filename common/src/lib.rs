pub mod error;
pub mod hash;
pub mod ids;
pub mod log;
pub mod model;
pub mod slug;

pub use error::{Error, ErrorKind, Result};
pub use hash::generate_deployment_hash;
pub use ids::{ChangeId, ConfigId, DeploymentId, EnvironmentId, PortId, ProjectId, ServiceId, UrlId, VolumeId};
pub use log::{LogEvent, LogRecorder, LogSinkLayer};
pub use model::{Change, Deployment};
pub use slug::{Slug, SlugError};
