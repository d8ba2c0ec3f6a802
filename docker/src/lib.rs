pub mod client;
pub mod error;
pub mod settings;

pub use client::{
    AttachedConfigSpec, BollardDriver, ContainerDriver, ExecResult, MountSpec, SwarmServiceSpec, TaskState,
    TaskSummary, LABEL_DEPLOYMENT_HASH, LABEL_MANAGED, LABEL_PARENT_ID,
};
pub use error::{Error, Result};
pub use settings::{DriverSettings, DriverSettingsBuilder, LogDriverSettings};
