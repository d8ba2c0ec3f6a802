pub mod archiver;
pub mod deployment;
pub mod environment_cloner;
pub mod error;
pub mod health_monitor;
pub mod ledger;
pub mod persistence;
pub mod semaphore;
pub mod task;

pub use archiver::Archiver;
pub use environment_cloner::{CloneOutcome, CloneRequest, ClonedService, EnvironmentCloner};
pub use error::{Error, Result};
pub use health_monitor::{HealthMonitor, DEFAULT_TICK_INTERVAL};
pub use persistence::Persistence;
pub use semaphore::{Permit, SemaphoreRegistry};
pub use task::{run_to_completion, with_timeout, Task, TaskResult, DEFAULT_WORKFLOW_TIMEOUT};
