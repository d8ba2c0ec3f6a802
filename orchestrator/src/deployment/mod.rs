pub mod cancellation;
pub mod context;
pub mod healthcheck;
pub mod step;
pub mod workflow;

pub use cancellation::CancellationSignal;
pub use context::DeploymentContext;
pub use step::DeploymentStep;
pub use workflow::{request_cancellation, run, run_paused};
