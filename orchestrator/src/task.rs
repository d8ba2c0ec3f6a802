use std::cmp::min;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{trace, warn};

/// Default maximum total time a single deployment workflow is allowed to run
/// before it is considered stuck and cancelled by the worker.
pub const DEFAULT_WORKFLOW_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[async_trait]
pub trait Task<Ctx>: Send {
    type Output;
    type Error;

    async fn poll(&mut self, ctx: &mut Ctx) -> TaskResult<Self::Output, Self::Error>;
}

#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub enum TaskResult<R, E> {
    /// One step completed; more work remains.
    Pending(R),
    /// The task has reached a terminal state.
    Done(R),
    /// A transient condition means the step should be retried without
    /// advancing.
    TryAgain,
    /// A cancellation signal was observed.
    Cancelled,
    /// The task failed terminally.
    Err(E),
}

impl<R, E> TaskResult<R, E> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Cancelled | Self::Err(_))
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Pending(_) => "pending",
            Self::Done(_) => "done",
            Self::TryAgain => "try_again",
            Self::Cancelled => "cancelled",
            Self::Err(_) => "error",
        }
    }
}

/// Drives a task's `poll` loop to completion, backing off between retries
/// the same way a step that needs to wait on an external resource would.
pub async fn run_to_completion<Ctx, T>(mut task: T, ctx: &mut Ctx) -> TaskResult<T::Output, T::Error>
where
    Ctx: Send,
    T: Task<Ctx>,
{
    let mut tries: u32 = 0;
    loop {
        let result = task.poll(ctx).await;
        if result.is_done() {
            return result;
        }
        match result {
            TaskResult::TryAgain => {
                let backoff = min(3_u64.pow(tries.min(10)), 30_000);
                tries += 1;
                trace!(backoff_ms = backoff, "task asked to try again");
                sleep(Duration::from_millis(backoff)).await;
            }
            TaskResult::Pending(_) => {
                tries = 0;
            }
            _ => unreachable!("is_done() already handled terminal variants"),
        }
    }
}

pub async fn with_timeout<Ctx, T>(timeout: Duration, mut task: T, ctx: &mut Ctx) -> TaskResult<T::Output, T::Error>
where
    Ctx: Send,
    T: Task<Ctx>,
{
    let start = tokio::time::Instant::now();
    loop {
        if start.elapsed() > timeout {
            warn!(timeout_s = timeout.as_secs(), "task exceeded its deadline");
            return TaskResult::Cancelled;
        }
        let result = task.poll(ctx).await;
        if result.is_done() {
            return result;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountToThree(u32);

    #[async_trait]
    impl Task<()> for CountToThree {
        type Output = u32;
        type Error = ();

        async fn poll(&mut self, _ctx: &mut ()) -> TaskResult<Self::Output, Self::Error> {
            self.0 += 1;
            if self.0 >= 3 {
                TaskResult::Done(self.0)
            } else {
                TaskResult::Pending(self.0)
            }
        }
    }

    #[tokio::test]
    async fn run_to_completion_advances_until_done() {
        let mut ctx = ();
        let result = run_to_completion(CountToThree(0), &mut ctx).await;
        assert_eq!(result, TaskResult::Done(3));
    }
}
