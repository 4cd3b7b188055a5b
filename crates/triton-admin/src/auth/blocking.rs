//! Port for running synchronous directory work off the async scheduler.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use super::{AuthError, UserRecord};

/// A unit of blocking work producing a verified identity.
pub type BlockingJob = Box<dyn FnOnce() -> Result<UserRecord, AuthError> + Send + 'static>;

/// Executes blocking jobs and hands their result back to the caller.
#[async_trait]
pub trait BlockingRunner: Send + Sync {
    async fn run(&self, job: BlockingJob) -> Result<UserRecord, AuthError>;
}

/// Runs jobs on the tokio blocking pool with a hard deadline.
///
/// The deadline is applied to the worker call itself: dropping the caller's
/// future does not stop a blocking thread, so the timeout is what guarantees
/// the login resolves.
#[derive(Debug, Clone)]
pub struct TokioBlockingRunner {
    timeout: Duration,
}

impl TokioBlockingRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl BlockingRunner for TokioBlockingRunner {
    async fn run(&self, job: BlockingJob) -> Result<UserRecord, AuthError> {
        let handle = tokio::task::spawn_blocking(job);

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!(error = %join_err, "directory worker failed");
                Err(AuthError::Internal(format!(
                    "directory worker failed: {join_err}"
                )))
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "directory worker timed out"
                );
                Err(AuthError::ServiceUnavailable)
            }
        }
    }
}

/// Runs jobs inline on the calling task. For tests and fakes only.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineRunner;

#[async_trait]
impl BlockingRunner for InlineRunner {
    async fn run(&self, job: BlockingJob) -> Result<UserRecord, AuthError> {
        job()
    }
}
