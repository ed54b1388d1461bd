//! Async operation executor.
//!
//! Lets a tool invocation outlive the request that started it. `execute`
//! runs an operation detached from the caller's cancellation scope and
//! waits a bounded patience window: if the operation finishes in time the
//! result comes back inline, otherwise the caller gets a handle and probes
//! it later with `continue_operation`. A background sweeper enforces the
//! maximum lifetime and evicts records after the retention period.

pub mod registry;
pub mod types;

pub use registry::OperationRegistry;
pub use types::{
    ContinueResult, ExecuteOptions, ExecuteResult, ExecutorConfig, Operation, OperationStatus,
};

use crate::error::{ExecutorError, ExecutorResult, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Manages async operation execution.
pub struct OperationExecutor {
    registry: Arc<OperationRegistry>,
    config: ExecutorConfig,
}

impl OperationExecutor {
    /// Create an executor. Zero durations in the config fall back to the
    /// defaults. Must be called inside a tokio runtime.
    pub fn new(config: ExecutorConfig) -> Self {
        let config = config.with_defaults();
        Self {
            registry: OperationRegistry::new(config.clone()),
            config,
        }
    }

    /// Run `operation` detached from the caller, waiting up to the patience
    /// window for an inline result.
    ///
    /// The closure receives the operation's own cancellation scope, which
    /// trips on [`cancel`](Self::cancel), on executor [`stop`](Self::stop),
    /// and when the maximum lifetime elapses. Cancelling
    /// `opts.cancellation` (the caller's scope) only abandons the wait: the
    /// operation keeps running and a later `continue_operation` can still
    /// retrieve it.
    #[instrument(skip(self, operation, opts), fields(operation_type = %opts.operation_type))]
    pub async fn execute<F, Fut>(
        &self,
        operation: F,
        opts: ExecuteOptions,
    ) -> ExecutorResult<ExecuteResult>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let id = self.generate_id();
        debug!(id = id.as_str(), "executing operation");

        let timeout = if opts.timeout.is_zero() {
            self.config.default_timeout
        } else {
            opts.timeout
        };

        let cancel = CancellationToken::new();
        let record = Arc::new(Operation::new(
            id.clone(),
            opts.operation_type.clone(),
            cancel.clone(),
        ));

        // The id must resolve before the worker starts.
        self.registry.add(Arc::clone(&record));

        let future = operation(cancel.clone());
        let worker_record = Arc::clone(&record);
        let max_lifetime = self.config.max_lifetime;
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = future => result.map_err(|e| e.rpc_message()),
                _ = cancel.cancelled() => Err(ExecutorError::Cancelled.to_string()),
                _ = tokio::time::sleep(max_lifetime) => {
                    Err(ExecutorError::LifetimeExceeded.to_string())
                }
            };
            worker_record.finish(outcome);
        });

        let done = record.done_token();
        let caller = opts.cancellation.unwrap_or_default();

        tokio::select! {
            _ = done.cancelled() => {
                // Finished inside the patience window; the result is
                // delivered inline, no handle needed.
                Ok(ExecuteResult::terminal(&record))
            }
            _ = tokio::time::sleep(timeout) => {
                debug!(id = id.as_str(), "patience window elapsed, operation continues");
                Ok(ExecuteResult::running(
                    &record,
                    format!(
                        "Operation in progress. Use continue_operation with \
                         operation_id='{id}' to check status."
                    ),
                ))
            }
            _ = caller.cancelled() => {
                // The request went away; the operation deliberately does not.
                debug!(id = id.as_str(), "caller cancelled, operation continues");
                Ok(ExecuteResult::running(
                    &record,
                    "Request cancelled, but operation continues. Use \
                     continue_operation to check status."
                        .into(),
                ))
            }
        }
    }

    /// Probe or wait for an operation's completion.
    ///
    /// Returns the terminal state immediately if the operation already
    /// finished; otherwise waits up to `wait_time` for the completion
    /// signal. Cancelling the optional caller scope aborts the wait with
    /// [`ExecutorError::WaitCancelled`].
    #[instrument(skip(self, cancellation))]
    pub async fn continue_operation(
        &self,
        operation_id: &str,
        wait_time: Duration,
        cancellation: Option<CancellationToken>,
    ) -> ExecutorResult<ContinueResult> {
        let record = self.registry.get(operation_id)?;
        debug!(status = %record.status(), "continuing operation");

        if record.status() != OperationStatus::Running {
            return Ok(ContinueResult::terminal(&record));
        }

        let done = record.done_token();
        let caller = cancellation.unwrap_or_default();

        tokio::select! {
            _ = done.cancelled() => Ok(ContinueResult::terminal(&record)),
            _ = tokio::time::sleep(wait_time) => {
                let elapsed = record.running_for().unwrap_or_else(|| record.elapsed());
                Ok(ContinueResult::running(
                    &record,
                    format!(
                        "Operation still in progress (elapsed: {}s). Continue checking.",
                        elapsed.as_secs()
                    ),
                ))
            }
            _ = caller.cancelled() => Err(ExecutorError::WaitCancelled),
        }
    }

    /// Cancel a running operation. Terminal operations are left unchanged
    /// and reported as a status error.
    pub fn cancel(&self, operation_id: &str) -> ExecutorResult<()> {
        let record = self.registry.get(operation_id)?;

        let status = record.status();
        if status != OperationStatus::Running {
            return Err(ExecutorError::NotRunning {
                id: operation_id.to_string(),
                status: status.to_string(),
            });
        }

        debug!(id = operation_id, "cancelling operation");
        record.request_cancel();
        record.finish(Err(ExecutorError::Cancelled.to_string()));
        Ok(())
    }

    /// Manually trigger one sweeper pass.
    pub fn cleanup(&self) {
        self.registry.cleanup_expired();
    }

    /// Stop the sweeper and cancel every live operation.
    pub async fn stop(&self) {
        self.registry.stop().await;
    }

    /// Current operation ids, for debugging and tests.
    pub fn list_operations(&self) -> Vec<String> {
        self.registry.list()
    }

    /// 8 hex chars from 4 random bytes, re-rolled while it collides with a
    /// live or retained record.
    fn generate_id(&self) -> String {
        loop {
            let id = format!("{:08x}", rand::random::<u32>());
            if !self.registry.contains(&id) {
                return id;
            }
        }
    }
}

impl Default for OperationExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}
