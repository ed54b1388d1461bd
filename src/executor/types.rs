//! Operation records and executor configuration.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Current state of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configures the operation executor. Zero durations fall back to the
/// defaults.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Patience window before `execute` returns a running handle.
    pub default_timeout: Duration,
    /// Upper bound on a single operation's wall-clock lifetime.
    pub max_lifetime: Duration,
    /// How long terminal operations stay resolvable by id.
    pub retention_period: Duration,
    /// How often the sweeper evicts expired records.
    pub cleanup_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(15),
            max_lifetime: Duration::from_secs(10 * 60),
            retention_period: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl ExecutorConfig {
    pub(crate) fn with_defaults(mut self) -> Self {
        let defaults = Self::default();
        if self.default_timeout.is_zero() {
            self.default_timeout = defaults.default_timeout;
        }
        if self.max_lifetime.is_zero() {
            self.max_lifetime = defaults.max_lifetime;
        }
        if self.retention_period.is_zero() {
            self.retention_period = defaults.retention_period;
        }
        if self.cleanup_interval.is_zero() {
            self.cleanup_interval = defaults.cleanup_interval;
        }
        self
    }
}

/// Configures how one operation is executed.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Free-form tag echoed back to the caller, e.g. "generate_image".
    pub operation_type: String,
    /// Patience window for this call; zero uses the executor default.
    pub timeout: Duration,
    /// The caller's cancellation scope. Cancelling it abandons the
    /// synchronous wait; the operation itself keeps running.
    pub cancellation: Option<CancellationToken>,
}

impl ExecuteOptions {
    pub fn new(operation_type: impl Into<String>) -> Self {
        Self {
            operation_type: operation_type.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Mutable portion of an operation record, guarded as one unit so readers
/// always observe either `Running` or a fully-populated terminal state.
#[derive(Debug, Clone)]
pub(crate) struct OperationState {
    pub status: OperationStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub end_time: Option<Instant>,
}

/// A tracked async operation.
pub struct Operation {
    id: String,
    operation_type: String,
    start_time: Instant,
    state: RwLock<OperationState>,
    /// Fires exactly once, after the terminal state is published.
    done: CancellationToken,
    /// Cancels the operation's own scope.
    cancel: CancellationToken,
}

impl Operation {
    pub(crate) fn new(
        id: String,
        operation_type: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            operation_type,
            start_time: Instant::now(),
            state: RwLock::new(OperationState {
                status: OperationStatus::Running,
                result: None,
                error: None,
                end_time: None,
            }),
            done: CancellationToken::new(),
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operation_type(&self) -> &str {
        &self.operation_type
    }

    pub fn status(&self) -> OperationStatus {
        self.state.read().status
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Wall-clock time the operation has been running, or `None` once it
    /// reached a terminal state.
    pub(crate) fn running_for(&self) -> Option<Duration> {
        let state = self.state.read();
        match state.status {
            OperationStatus::Running => Some(self.start_time.elapsed()),
            _ => None,
        }
    }

    pub(crate) fn snapshot(&self) -> OperationState {
        self.state.read().clone()
    }

    /// Records the terminal outcome. The first transition wins; a worker
    /// returning after a cancel or lifetime sweep leaves the earlier
    /// terminal state untouched. Returns whether this call transitioned.
    pub(crate) fn finish(&self, outcome: Result<Value, String>) -> bool {
        {
            let mut state = self.state.write();
            if state.status != OperationStatus::Running {
                return false;
            }
            state.end_time = Some(Instant::now());
            match outcome {
                Ok(value) => {
                    state.status = OperationStatus::Completed;
                    state.result = Some(value);
                }
                Err(message) => {
                    state.status = OperationStatus::Failed;
                    state.error = Some(message);
                }
            }
        }
        // State is published before the signal fires; waiters that wake on
        // `done` read a complete terminal record.
        self.done.cancel();
        true
    }

    /// Token that resolves when the operation leaves `Running`.
    pub(crate) fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Ask the operation's own scope to cancel.
    pub(crate) fn request_cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether a terminal record has outlived the retention period.
    pub(crate) fn expired(&self, retention_period: Duration, now: Instant) -> bool {
        let state = self.state.read();
        match (state.status, state.end_time) {
            (OperationStatus::Running, _) => false,
            (_, Some(end_time)) => now.duration_since(end_time) > retention_period,
            // Terminal without an end time cannot happen; keep the record.
            (_, None) => false,
        }
    }

    /// Whether a running record has exceeded the maximum lifetime.
    pub(crate) fn over_lifetime(&self, max_lifetime: Duration, now: Instant) -> bool {
        self.status() == OperationStatus::Running
            && now.duration_since(self.start_time) > max_lifetime
    }
}

/// Returned from `execute`.
///
/// Either a terminal outcome (no `operation_id`, the result is already
/// delivered) or a running handle to pass to `continue_operation`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResult {
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecuteResult {
    pub(crate) fn terminal(operation: &Operation) -> Self {
        let state = operation.snapshot();
        Self {
            status: state.status,
            operation_id: None,
            operation_type: None,
            result: state.result,
            error: state.error,
            message: None,
        }
    }

    pub(crate) fn running(operation: &Operation, message: String) -> Self {
        Self {
            status: OperationStatus::Running,
            operation_id: Some(operation.id().to_string()),
            operation_type: Some(operation.operation_type().to_string()),
            result: None,
            error: None,
            message: Some(message),
        }
    }
}

/// Returned from `continue_operation`.
#[derive(Debug, Clone, Serialize)]
pub struct ContinueResult {
    pub status: OperationStatus,
    pub operation_id: String,
    pub operation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ContinueResult {
    pub(crate) fn terminal(operation: &Operation) -> Self {
        let state = operation.snapshot();
        Self {
            status: state.status,
            operation_id: operation.id().to_string(),
            operation_type: operation.operation_type().to_string(),
            result: state.result,
            error: state.error,
            message: None,
        }
    }

    pub(crate) fn running(operation: &Operation, message: String) -> Self {
        Self {
            status: OperationStatus::Running,
            operation_id: operation.id().to_string(),
            operation_type: operation.operation_type().to_string(),
            result: None,
            error: None,
            message: Some(message),
        }
    }
}
