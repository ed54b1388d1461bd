//! Operation registry with background expiry sweeping.

use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::types::{ExecutorConfig, Operation, OperationStatus};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Thread-safe map of operation records plus the sweeper that enforces
/// retention and maximum lifetime.
///
/// Reads take the shared lock; insert, remove and the full sweep take the
/// exclusive lock. Must be created inside a tokio runtime (the sweeper is
/// spawned on construction).
pub struct OperationRegistry {
    operations: RwLock<HashMap<String, Arc<Operation>>>,
    config: ExecutorConfig,
    stop: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl OperationRegistry {
    pub fn new(config: ExecutorConfig) -> Arc<Self> {
        let registry = Arc::new(Self {
            operations: RwLock::new(HashMap::new()),
            config,
            stop: CancellationToken::new(),
            sweeper: Mutex::new(None),
        });

        let handle = spawn_sweeper(&registry);
        *registry.sweeper.lock() = Some(handle);
        registry
    }

    /// Register a new operation. The id resolves from the moment this
    /// returns.
    pub fn add(&self, operation: Arc<Operation>) {
        debug!(
            id = operation.id(),
            operation_type = operation.operation_type(),
            "registering operation"
        );
        self.operations
            .write()
            .insert(operation.id().to_string(), operation);
    }

    pub fn get(&self, id: &str) -> ExecutorResult<Arc<Operation>> {
        self.operations
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ExecutorError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.operations.read().contains_key(id)
    }

    /// Drop an operation, cancelling it if still running.
    pub fn remove(&self, id: &str) {
        if let Some(operation) = self.operations.write().remove(id) {
            operation.request_cancel();
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.operations.read().keys().cloned().collect()
    }

    /// One sweep pass, under the map's write lock for its whole duration:
    /// terminal records past retention are deleted; running records past
    /// the maximum lifetime are cancelled and force-failed (retention then
    /// applies to them from their new end time).
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let mut operations = self.operations.write();

        operations.retain(|id, operation| {
            if operation.over_lifetime(self.config.max_lifetime, now) {
                warn!(id = id.as_str(), "operation exceeded maximum lifetime");
                operation.request_cancel();
                operation.finish(Err(ExecutorError::LifetimeExceeded.to_string()));
                return true;
            }
            if operation.expired(self.config.retention_period, now) {
                debug!(id = id.as_str(), "evicting expired operation");
                return false;
            }
            true
        });
    }

    /// Stop the sweeper and cancel every live operation. Their workers
    /// record the cancelled outcome.
    pub async fn stop(&self) {
        self.stop.cancel();

        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let operations: Vec<Arc<Operation>> =
            self.operations.read().values().cloned().collect();
        for operation in operations {
            if operation.status() == OperationStatus::Running {
                operation.request_cancel();
            }
        }
    }
}

fn spawn_sweeper(registry: &Arc<OperationRegistry>) -> JoinHandle<()> {
    let weak: Weak<OperationRegistry> = Arc::downgrade(registry);
    let stop = registry.stop.clone();
    let cleanup_interval = registry.config.cleanup_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so the first
        // real sweep happens one interval from now.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(registry) = weak.upgrade() else { break };
                    registry.cleanup_expired();
                }
            }
        }
        debug!("sweeper stopped");
    })
}
