//! Mutual exclusion for destructive tree operations
//!
//! Copy, move, delete, symlink creation and tarball extraction each run inside one
//! [`TransactionGate`] acquisition, so two of them issued through the same gate never
//! interleave their mutations. Waiters are served in arrival order. Queries and scans do not
//! take the gate.
//!
//! The gate is a cheap, cloneable handle. Components that should serialize against each other
//! share one handle; [`TransactionGate::shared`] returns a process-wide instance for callers
//! that want a single gate for everything.

use tracing::instrument;

use crate::error::{Error, ErrorKind};

static SHARED_GATE: std::sync::LazyLock<TransactionGate> =
    std::sync::LazyLock::new(TransactionGate::new);

#[derive(Debug, Clone)]
pub struct TransactionGate {
    // tokio's semaphore queues waiters fairly, which gives FIFO hand-off
    sem: std::sync::Arc<tokio::sync::Semaphore>,
}

/// Proof of holding the gate; dropping it releases the gate.
#[derive(Debug)]
pub struct GatePermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        tracing::trace!("transaction gate released");
    }
}

impl TransactionGate {
    pub fn new() -> Self {
        Self {
            sem: std::sync::Arc::new(tokio::sync::Semaphore::new(1)),
        }
    }

    pub fn shared() -> Self {
        SHARED_GATE.clone()
    }

    /// Suspends until this caller is the sole holder.
    pub async fn acquire(&self) -> Result<GatePermit, Error> {
        let permit = self.sem.clone().acquire_owned().await.map_err(|error| {
            Error::new(
                ErrorKind::IoFailure,
                anyhow::Error::new(error).context("transaction gate is closed"),
                Default::default(),
            )
        })?;
        tracing::trace!("transaction gate acquired");
        Ok(GatePermit { _permit: permit })
    }

    /// Runs `protected` while holding the gate. The gate is released however the block exits,
    /// including errors and panics.
    #[instrument(skip_all)]
    pub async fn transaction<F, Fut, T>(&self, protected: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let _permit = self.acquire().await?;
        protected().await
    }

    /// True while some operation holds the gate.
    pub fn is_held(&self) -> bool {
        self.sem.available_permits() == 0
    }
}

impl Default for TransactionGate {
    fn default() -> Self {
        Self::new()
    }
}
