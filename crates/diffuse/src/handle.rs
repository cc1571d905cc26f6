//! Result handles.
//!
//! A handle is resolved exactly once, by the worker that ran the invocation, and
//! may be awaited by any number of callers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use diffpack::Value;
use tokio::sync::Notify;

use crate::error::Result;

#[derive(Clone)]
pub struct ResultHandle {
    inner: Arc<Inner>,
}

struct Inner {
    outcome: OnceLock<Result<Value>>,
    ready: Notify,
    serializer: String,
    retrieved: AtomicBool,
}

impl ResultHandle {
    /// A pending handle whose value will be serialized with `serializer`.
    pub fn new(serializer: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                outcome: OnceLock::new(),
                ready: Notify::new(),
                serializer: serializer.into(),
                retrieved: AtomicBool::new(false),
            }),
        }
    }

    pub fn serializer(&self) -> &str {
        &self.inner.serializer
    }

    /// Stores the outcome. Returns `false` if the handle was already resolved,
    /// in which case the earlier outcome stands.
    pub fn resolve(&self, outcome: Result<Value>) -> bool {
        let fresh = self.inner.outcome.set(outcome).is_ok();
        if fresh {
            self.inner.ready.notify_waiters();
        }
        fresh
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    /// Whether some caller has already collected the outcome.
    pub fn is_retrieved(&self) -> bool {
        self.inner.retrieved.load(Ordering::Acquire)
    }

    /// Waits until the handle is resolved and returns its outcome.
    pub async fn wait(&self) -> Result<Value> {
        loop {
            // registered before the check so a resolve in between still wakes us
            let notified = self.inner.ready.notified();
            if let Some(outcome) = self.inner.outcome.get() {
                self.inner.retrieved.store(true, Ordering::Release);
                return outcome.clone();
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("serializer", &self.inner.serializer)
            .field("resolved", &self.is_resolved())
            .field("retrieved", &self.is_retrieved())
            .finish()
    }
}
