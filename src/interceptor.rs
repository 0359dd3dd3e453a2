//! Snapshot observers
//!
//! Interceptors see every snapshot an execution produces, exactly once, in
//! order. They run on the broadcaster task, so they must not block. A
//! panicking interceptor is logged and otherwise ignored.

use crate::snapshot::Snapshot;
use serde::Serialize;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

pub trait Interceptor<M, S, C>: Send + Sync {
    fn intercept(&self, snapshot: &Snapshot<M, S, C>);
}

impl<M, S, C, F> Interceptor<M, S, C> for F
where
    F: Fn(&Snapshot<M, S, C>) + Send + Sync,
{
    fn intercept(&self, snapshot: &Snapshot<M, S, C>) {
        self(snapshot);
    }
}

/// Call each interceptor, containing panics
pub(crate) fn run_all<M, S, C>(
    interceptors: &[Arc<dyn Interceptor<M, S, C>>],
    snapshot: &Snapshot<M, S, C>,
) {
    for (index, interceptor) in interceptors.iter().enumerate() {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| interceptor.intercept(snapshot))) {
            tracing::error!(
                interceptor = index,
                panic = %crate::error::panic_message(payload.as_ref()),
                "Interceptor panicked; snapshot delivery continues"
            );
        }
    }
}

/// Logs every snapshot at debug level
pub struct TracingInterceptor {
    name: String,
}

impl TracingInterceptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl<M: Debug, S: Debug, C: Debug> Interceptor<M, S, C> for TracingInterceptor {
    fn intercept(&self, snapshot: &Snapshot<M, S, C>) {
        match snapshot {
            Snapshot::Initial { state, commands } => {
                tracing::debug!(
                    component = %self.name,
                    state = ?state,
                    commands = ?commands,
                    "Initial snapshot"
                );
            }
            Snapshot::Regular {
                state,
                commands,
                message,
                ..
            } => {
                tracing::debug!(
                    component = %self.name,
                    message = ?message,
                    state = ?state,
                    commands = ?commands,
                    "Snapshot"
                );
            }
        }
    }
}

/// Forwards each snapshot as a JSON envelope line, for a debugger bridge
/// that relays them over its own connection
pub struct MirrorInterceptor {
    tx: mpsc::UnboundedSender<String>,
}

impl MirrorInterceptor {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Interceptor plus the receiving end of its envelope channel
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl<M: Serialize, S: Serialize, C: Serialize> Interceptor<M, S, C> for MirrorInterceptor {
    fn intercept(&self, snapshot: &Snapshot<M, S, C>) {
        match serde_json::to_string(&snapshot.envelope()) {
            Ok(line) => {
                // A closed bridge is not the execution's problem
                let _ = self.tx.send(line);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize snapshot envelope"),
        }
    }
}
