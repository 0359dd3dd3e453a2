//! Component facade
//!
//! A [`Component`] is a cheap, cloneable handle to one broadcaster. Each
//! [`Component::invoke`] attaches a subscriber whose input stream is merged
//! into the shared execution, and returns the snapshots that execution
//! produces from the point of attachment on.

#[cfg(test)]
pub mod testing;


use crate::config::ComponentConfig;
use crate::environment::{Environment, Payload};
use crate::error::ComponentError;
use crate::interceptor::Interceptor;
use crate::multicast::{Broadcaster, Command, Delivery, SubscriberId};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

pub struct Component<M, S, C> {
    commands: mpsc::UnboundedSender<Command<M, S, C>>,
    scope: CancellationToken,
    next_subscriber: Arc<AtomicU64>,
}

impl<M, S, C> Clone for Component<M, S, C> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            scope: self.scope.clone(),
            next_subscriber: Arc::clone(&self.next_subscriber),
        }
    }
}

impl<M: Payload, S: Payload, C: Payload> Component<M, S, C> {
    /// Spawn a component with default configuration on the current runtime
    #[must_use]
    pub fn new(env: Environment<M, S, C>) -> Self {
        Self::with_config(env, ComponentConfig::default())
    }

    #[must_use]
    pub fn with_config(env: Environment<M, S, C>, config: ComponentConfig) -> Self {
        Self::spawn(env, config, &CancellationToken::new())
    }

    /// Spawn a component owned by `scope`. Cancelling `scope` disposes the
    /// component; disposing the component leaves `scope` untouched.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        env: Environment<M, S, C>,
        config: ComponentConfig,
        scope: &CancellationToken,
    ) -> Self {
        let scope = scope.child_token();
        let (commands, rx) = mpsc::unbounded_channel();
        let broadcaster = Broadcaster::new(env, config, scope.clone(), rx);
        tokio::spawn(broadcaster.run());

        Self {
            commands,
            scope,
            next_subscriber: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach a subscriber feeding `messages` into the shared execution.
    ///
    /// The first subscriber of an idle component starts a new execution.
    /// Later subscribers first receive the most recent snapshot, then live
    /// ones. Dropping the returned stream detaches the subscriber and stops
    /// forwarding its input.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Disposed`] once the component is disposed.
    pub fn invoke<St>(&self, messages: St) -> Result<SnapshotStream<M, S, C>, ComponentError>
    where
        St: Stream<Item = M> + Send + 'static,
    {
        if self.scope.is_cancelled() {
            return Err(ComponentError::Disposed);
        }

        let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        let (delivery, deliveries) = mpsc::unbounded_channel();
        self.commands
            .send(Command::Subscribe {
                id,
                input: messages.boxed(),
                delivery,
            })
            .map_err(|_| ComponentError::Disposed)?;

        Ok(SnapshotStream {
            id,
            deliveries: UnboundedReceiverStream::new(deliveries),
            commands: self.commands.clone(),
            scope: self.scope.clone(),
            finished: false,
        })
    }

    /// Push a message into the running execution's intake, as if it came
    /// from a subscriber's input stream
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::Disposed`] once the component is disposed,
    /// and [`ComponentError::NotRunning`] when no execution is live or its
    /// intake has closed.
    pub async fn inject(&self, message: M) -> Result<(), ComponentError> {
        if self.scope.is_cancelled() {
            return Err(ComponentError::Disposed);
        }

        let (reply, intake) = oneshot::channel();
        self.commands
            .send(Command::Intake { reply })
            .map_err(|_| ComponentError::Disposed)?;
        let intake = intake
            .await
            .map_err(|_| ComponentError::Disposed)?
            .ok_or(ComponentError::NotRunning)?;
        intake
            .send(message)
            .await
            .map_err(|_| ComponentError::NotRunning)
    }

    /// Observe every snapshot produced from now on.
    ///
    /// Interceptors belong to the shared broadcaster, not to this handle:
    /// every clone of the component sees the registration, and it lasts for
    /// the component's lifetime.
    #[must_use]
    pub fn with_interceptor(self, interceptor: impl Interceptor<M, S, C> + 'static) -> Self {
        if self
            .commands
            .send(Command::Intercept(Arc::new(interceptor)))
            .is_err()
        {
            tracing::debug!("Interceptor registered on a disposed component");
        }
        self
    }

    /// Cancel the running execution and fail every attached subscriber.
    /// Further `invoke` calls return [`ComponentError::Disposed`].
    pub fn dispose(&self) {
        self.scope.cancel();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.scope.is_cancelled()
    }
}

/// Snapshots seen by one subscriber
///
/// Yields `Ok` snapshots in execution order. A failed or disposed execution
/// yields one `Err` and then ends; a completed execution just ends.
pub struct SnapshotStream<M, S, C> {
    id: SubscriberId,
    deliveries: UnboundedReceiverStream<Delivery<M, S, C>>,
    commands: mpsc::UnboundedSender<Command<M, S, C>>,
    scope: CancellationToken,
    finished: bool,
}

impl<M, S, C> Unpin for SnapshotStream<M, S, C> {}

impl<M, S, C> Stream for SnapshotStream<M, S, C> {
    type Item = Result<crate::snapshot::Snapshot<M, S, C>, ComponentError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        // Nothing queued before disposal is handed out after it
        if this.scope.is_cancelled() {
            this.finished = true;
            return Poll::Ready(Some(Err(ComponentError::Cancelled)));
        }

        match this.deliveries.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<M, S, C> Drop for SnapshotStream<M, S, C> {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe { id: self.id });
    }
}
