//! Multicast broadcaster
//!
//! A single task owns the subscriber table, the cached last snapshot and the
//! current execution. Everything that mutates them arrives as a [`Command`]
//! or an upstream event and is handled sequentially.
//!
//! Phases:
//! - `Idle`: no execution, no cache
//! - `Active`: at least one subscriber, execution running
//! - `Draining`: no subscribers, execution still running until the teardown
//!   deadline passes or a new subscriber arrives

use crate::config::ComponentConfig;
use crate::engine::Engine;
use crate::environment::{Environment, Payload};
use crate::error::{ComponentError, Stage};
use crate::interceptor::{self, Interceptor};
use crate::snapshot::Snapshot;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a subscriber's queue carries: snapshots, then at most one error
pub(crate) type Delivery<M, S, C> = Result<Snapshot<M, S, C>, ComponentError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscriberId(pub u64);

pub(crate) enum Command<M, S, C> {
    Subscribe {
        id: SubscriberId,
        input: BoxStream<'static, M>,
        delivery: mpsc::UnboundedSender<Delivery<M, S, C>>,
    },
    Unsubscribe {
        id: SubscriberId,
    },
    Intercept(Arc<dyn Interceptor<M, S, C>>),
    /// Hand out a sender into the live execution's intake, if any
    Intake {
        reply: oneshot::Sender<Option<mpsc::Sender<M>>>,
    },
}

struct Execution<M, S, C> {
    id: Uuid,
    snapshots: mpsc::Receiver<Snapshot<M, S, C>>,
    task: JoinHandle<Result<(), ComponentError>>,
    cancel: CancellationToken,
    /// Weak so the intake closes once every input stream has finished
    intake: mpsc::WeakSender<M>,
    inputs: Inputs,
    last: Option<Snapshot<M, S, C>>,
}

impl<M, S, C> Execution<M, S, C> {
    fn shutdown(mut self) {
        self.cancel.cancel();
        self.task.abort();
        self.inputs.abort_all();
    }
}

/// Forwarders pumping subscriber input streams into the intake, one per
/// subscriber. Each holds a strong intake sender for as long as it runs.
#[derive(Default)]
struct Inputs {
    tasks: JoinSet<SubscriberId>,
    handles: HashMap<SubscriberId, AbortHandle>,
}

impl Inputs {
    fn attach<M: Send + 'static>(
        &mut self,
        id: SubscriberId,
        input: BoxStream<'static, M>,
        intake: mpsc::Sender<M>,
    ) {
        let handle = self.tasks.spawn(async move {
            forward(input, intake).await;
            id
        });
        self.handles.insert(id, handle);
    }

    /// Stop the subscriber's forwarder, releasing its intake sender
    fn detach(&mut self, id: SubscriberId) {
        if let Some(handle) = self.handles.remove(&id) {
            handle.abort();
        }
    }

    /// Drop forwarders whose input has ended
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Ok(id) = joined {
                self.handles.remove(&id);
            }
        }
    }

    fn len(&self) -> usize {
        self.handles.len()
    }

    fn abort_all(&mut self) {
        self.tasks.abort_all();
        self.handles.clear();
    }
}

enum Phase<M, S, C> {
    Idle,
    Active(Execution<M, S, C>),
    Draining {
        execution: Execution<M, S, C>,
        deadline: Instant,
    },
}

impl<M, S, C> Phase<M, S, C> {
    fn execution_mut(&mut self) -> Option<&mut Execution<M, S, C>> {
        match self {
            Phase::Idle => None,
            Phase::Active(execution) | Phase::Draining { execution, .. } => Some(execution),
        }
    }

    fn take(&mut self) -> Option<Execution<M, S, C>> {
        match std::mem::replace(self, Phase::Idle) {
            Phase::Idle => None,
            Phase::Active(execution) | Phase::Draining { execution, .. } => Some(execution),
        }
    }

    fn deadline(&self) -> Option<Instant> {
        match self {
            Phase::Draining { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }
}

enum Upstream<M, S, C> {
    Value(Snapshot<M, S, C>),
    Closed,
    Failed(ComponentError),
}

pub(crate) struct Broadcaster<M, S, C> {
    env: Environment<M, S, C>,
    config: ComponentConfig,
    scope: CancellationToken,
    commands: mpsc::UnboundedReceiver<Command<M, S, C>>,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<Delivery<M, S, C>>>,
    interceptors: Vec<Arc<dyn Interceptor<M, S, C>>>,
    phase: Phase<M, S, C>,
}

impl<M: Payload, S: Payload, C: Payload> Broadcaster<M, S, C> {
    pub fn new(
        env: Environment<M, S, C>,
        config: ComponentConfig,
        scope: CancellationToken,
        commands: mpsc::UnboundedReceiver<Command<M, S, C>>,
    ) -> Self {
        Self {
            env,
            config,
            scope,
            commands,
            subscribers: HashMap::new(),
            interceptors: Vec::new(),
            phase: Phase::Idle,
        }
    }

    pub async fn run(mut self) {
        loop {
            if let Some(execution) = self.phase.execution_mut() {
                execution.inputs.reap();
            }
            let deadline = self.phase.deadline();
            tokio::select! {
                biased;

                () = self.scope.cancelled() => {
                    self.dispose();
                    break;
                }

                command = self.commands.recv() => {
                    if let Some(command) = command {
                        self.handle_command(command);
                    } else {
                        tracing::debug!("All component handles dropped, stopping broadcaster");
                        if let Some(execution) = self.phase.take() {
                            Self::teardown(execution, "component dropped");
                        }
                        break;
                    }
                }

                upstream = next_upstream(&mut self.phase) => self.handle_upstream(upstream),

                () = sleep_until(deadline) => self.handle_teardown_deadline(),
            }
        }
    }

    fn handle_command(&mut self, command: Command<M, S, C>) {
        match command {
            Command::Subscribe {
                id,
                input,
                delivery,
            } => self.subscribe(id, input, delivery),
            Command::Unsubscribe { id } => self.unsubscribe(id),
            Command::Intercept(interceptor) => self.interceptors.push(interceptor),
            Command::Intake { reply } => {
                let intake = self
                    .phase
                    .execution_mut()
                    .and_then(|execution| execution.intake.upgrade());
                let _ = reply.send(intake);
            }
        }
    }

    fn subscribe(
        &mut self,
        id: SubscriberId,
        input: BoxStream<'static, M>,
        delivery: mpsc::UnboundedSender<Delivery<M, S, C>>,
    ) {
        let (mut execution, fresh_intake) = match self.phase.take() {
            None => {
                let (execution, intake) = self.start_execution();
                (execution, Some(intake))
            }
            Some(execution) => (execution, None),
        };

        // Replay before any live value reaches this subscriber
        if let Some(last) = &execution.last {
            let _ = delivery.send(Ok(last.clone()));
        }

        match fresh_intake.or_else(|| execution.intake.upgrade()) {
            Some(intake) => execution.inputs.attach(id, input, intake),
            None => {
                tracing::debug!(
                    execution_id = %execution.id,
                    subscriber = id.0,
                    "Intake already closed, subscriber input ignored"
                );
            }
        }

        self.subscribers.insert(id, delivery);
        tracing::debug!(
            execution_id = %execution.id,
            subscriber = id.0,
            subscribers = self.subscribers.len(),
            inputs = execution.inputs.len(),
            "Subscriber attached"
        );
        self.phase = Phase::Active(execution);
    }

    fn unsubscribe(&mut self, id: SubscriberId) {
        // Unknown ids belong to subscribers already released on termination
        if self.subscribers.remove(&id).is_none() {
            return;
        }
        if let Some(execution) = self.phase.execution_mut() {
            execution.inputs.detach(id);
        }
        tracing::debug!(
            subscriber = id.0,
            subscribers = self.subscribers.len(),
            "Subscriber detached"
        );
        if !self.subscribers.is_empty() {
            return;
        }

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Active(execution) => {
                let delay = self.config.teardown_delay;
                if delay.is_zero() {
                    Self::teardown(execution, "last subscriber detached");
                } else {
                    tracing::debug!(
                        execution_id = %execution.id,
                        delay_ms = %delay.as_millis(),
                        "Last subscriber detached, draining"
                    );
                    self.phase = Phase::Draining {
                        execution,
                        deadline: Instant::now() + delay,
                    };
                }
            }
            other => self.phase = other,
        }
    }

    fn handle_teardown_deadline(&mut self) {
        if let Some(execution) = self.phase.take() {
            Self::teardown(execution, "teardown delay elapsed");
        }
    }

    fn handle_upstream(&mut self, upstream: Upstream<M, S, C>) {
        match upstream {
            Upstream::Value(snapshot) => {
                let Some(execution) = self.phase.execution_mut() else {
                    return;
                };
                interceptor::run_all(&self.interceptors, &snapshot);
                for delivery in self.subscribers.values() {
                    let _ = delivery.send(Ok(snapshot.clone()));
                }
                execution.last = Some(snapshot);
            }
            Upstream::Closed => {
                if let Some(execution) = self.phase.take() {
                    tracing::info!(
                        execution_id = %execution.id,
                        subscribers = self.subscribers.len(),
                        "Execution finished"
                    );
                }
                // Dropping the senders ends every subscriber's stream
                self.subscribers.clear();
            }
            Upstream::Failed(error) => {
                if let Some(execution) = self.phase.take() {
                    tracing::error!(
                        execution_id = %execution.id,
                        error = %error,
                        subscribers = self.subscribers.len(),
                        "Execution failed"
                    );
                }
                for (_, delivery) in self.subscribers.drain() {
                    let _ = delivery.send(Err(error.clone()));
                }
            }
        }
    }

    fn dispose(&mut self) {
        tracing::info!(
            subscribers = self.subscribers.len(),
            "Component scope cancelled, disposing"
        );
        for (_, delivery) in self.subscribers.drain() {
            let _ = delivery.send(Err(ComponentError::Cancelled));
        }
        if let Some(execution) = self.phase.take() {
            Self::teardown(execution, "component disposed");
        }
        self.commands.close();
    }

    fn start_execution(&self) -> (Execution<M, S, C>, mpsc::Sender<M>) {
        let id = Uuid::new_v4();
        let (intake_tx, intake_rx) = mpsc::channel(self.config.intake_capacity);
        let (snapshot_tx, snapshot_rx) = mpsc::channel(self.config.snapshot_capacity);
        let cancel = self.scope.child_token();

        let engine = Engine::new(id, self.env.clone(), intake_rx, snapshot_tx);
        let task = tokio::spawn(engine.run(cancel.clone()));
        tracing::info!(execution_id = %id, "Execution started");

        let execution = Execution {
            id,
            snapshots: snapshot_rx,
            task,
            cancel,
            intake: intake_tx.downgrade(),
            inputs: Inputs::default(),
            last: None,
        };
        (execution, intake_tx)
    }

    fn teardown(execution: Execution<M, S, C>, reason: &'static str) {
        tracing::info!(execution_id = %execution.id, reason, "Tearing down execution");
        execution.shutdown();
    }
}

/// Next event from the running execution; pending forever while idle
async fn next_upstream<M, S, C>(phase: &mut Phase<M, S, C>) -> Upstream<M, S, C> {
    let Some(execution) = phase.execution_mut() else {
        return std::future::pending().await;
    };

    if let Some(snapshot) = execution.snapshots.recv().await {
        return Upstream::Value(snapshot);
    }

    // The engine drops its sender only on the way out; every snapshot it
    // sent has been received by now
    match (&mut execution.task).await {
        Ok(Ok(())) => Upstream::Closed,
        Ok(Err(error)) => Upstream::Failed(error),
        Err(e) if e.is_panic() => Upstream::Failed(ComponentError::from_panic(
            Stage::Engine,
            e.into_panic().as_ref(),
        )),
        Err(_) => Upstream::Failed(ComponentError::Cancelled),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn forward<M>(mut input: BoxStream<'static, M>, intake: mpsc::Sender<M>) {
    while let Some(message) = input.next().await {
        if intake.send(message).await.is_err() {
            break;
        }
    }
}
