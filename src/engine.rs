//! Resolution engine
//!
//! Drives one execution: initialize, then repeatedly take the next message,
//! apply the updater, emit a snapshot and resolve the produced commands.
//!
//! Messages produced by resolving commands go onto the front of a backlog
//! that is always drained before the external intake is consulted. All
//! consequences of a message are therefore observed before the next external
//! message is admitted (depth-first resolution).

#[cfg(test)]
mod proptests;

use crate::environment::{Environment, Payload, Update};
use crate::error::{ComponentError, Stage};
use crate::snapshot::{Initial, Snapshot};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One logical execution. Owns the current state exclusively.
pub(crate) struct Engine<M, S, C> {
    id: Uuid,
    env: Environment<M, S, C>,
    intake: mpsc::Receiver<M>,
    output: mpsc::Sender<Snapshot<M, S, C>>,
    backlog: VecDeque<M>,
}

impl<M: Payload, S: Payload, C: Payload> Engine<M, S, C> {
    pub fn new(
        id: Uuid,
        env: Environment<M, S, C>,
        intake: mpsc::Receiver<M>,
        output: mpsc::Sender<Snapshot<M, S, C>>,
    ) -> Self {
        Self {
            id,
            env,
            intake,
            output,
            backlog: VecDeque::new(),
        }
    }

    /// Run until the intake closes with an empty backlog, a collaborator
    /// fails, or `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ComponentError> {
        let id = self.id;
        tracing::debug!(execution_id = %id, "Starting execution");

        let result = tokio::select! {
            biased;

            () = cancel.cancelled() => Err(ComponentError::Cancelled),
            result = self.drive() => result,
        };

        match &result {
            Ok(()) => tracing::debug!(execution_id = %id, "Execution complete"),
            Err(ComponentError::Cancelled) => {
                tracing::debug!(execution_id = %id, "Execution cancelled");
            }
            Err(e) => tracing::warn!(execution_id = %id, error = %e, "Execution failed"),
        }
        result
    }

    async fn drive(mut self) -> Result<(), ComponentError> {
        let Initial {
            mut state,
            commands,
        } = self
            .env
            .initializer
            .initialize()
            .await
            .map_err(ComponentError::Initialization)?;

        let initial = Snapshot::Initial {
            state: state.clone(),
            commands: commands.clone(),
        };
        if !self.emit(initial).await {
            return Ok(());
        }
        self.resolve_into_backlog(commands).await?;

        while let Some(message) = self.next_message().await {
            let Update {
                state: next,
                commands,
            } = self.env.updater.update(&message, &state)?;

            let previous_state = std::mem::replace(&mut state, next);
            let snapshot = Snapshot::Regular {
                state: state.clone(),
                commands: commands.clone(),
                previous_state,
                message,
            };
            if !self.emit(snapshot).await {
                return Ok(());
            }
            self.resolve_into_backlog(commands).await?;
        }

        Ok(())
    }

    /// Backlog first; the external intake only once the backlog is empty
    async fn next_message(&mut self) -> Option<M> {
        if let Some(message) = self.backlog.pop_front() {
            return Some(message);
        }
        self.intake.recv().await
    }

    /// Returns false once nobody is listening any more
    async fn emit(&self, snapshot: Snapshot<M, S, C>) -> bool {
        if self.output.send(snapshot).await.is_err() {
            tracing::debug!(execution_id = %self.id, "Snapshot receiver gone, stopping");
            return false;
        }
        true
    }

    async fn resolve_into_backlog(&mut self, commands: Vec<C>) -> Result<(), ComponentError> {
        let messages = self.resolve(commands).await?;
        for message in messages.into_iter().rev() {
            self.backlog.push_front(message);
        }
        Ok(())
    }

    /// Resolve every command concurrently and concatenate the results in
    /// command order. The first failure aborts the remaining resolutions.
    async fn resolve(&self, commands: Vec<C>) -> Result<Vec<M>, ComponentError> {
        if commands.is_empty() {
            return Ok(vec![]);
        }

        let count = commands.len();
        let mut tasks = JoinSet::new();
        for (index, command) in commands.into_iter().enumerate() {
            let resolver = Arc::clone(&self.env.resolver);
            let task = async move { (index, resolver.resolve(command).await) };
            match &self.env.resolver_runtime {
                Some(handle) => {
                    tasks.spawn_on(task, handle);
                }
                None => {
                    tasks.spawn(task);
                }
            }
        }

        let mut slots: Vec<Option<Vec<M>>> = (0..count).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(messages))) => slots[index] = Some(messages),
                Ok((index, Err(e))) => {
                    tracing::debug!(execution_id = %self.id, command_index = index, "Resolver failed");
                    return Err(ComponentError::Effect(e));
                }
                Err(e) if e.is_panic() => {
                    return Err(ComponentError::from_panic(
                        Stage::Resolver,
                        e.into_panic().as_ref(),
                    ));
                }
                Err(_) => return Err(ComponentError::Cancelled),
            }
        }

        Ok(slots.into_iter().flatten().flatten().collect())
    }
}
