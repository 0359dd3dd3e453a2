//! Snapshots emitted by an execution
//!
//! A snapshot records the state right after a transition plus the commands
//! that transition produced. The first snapshot of every execution is
//! `Initial`; each processed message yields one `Regular`.

use serde::Serialize;
use serde_json::Value;

/// Seed produced by an initializer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initial<S, C> {
    pub state: S,
    pub commands: Vec<C>,
}

impl<S, C> Initial<S, C> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            commands: vec![],
        }
    }

    #[must_use]
    pub fn with_command(mut self, command: C) -> Self {
        self.commands.push(command);
        self
    }

    #[must_use]
    pub fn with_commands(mut self, commands: impl IntoIterator<Item = C>) -> Self {
        self.commands.extend(commands);
        self
    }
}

/// Point-in-time record of an execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot<M, S, C> {
    Initial {
        state: S,
        commands: Vec<C>,
    },
    Regular {
        state: S,
        commands: Vec<C>,
        previous_state: S,
        message: M,
    },
}

impl<M, S, C> From<Initial<S, C>> for Snapshot<M, S, C> {
    fn from(initial: Initial<S, C>) -> Self {
        Snapshot::Initial {
            state: initial.state,
            commands: initial.commands,
        }
    }
}

impl<M, S, C> Snapshot<M, S, C> {
    pub fn state(&self) -> &S {
        match self {
            Snapshot::Initial { state, .. } | Snapshot::Regular { state, .. } => state,
        }
    }

    pub fn commands(&self) -> &[C] {
        match self {
            Snapshot::Initial { commands, .. } | Snapshot::Regular { commands, .. } => commands,
        }
    }

    /// The message that produced this snapshot, `None` for `Initial`
    pub fn message(&self) -> Option<&M> {
        match self {
            Snapshot::Initial { .. } => None,
            Snapshot::Regular { message, .. } => Some(message),
        }
    }

    pub fn previous_state(&self) -> Option<&S> {
        match self {
            Snapshot::Initial { .. } => None,
            Snapshot::Regular { previous_state, .. } => Some(previous_state),
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, Snapshot::Initial { .. })
    }

    /// Consume the snapshot, dispatching on its variant
    pub fn fold<R>(
        self,
        initial: impl FnOnce(S, Vec<C>) -> R,
        regular: impl FnOnce(S, Vec<C>, S, M) -> R,
    ) -> R {
        match self {
            Snapshot::Initial { state, commands } => initial(state, commands),
            Snapshot::Regular {
                state,
                commands,
                previous_state,
                message,
            } => regular(state, commands, previous_state, message),
        }
    }

    pub fn into_state(self) -> S {
        self.fold(|state, _| state, |state, _, _, _| state)
    }
}

/// Wire form of a snapshot consumed by time-travel tooling
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<'a, M, S, C> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a M>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<&'a S>,
    pub current_state: &'a S,
    pub commands: &'a [C],
}

impl<M, S, C> Snapshot<M, S, C>
where
    M: Serialize,
    S: Serialize,
    C: Serialize,
{
    pub fn envelope(&self) -> Envelope<'_, M, S, C> {
        Envelope {
            kind: if self.is_initial() { "initial" } else { "regular" },
            message: self.message(),
            previous_state: self.previous_state(),
            current_state: self.state(),
            commands: self.commands(),
        }
    }

    /// # Errors
    ///
    /// Fails if the message, state or command type refuses to serialize.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.envelope())
    }
}
