//! Error types for the component runtime

use thiserror::Error;

/// Failure reported by an initializer or resolver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EffectError {
    pub message: String,
}

impl EffectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors an updater may return for a `(message, state)` pair
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("No transition defined: {0}")]
    Unhandled(String),
    #[error("Invalid transition: {0}")]
    Invalid(String),
}

/// Where a panic was caught
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Engine,
    Resolver,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Engine => f.write_str("engine"),
            Stage::Resolver => f.write_str("resolver"),
        }
    }
}

/// Terminal error observed by subscribers, or returned by facade calls
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    #[error("Initialization failed: {0}")]
    Initialization(EffectError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Effect failed: {0}")]
    Effect(EffectError),
    #[error("Panic in {stage}: {message}")]
    Panicked { stage: Stage, message: String },
    #[error("Execution cancelled")]
    Cancelled,
    #[error("Component already disposed")]
    Disposed,
    #[error("No execution is running")]
    NotRunning,
}

impl ComponentError {
    /// Build a `Panicked` error from a `JoinError` or `catch_unwind` payload
    pub(crate) fn from_panic(stage: Stage, payload: &(dyn std::any::Any + Send)) -> Self {
        Self::Panicked {
            stage,
            message: panic_message(payload),
        }
    }

    /// Whether this error came from the application's collaborators rather
    /// than from the runtime shutting down
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Disposed | Self::NotRunning)
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
