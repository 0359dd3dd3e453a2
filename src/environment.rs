//! Collaborators of an execution
//!
//! The environment bundles the three functions an execution is built from:
//! an initializer producing the seed, a pure updater computing transitions,
//! and a resolver turning commands into further messages. These traits
//! are the seams that tests replace with mocks.

use crate::error::{EffectError, TransitionError};
use crate::snapshot::Initial;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Bound shared by message, state and command types
pub trait Payload: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Payload for T {}

/// Result of a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update<S, C> {
    pub state: S,
    pub commands: Vec<C>,
}

impl<S, C> Update<S, C> {
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

/// Produces the seed of an execution
#[async_trait]
pub trait Initializer<S, C>: Send + Sync {
    async fn initialize(&self) -> Result<Initial<S, C>, EffectError>;
}

/// Pure transition function
///
/// Must not perform I/O. An `Err` is treated as a contract violation and
/// fails the whole execution.
pub trait Updater<M, S, C>: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`TransitionError`] when `message` has no valid transition
    /// from `state`.
    fn update(&self, message: &M, state: &S) -> Result<Update<S, C>, TransitionError>;
}

/// Turns a command into the messages it yields
///
/// Errors are fatal to the execution. Resolvers wanting recoverable
/// behavior should translate failures into messages themselves.
#[async_trait]
pub trait Resolver<M, C>: Send + Sync {
    async fn resolve(&self, command: C) -> Result<Vec<M>, EffectError>;
}

// ============================================================================
// Closure adapters
// ============================================================================

/// Initializer that hands out a fixed seed
pub struct StaticInitializer<S, C> {
    seed: Initial<S, C>,
}

impl<S, C> StaticInitializer<S, C> {
    pub fn new(seed: Initial<S, C>) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl<S: Payload, C: Payload> Initializer<S, C> for StaticInitializer<S, C> {
    async fn initialize(&self) -> Result<Initial<S, C>, EffectError> {
        Ok(self.seed.clone())
    }
}

pub struct FnInitializer<F>(F);

/// Wrap an async closure as an [`Initializer`]
pub fn initializer_fn<S, C, F, Fut>(f: F) -> FnInitializer<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Initial<S, C>, EffectError>> + Send,
{
    FnInitializer(f)
}

#[async_trait]
impl<S, C, F, Fut> Initializer<S, C> for FnInitializer<F>
where
    S: Send + 'static,
    C: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Initial<S, C>, EffectError>> + Send,
{
    async fn initialize(&self) -> Result<Initial<S, C>, EffectError> {
        (self.0)().await
    }
}

pub struct FnUpdater<F>(F);

/// Wrap a closure as an [`Updater`]
pub fn updater_fn<M, S, C, F>(f: F) -> FnUpdater<F>
where
    F: Fn(&M, &S) -> Result<Update<S, C>, TransitionError> + Send + Sync,
{
    FnUpdater(f)
}

impl<M, S, C, F> Updater<M, S, C> for FnUpdater<F>
where
    F: Fn(&M, &S) -> Result<Update<S, C>, TransitionError> + Send + Sync,
{
    fn update(&self, message: &M, state: &S) -> Result<Update<S, C>, TransitionError> {
        (self.0)(message, state)
    }
}

pub struct FnResolver<F>(F);

/// Wrap an async closure as a [`Resolver`]
pub fn resolver_fn<M, C, F, Fut>(f: F) -> FnResolver<F>
where
    F: Fn(C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<M>, EffectError>> + Send,
{
    FnResolver(f)
}

#[async_trait]
impl<M, C, F, Fut> Resolver<M, C> for FnResolver<F>
where
    M: Send + 'static,
    C: Send + 'static,
    F: Fn(C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<M>, EffectError>> + Send,
{
    async fn resolve(&self, command: C) -> Result<Vec<M>, EffectError> {
        (self.0)(command).await
    }
}

/// Logging wrapper for resolvers
pub struct LoggingResolver<R> {
    inner: R,
    name: String,
}

impl<R> LoggingResolver<R> {
    pub fn new(name: impl Into<String>, inner: R) -> Self {
        Self {
            inner,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<M, C, R> Resolver<M, C> for LoggingResolver<R>
where
    M: Send + 'static,
    C: Send + std::fmt::Debug + 'static,
    R: Resolver<M, C>,
{
    async fn resolve(&self, command: C) -> Result<Vec<M>, EffectError> {
        let start = std::time::Instant::now();
        let description = format!("{command:?}");
        let result = self.inner.resolve(command).await;
        let duration = start.elapsed();

        match &result {
            Ok(messages) => {
                tracing::debug!(
                    resolver = %self.name,
                    command = %description,
                    duration_ms = %duration.as_millis(),
                    messages = messages.len(),
                    "Command resolved"
                );
            }
            Err(e) => {
                tracing::error!(
                    resolver = %self.name,
                    command = %description,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    "Command resolution failed"
                );
            }
        }

        result
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Immutable bundle of collaborators shared by every access to an execution
pub struct Environment<M, S, C> {
    pub(crate) initializer: Arc<dyn Initializer<S, C>>,
    pub(crate) resolver: Arc<dyn Resolver<M, C>>,
    pub(crate) updater: Arc<dyn Updater<M, S, C>>,
    /// Runtime that resolver work is spawned on; the caller's runtime if unset
    pub(crate) resolver_runtime: Option<Handle>,
}

impl<M, S, C> Clone for Environment<M, S, C> {
    fn clone(&self) -> Self {
        Self {
            initializer: Arc::clone(&self.initializer),
            resolver: Arc::clone(&self.resolver),
            updater: Arc::clone(&self.updater),
            resolver_runtime: self.resolver_runtime.clone(),
        }
    }
}

impl<M: Payload, S: Payload, C: Payload> Environment<M, S, C> {
    /// Environment seeded with a fixed initial state and no initial commands
    pub fn new(
        initial_state: S,
        resolver: impl Resolver<M, C> + 'static,
        updater: impl Updater<M, S, C> + 'static,
    ) -> Self {
        Self::with_initializer(
            StaticInitializer::new(Initial::new(initial_state)),
            resolver,
            updater,
        )
    }

    pub fn with_initializer(
        initializer: impl Initializer<S, C> + 'static,
        resolver: impl Resolver<M, C> + 'static,
        updater: impl Updater<M, S, C> + 'static,
    ) -> Self {
        Self {
            initializer: Arc::new(initializer),
            resolver: Arc::new(resolver),
            updater: Arc::new(updater),
            resolver_runtime: None,
        }
    }

    /// Replace the initializer with a fixed seed of `initial_state` and
    /// `commands`
    #[must_use]
    pub fn with_initial(mut self, initial_state: S, commands: impl IntoIterator<Item = C>) -> Self {
        self.initializer = Arc::new(StaticInitializer::new(
            Initial::new(initial_state).with_commands(commands),
        ));
        self
    }

    /// Spawn resolver work on a dedicated runtime, e.g. one sized for
    /// blocking I/O, instead of the runtime driving the engine
    #[must_use]
    pub fn with_resolver_runtime(mut self, handle: Handle) -> Self {
        self.resolver_runtime = Some(handle);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closure_adapters_forward_calls() {
        let updater = updater_fn(|m: &char, s: &String| {
            Ok(Update::new(format!("{s}{m}")).with_command(m.to_ascii_uppercase()))
        });
        let update = updater.update(&'a', &"x".to_string()).unwrap();
        assert_eq!(update, Update::new("xa".to_string()).with_command('A'));

        let resolver = resolver_fn(|c: char| async move { Ok(vec![c, c]) });
        assert_eq!(resolver.resolve('z').await.unwrap(), vec!['z', 'z']);

        let initializer = initializer_fn(|| async { Ok(Initial::<u8, u8>::new(7)) });
        assert_eq!(initializer.initialize().await.unwrap().state, 7);
    }

    #[tokio::test]
    async fn test_initial_commands_seed_the_static_initializer() {
        let env: Environment<char, String, char> = Environment::new(
            String::new(),
            resolver_fn(|c: char| async move { Ok(vec![c]) }),
            updater_fn(|_: &char, s: &String| Ok(Update::new(s.clone()))),
        )
        .with_initial("seed".to_string(), ['a', 'b']);

        let seed = env.initializer.initialize().await.unwrap();
        assert_eq!(seed.state, "seed");
        assert_eq!(seed.commands, vec!['a', 'b']);
    }

    #[tokio::test]
    async fn test_logging_resolver_passes_results_through() {
        let inner = resolver_fn(|c: u32| async move {
            if c == 0 {
                Err(EffectError::new("zero"))
            } else {
                Ok(vec![c * 2])
            }
        });
        let resolver = LoggingResolver::new("doubler", inner);
        assert_eq!(resolver.resolve(4).await.unwrap(), vec![8]);
        assert_eq!(resolver.resolve(0).await, Err(EffectError::new("zero")));
    }
}
