//! Mock collaborators and stream helpers for component tests

use crate::component::SnapshotStream;
use crate::environment::{resolver_fn, updater_fn, Environment, Initializer, Resolver, Update};
use crate::error::{ComponentError, EffectError};
use crate::snapshot::{Initial, Snapshot};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

pub type Snap = Snapshot<char, String, char>;

// ============================================================================
// Mock Initializer
// ============================================================================

/// Initializer that counts its invocations and optionally takes its time
#[derive(Clone)]
pub struct CountingInitializer {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    state: String,
}

impl CountingInitializer {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            state: state.into(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Initializer<String, char> for CountingInitializer {
    async fn initialize(&self) -> Result<Initial<String, char>, EffectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Initial::new(self.state.clone()))
    }
}

// ============================================================================
// Mock Resolvers
// ============================================================================

/// Identity resolver that records every command it sees
#[derive(Clone, Default)]
pub struct RecordingResolver {
    pub resolved: Arc<Mutex<Vec<char>>>,
}

impl RecordingResolver {
    pub fn recorded(&self) -> Vec<char> {
        self.resolved.lock().unwrap().clone()
    }
}

#[async_trait]
impl Resolver<char, char> for RecordingResolver {
    async fn resolve(&self, command: char) -> Result<Vec<char>, EffectError> {
        self.resolved.lock().unwrap().push(command);
        Ok(vec![command])
    }
}

/// Resolver that parks every command until released
#[derive(Clone)]
pub struct GatedResolver {
    /// Notified when a resolution starts (for test synchronization)
    pub started: Arc<Notify>,
    gate: Arc<watch::Sender<bool>>,
}

impl GatedResolver {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            started: Arc::new(Notify::new()),
            gate: Arc::new(gate),
        }
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl Resolver<char, char> for GatedResolver {
    async fn resolve(&self, command: char) -> Result<Vec<char>, EffectError> {
        let mut gate = self.gate.subscribe();
        self.started.notify_one();
        let _ = gate.wait_for(|open| *open).await;
        Ok(vec![command])
    }
}

// ============================================================================
// Environments
// ============================================================================

/// State becomes the last message seen
pub fn replacing_env() -> Environment<char, String, char> {
    Environment::new(
        String::new(),
        resolver_fn(|c: char| async move { Ok(vec![c]) }),
        updater_fn(|m: &char, _: &String| Ok(Update::new(m.to_string()))),
    )
}

/// State accumulates messages; `'a'` also issues commands `'b'` and `'c'`
pub fn appending_env(
    resolver: impl Resolver<char, char> + 'static,
) -> Environment<char, String, char> {
    Environment::new(
        String::new(),
        resolver,
        updater_fn(|m: &char, s: &String| {
            let next = format!("{s}{m}");
            Ok(match m {
                'a' => Update::new(next).with_commands(['b', 'c']),
                _ => Update::new(next),
            })
        }),
    )
}

// ============================================================================
// Stream helpers
// ============================================================================

const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// Next item, failing the test if none arrives in time
pub async fn next_item(
    stream: &mut SnapshotStream<char, String, char>,
) -> Option<Result<Snap, ComponentError>> {
    tokio::time::timeout(STEP_TIMEOUT, stream.next())
        .await
        .expect("stream produced nothing in time")
}

pub async fn next_snapshot(stream: &mut SnapshotStream<char, String, char>) -> Snap {
    next_item(stream)
        .await
        .expect("stream ended early")
        .expect("stream failed")
}

pub async fn take_snapshots(stream: &mut SnapshotStream<char, String, char>, n: usize) -> Vec<Snap> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(next_snapshot(stream).await);
    }
    out
}

/// Drain the stream to its end
pub async fn collect_all(
    stream: SnapshotStream<char, String, char>,
) -> Vec<Result<Snap, ComponentError>> {
    tokio::time::timeout(STEP_TIMEOUT, stream.collect::<Vec<_>>())
        .await
        .expect("stream did not terminate in time")
}

/// True if nothing arrives within `window`
pub async fn stays_quiet(stream: &mut SnapshotStream<char, String, char>, window: Duration) -> bool {
    tokio::time::timeout(window, stream.next()).await.is_err()
}

pub fn initial(state: &str) -> Snap {
    Snapshot::Initial {
        state: state.to_string(),
        commands: vec![],
    }
}

pub fn regular(state: &str, previous: &str, message: char, commands: &[char]) -> Snap {
    Snapshot::Regular {
        state: state.to_string(),
        commands: commands.to_vec(),
        previous_state: previous.to_string(),
        message,
    }
}
