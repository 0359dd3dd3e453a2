//! Component runtime
//!
//! Runs an Elm-style state machine (initializer, pure updater, async
//! resolver) as a shared, multicast component. Resolved commands are fed
//! back depth-first before any further external input is read, and every
//! subscriber observes the same ordered sequence of snapshots.

mod component;
mod config;
mod engine;
mod environment;
mod error;
mod interceptor;
mod multicast;
mod snapshot;

pub use component::{Component, SnapshotStream};
pub use config::ComponentConfig;
pub use environment::{
    initializer_fn, resolver_fn, updater_fn, Environment, FnInitializer, FnResolver, FnUpdater,
    Initializer, LoggingResolver, Payload, Resolver, StaticInitializer, Update, Updater,
};
pub use error::{ComponentError, EffectError, Stage, TransitionError};
pub use interceptor::{Interceptor, MirrorInterceptor, TracingInterceptor};
pub use snapshot::{Envelope, Initial, Snapshot};
