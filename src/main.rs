//! Counter demo
//!
//! Reads `inc`, `dec`, `save` and `reset` lines from stdin, runs them through
//! a shared component and prints every snapshot as a JSON envelope on stdout.
//! Logs go to stderr.

use component_runtime::{
    resolver_fn, Component, ComponentConfig, EffectError, Environment, LoggingResolver,
    MirrorInterceptor, TransitionError, Update, Updater,
};
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Simulated latency of the persistence effect
const SAVE_LATENCY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Message {
    Increment,
    Decrement,
    Save,
    Reset,
    Saved { value: i64 },
}

impl Message {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "inc" => Some(Self::Increment),
            "dec" => Some(Self::Decrement),
            "save" => Some(Self::Save),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Counter {
    value: i64,
    saved: Option<i64>,
    saving: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Command {
    Persist { value: i64 },
}

struct CounterUpdater;

impl Updater<Message, Counter, Command> for CounterUpdater {
    fn update(
        &self,
        message: &Message,
        state: &Counter,
    ) -> Result<Update<Counter, Command>, TransitionError> {
        let update = match message {
            Message::Increment => Update::new(Counter {
                value: state.value + 1,
                ..state.clone()
            }),
            Message::Decrement => Update::new(Counter {
                value: state.value - 1,
                ..state.clone()
            }),
            Message::Reset => Update::new(Counter {
                value: 0,
                ..state.clone()
            }),
            Message::Save => Update::new(Counter {
                saving: true,
                ..state.clone()
            })
            .with_command(Command::Persist { value: state.value }),
            Message::Saved { value } => {
                if !state.saving {
                    return Err(TransitionError::Invalid(format!(
                        "save of {value} completed while none was pending"
                    )));
                }
                Update::new(Counter {
                    saved: Some(*value),
                    saving: false,
                    ..state.clone()
                })
            }
        };
        Ok(update)
    }
}

fn counter_environment() -> Environment<Message, Counter, Command> {
    let persist = resolver_fn(|command: Command| async move {
        match command {
            Command::Persist { value } => {
                tokio::time::sleep(SAVE_LATENCY).await;
                Ok::<_, EffectError>(vec![Message::Saved { value }])
            }
        }
    });
    Environment::new(
        Counter::default(),
        LoggingResolver::new("counter", persist),
        CounterUpdater,
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "component_runtime=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ComponentConfig::from_env();
    tracing::info!(
        teardown_delay_ms = %config.teardown_delay.as_millis(),
        intake_capacity = config.intake_capacity,
        snapshot_capacity = config.snapshot_capacity,
        "Starting counter component"
    );

    let (mirror, mut envelopes) = MirrorInterceptor::channel();
    let component = Component::with_config(counter_environment(), config).with_interceptor(mirror);

    let input = LinesStream::new(BufReader::new(tokio::io::stdin()).lines()).filter_map(
        |line| async move {
            match line {
                Ok(line) => {
                    let message = Message::parse(&line);
                    if message.is_none() && !line.trim().is_empty() {
                        tracing::warn!(input = %line, "Unrecognized input, expected inc|dec|save|reset");
                    }
                    message
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read stdin line");
                    None
                }
            }
        },
    );

    let mut snapshots = component.invoke(input)?;
    loop {
        tokio::select! {
            Some(line) = envelopes.recv() => println!("{line}"),
            item = snapshots.next() => match item {
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Counter component failed");
                    return Err(e.into());
                }
                None => break,
            },
        }
    }

    // Interceptors run before delivery, so every envelope is already queued
    while let Ok(line) = envelopes.try_recv() {
        println!("{line}");
    }
    tracing::info!("Input exhausted, counter finished");
    Ok(())
}
