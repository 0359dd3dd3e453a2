//! Property-based tests for the resolution engine
//!
//! The engine is compared against a synchronous reference model that
//! processes each message and then, recursively, everything its commands
//! resolve to (preorder). Causal-chain and depth-first ordering both follow
//! from agreement with the model.

use super::*;
use crate::environment::{resolver_fn, updater_fn};
use proptest::prelude::*;

type History = Vec<u8>;

/// Messages above 1 spawn two smaller children, so every chain terminates
fn children(message: u8) -> Vec<u8> {
    if message > 1 {
        vec![message / 2, message / 3]
    } else {
        vec![]
    }
}

/// Resolver maps a command to itself, dropping zeros
fn resolve_model(command: u8) -> Vec<u8> {
    if command == 0 {
        vec![]
    } else {
        vec![command]
    }
}

fn model_process(message: u8, history: &mut History, out: &mut Vec<Snapshot<u8, History, u8>>) {
    let previous = history.clone();
    history.push(message);
    let commands = children(message);
    out.push(Snapshot::Regular {
        state: history.clone(),
        commands: commands.clone(),
        previous_state: previous,
        message,
    });
    for command in commands {
        for resolved in resolve_model(command) {
            model_process(resolved, history, out);
        }
    }
}

fn model(inputs: &[u8]) -> Vec<Snapshot<u8, History, u8>> {
    let mut history = vec![];
    let mut out = vec![Snapshot::Initial {
        state: vec![],
        commands: vec![],
    }];
    for &message in inputs {
        model_process(message, &mut history, &mut out);
    }
    out
}

fn run_engine(inputs: Vec<u8>) -> (Vec<Snapshot<u8, History, u8>>, Result<(), ComponentError>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    runtime.block_on(async move {
        let env = Environment::new(
            History::new(),
            resolver_fn(|c: u8| async move {
                tokio::task::yield_now().await;
                Ok(resolve_model(c))
            }),
            updater_fn(|m: &u8, s: &History| {
                let mut next = s.clone();
                next.push(*m);
                Ok(Update::new(next).with_commands(children(*m)))
            }),
        );

        let (intake_tx, intake_rx) = mpsc::channel(4);
        let (snapshot_tx, mut snapshot_rx) = mpsc::channel(4);
        let engine = Engine::new(Uuid::new_v4(), env, intake_rx, snapshot_tx);
        let handle = tokio::spawn(engine.run(CancellationToken::new()));

        let feeder = tokio::spawn(async move {
            for message in inputs {
                if intake_tx.send(message).await.is_err() {
                    break;
                }
            }
        });

        let mut snapshots = vec![];
        while let Some(snapshot) = snapshot_rx.recv().await {
            snapshots.push(snapshot);
        }
        feeder.await.expect("feeder");
        let result = handle.await.expect("engine task");
        (snapshots, result)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_engine_matches_depth_first_model(inputs in proptest::collection::vec(0u8..24, 0..8)) {
        let (snapshots, result) = run_engine(inputs.clone());
        prop_assert_eq!(result, Ok(()));
        prop_assert_eq!(snapshots, model(&inputs));
    }

    #[test]
    fn prop_previous_state_links_each_snapshot(inputs in proptest::collection::vec(0u8..24, 1..8)) {
        let (snapshots, _) = run_engine(inputs);
        prop_assert!(snapshots[0].is_initial());
        for pair in snapshots.windows(2) {
            prop_assert_eq!(pair[1].previous_state(), Some(pair[0].state()));
        }
    }
}
