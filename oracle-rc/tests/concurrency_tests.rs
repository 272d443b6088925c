mod common;

use common::{finalized, oracle_with, Tracked};
use oracle_rc::interaction_log::system_preamble;
use oracle_rc::oracle::engine::ScriptedEngine;
use oracle_rc::{Handle, Phase, ReleaseOutcome};
use pretty_assertions::assert_eq;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

const THREADS: usize = 8;

#[test]
fn test_concurrent_copies_are_serialized_one_prompt_each() {
    let engine = ScriptedEngine::always("true").with_piece_delay(Duration::from_millis(2));
    let oracle = oracle_with(&engine);
    let (value, drops) = Tracked::new("shared");
    let root = Handle::with_type_tag(value, "Tracked", oracle.clone());

    let copies = Mutex::new(Vec::new());
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let copy = root.try_clone().unwrap();
                copies.lock().unwrap().push(copy);
            });
        }
    });

    assert_eq!(oracle.queries_served(), THREADS as u64);
    assert_eq!(engine.max_in_flight(), 1);
    assert_eq!(root.ref_count(), THREADS + 1);

    // every prompt is one complete snapshot: preamble, k copy records, open question
    let preamble = system_preamble("Tracked");
    let mut history_lengths: Vec<usize> = engine
        .prompts()
        .iter()
        .map(|prompt| {
            let body = prompt
                .strip_prefix(&preamble)
                .expect("prompt starts with the preamble");
            let history = body
                .strip_suffix("Q: copy()\nA:")
                .expect("prompt ends with the open question");
            assert_eq!(history, "Q: copy()\nA: true\n".repeat(history.len() / 18));
            history.len() / 18
        })
        .collect();
    history_lengths.sort_unstable();
    assert_eq!(history_lengths, (0..THREADS).collect::<Vec<_>>());

    drop(copies);
    assert_eq!(root.release(), ReleaseOutcome::Destroyed);
    assert_eq!(finalized(&drops), 1);
}

#[test]
fn test_concurrent_releases_ask_for_deletion_once() {
    for _ in 0..20 {
        let engine = ScriptedEngine::always("true");
        let oracle = oracle_with(&engine);
        let (value, drops) = Tracked::new("raced");
        let root = Handle::with_oracle(value, oracle.clone());
        let monitor = root.monitor().unwrap();

        let mut handles: Vec<_> = (0..THREADS - 1).map(|_| root.try_clone().unwrap()).collect();
        handles.push(root);

        let outcomes = Mutex::new(Vec::new());
        thread::scope(|s| {
            for handle in handles {
                let outcomes = &outcomes;
                s.spawn(move || {
                    let outcome = handle.release();
                    outcomes.lock().unwrap().push(outcome);
                });
            }
        });

        let outcomes = outcomes.into_inner().unwrap();
        let destroyed = outcomes
            .iter()
            .filter(|o| **o == ReleaseOutcome::Destroyed)
            .count();
        assert_eq!(destroyed, 1);
        assert_eq!(engine.calls(), THREADS, "7 copies and one release");
        assert_eq!(monitor.phase(), Phase::Destroyed);
        assert_eq!(finalized(&drops), 1);
    }
}

#[test]
fn test_independent_blocks_share_one_oracle_queue() {
    let engine = ScriptedEngine::always("true").with_piece_delay(Duration::from_millis(1));
    let oracle = oracle_with(&engine);

    let drops: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let oracle = oracle.clone();
                s.spawn(move || {
                    let (value, drops) = Tracked::new("own");
                    let handle = Handle::with_oracle(value, oracle);
                    let copy = handle.try_clone().unwrap();
                    drop(copy);
                    drop(handle);
                    drops
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert!(drops.iter().all(|d| finalized(d) == 1));
    assert_eq!(oracle.queries_served(), 2 * THREADS as u64);
    assert_eq!(engine.max_in_flight(), 1);
}
