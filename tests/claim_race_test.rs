//! Mutual exclusion of the atomic claim under concurrent workers.

use std::sync::{Arc, Barrier};
use std::thread;

use indexsync::state::{FsStateStore, JobState, StateError};
use tempfile::TempDir;

#[test]
fn test_concurrent_claims_produce_exactly_one_winner() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(
        FsStateStore::open(&temp.path().join("state"), &temp.path().join("queue"), 3).unwrap(),
    );
    std::fs::write(store.incoming_dir().join("batch.jsonl"), "{}\n").unwrap();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let mut handles = Vec::new();

    for _ in 0..workers {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            store.claim_job("batch.jsonl")
        }));
    }

    let mut winners = 0;
    let mut losers = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(job) => {
                assert_eq!(job.state, JobState::Processing);
                winners += 1;
            }
            Err(StateError::AlreadyClaimed { file }) => {
                assert_eq!(file, "batch.jsonl");
                losers += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners, 1, "exactly one worker must win the claim");
    assert_eq!(losers, workers - 1);

    // The losers performed no side effects: one file in processing, nothing
    // anywhere else.
    assert_eq!(store.list_jobs(JobState::Processing).unwrap().len(), 1);
    assert!(store.list_jobs(JobState::Pending).unwrap().is_empty());
    assert!(store.list_jobs(JobState::Done).unwrap().is_empty());
    assert!(store.list_jobs(JobState::Error).unwrap().is_empty());
}

#[test]
fn test_repeated_claim_cycles_keep_single_ownership() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(
        FsStateStore::open(&temp.path().join("state"), &temp.path().join("queue"), 10).unwrap(),
    );
    std::fs::write(store.incoming_dir().join("batch.jsonl"), "{}\n").unwrap();

    // Claim, fail retryably (back to pending), race again. Ownership stays
    // exclusive across cycles.
    for _ in 0..3 {
        let first = store.claim_job("batch.jsonl");
        let second = store.claim_job("batch.jsonl");
        assert!(first.is_ok());
        assert!(matches!(second, Err(StateError::AlreadyClaimed { .. })));

        store
            .complete_job(
                "batch.jsonl",
                indexsync::state::JobOutcome::Failed {
                    reason: "try again".to_string(),
                },
            )
            .unwrap();
    }
}
