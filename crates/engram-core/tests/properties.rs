//! Property-style checks over the embedded store: numeric bounds after
//! arbitrary review sequences, silent sentiment clamping, composite-key
//! uniqueness, referential integrity, and thread safety.

use std::sync::Arc;

use engram_core::{LearnRequest, Rating, Store, StoreConfig, TimePoint};
use tempfile::tempdir;

fn open_store(dir: &tempfile::TempDir) -> Store {
    let path = dir.path().join("kg.db");
    Store::open(StoreConfig::new(format!("sqlite://{}", path.display()))).unwrap()
}

fn round(day: u32, hour: u32) -> TimePoint {
    TimePoint::round(day, hour).unwrap()
}

#[test]
fn oversized_sentiment_is_stored_clamped_without_error() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);

    for (i, (raw, expected)) in [(-5.0, -1.0), (-1.5, -1.0), (1.5, 1.0), (99.0, 1.0), (0.3, 0.3)]
        .into_iter()
        .enumerate()
    {
        let target = format!("T{i}");
        store
            .learn(
                "Alice",
                LearnRequest::new("I", "rates", target.clone(), round(1, 0)).sentiment(raw),
            )
            .unwrap();
        let edge = store.get_edge("Alice", "I", "rates", &target).unwrap().unwrap();
        assert_eq!(edge.sentiment, expected, "raw {raw}");
    }
}

#[test]
fn scheduling_bounds_hold_under_arbitrary_review_sequences() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);

    // A deterministic mix of lapses, hard, good, easy at varied intervals
    let script = [
        (1u32, Rating::Good),
        (2, Rating::Again),
        (2, Rating::Hard),
        (5, Rating::Easy),
        (5, Rating::Again),
        (6, Rating::Again),
        (20, Rating::Good),
        (21, Rating::Easy),
        (60, Rating::Again),
        (61, Rating::Hard),
    ];
    for (day, rating) in script {
        store
            .learn(
                "Alice",
                LearnRequest::new("I", "studies", "Rust", round(day, 12)).rating(rating),
            )
            .unwrap();
        let node = store.get_node("Alice", "I").unwrap().unwrap();
        assert!(node.memory.stability >= 0.1, "floor violated on day {day}");
        assert!(
            (1.0..=10.0).contains(&node.memory.difficulty),
            "difficulty out of range on day {day}"
        );
    }
    let node = store.get_node("Alice", "I").unwrap().unwrap();
    assert_eq!(node.memory.reps, script.len() as u32);
}

#[test]
fn successful_reviews_never_regress_stability() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);

    let mut previous = 0.0;
    for (i, day) in [1u32, 2, 4, 9, 20, 45, 90].into_iter().enumerate() {
        let outcome = store
            .learn(
                "Alice",
                LearnRequest::new("I", "trusts", "Bob", round(day, 0)).rating(Rating::Good),
            )
            .unwrap();
        if i > 0 {
            assert!(
                outcome.source.stability >= previous,
                "regressed at day {day}: {} < {previous}",
                outcome.source.stability
            );
        }
        previous = outcome.source.stability;
    }
}

#[test]
fn edges_stay_unique_and_referentially_intact() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);

    for day in 1..=5u32 {
        store
            .learn(
                "Alice",
                LearnRequest::new("I", "support", "UBI", round(day, 0))
                    .sentiment(day as f64 / 10.0),
            )
            .unwrap();
        store
            .learn("Alice", LearnRequest::new("Bob", "opposes", "UBI", round(day, 1)))
            .unwrap();
    }

    let edges = store.list_edges("Alice").unwrap();
    assert_eq!(edges.len(), 2);

    // Every edge endpoint resolves to a node under the same owner
    for edge in &edges {
        for endpoint in [&edge.source, &edge.target] {
            assert!(
                store.get_node("Alice", endpoint).unwrap().is_some(),
                "dangling endpoint {endpoint}"
            );
        }
    }

    // The surviving row carries the last write
    let ubi = store.get_edge("Alice", "I", "support", "UBI").unwrap().unwrap();
    assert_eq!(ubi.sentiment, 0.5);
    assert_eq!(ubi.created_at, round(5, 0));
}

#[test]
fn log_ids_reflect_commit_order() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    for day in 1..=6u32 {
        store
            .learn("Alice", LearnRequest::new("I", "notes", "fact", round(day, 0)))
            .unwrap();
    }
    let log = store.iter_log("Alice", None, None).unwrap();
    assert_eq!(log.len(), 6);
    assert!(log.windows(2).all(|w| w[0].id < w[1].id));
}

#[test]
fn concurrent_writers_on_distinct_owners() {
    let dir = tempdir().unwrap();
    let store = Arc::new(open_store(&dir));

    let handles: Vec<_> = (0..4)
        .map(|agent_idx| {
            let store = store.clone();
            std::thread::spawn(move || {
                let owner = format!("agent-{agent_idx}");
                for day in 1..=10u32 {
                    store
                        .learn(
                            &owner,
                            LearnRequest::new("I", "counts", format!("item-{day}"), round(day, 0)),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for agent_idx in 0..4 {
        let owner = format!("agent-{agent_idx}");
        let stats = store.stats(&owner).unwrap();
        assert_eq!(stats.edges, 10);
        assert_eq!(stats.nodes, 11);
        assert_eq!(stats.log_records, 10);
    }
}
