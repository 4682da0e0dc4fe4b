//! Store invariants: idempotent upserts, non-destructive merges, one entry
//! per `(source, permalink)`, no lost updates under concurrent writers, and
//! a persisted document that reloads into the same state.

use std::sync::Arc;
use std::time::Duration;

use hypesignal_common::Record;
use hypesignal_scout::store::{IdAllocator, Store, UpsertOutcome};
use rand::Rng;

fn post(source: &str, link: &str, title: &str) -> Record {
    Record {
        source: source.to_string(),
        title: Some(title.to_string()),
        link: Some(link.to_string()),
        upvotes_likes: 12,
        ..Default::default()
    }
}

fn memory_store() -> Store {
    Store::in_memory(Arc::new(IdAllocator::new()))
}

#[test]
fn upserting_identical_record_twice_is_idempotent() {
    let once = memory_store();
    once.upsert(post("r/pumpfun", "https://r/1", "New launch"));

    let twice = memory_store();
    twice.upsert(post("r/pumpfun", "https://r/1", "New launch"));
    twice.upsert(post("r/pumpfun", "https://r/1", "New launch"));

    let a = serde_json::to_string(&once.snapshot()).unwrap();
    let b = serde_json::to_string(&twice.snapshot()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn empty_comment_list_never_erases_existing_comments() {
    let store = memory_store();
    let mut first = post("r/altcoin", "https://r/9", "Thread");
    first.comments = vec!["first comment in thread".into(), "second comment in thread".into()];
    first.comment_count = 2;
    store.upsert(first);

    let rescrape = post("r/altcoin", "https://r/9", "Thread");
    assert!(matches!(store.upsert(rescrape), UpsertOutcome::Merged(_)));

    let entry = &store.snapshot()[0];
    assert_eq!(entry.comments.len(), 2);
    assert_eq!(entry.comment_count, 2);
}

#[test]
fn label_survives_rescrape_without_label() {
    let store = memory_store();
    let mut labelled = post("r/solana", "https://r/4", "Look at $WIF");
    labelled.token_name = Some("WIF".into());
    store.upsert(labelled);
    store.upsert(post("r/solana", "https://r/4", "Look at $WIF"));

    assert_eq!(store.snapshot()[0].token_name.as_deref(), Some("WIF"));
    assert_eq!(store.missing_labels(), 0);
}

#[test]
fn duplicate_keys_collapse_to_one_entry_each() {
    let store = memory_store();
    let stream = [
        ("r/a", "https://r/1"),
        ("r/a", "https://r/2"),
        ("r/a", "https://r/1"),
        ("r/b", "https://r/1"),
        ("r/a", "https://r/2"),
        ("r/b", "https://r/1"),
    ];
    for (i, (source, link)) in stream.iter().enumerate() {
        store.upsert(post(source, link, &format!("title {i}")));
    }

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 3);
    let mut keys: Vec<_> = snapshot
        .iter()
        .map(|e| (e.source.clone(), e.link.clone().unwrap()))
        .collect();
    keys.dedup();
    assert_eq!(keys.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_lose_no_updates() {
    const WORKERS: usize = 8;
    const RECORDS: usize = 40;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts.json");
    let store = Arc::new(Store::open(&path, Arc::new(IdAllocator::new())));

    let mut handles = Vec::new();
    for worker in 0..WORKERS {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..RECORDS {
                let jitter = rand::rng().random_range(0..300u64);
                tokio::time::sleep(Duration::from_micros(jitter)).await;
                store.upsert(post(
                    &format!("r/source{worker}"),
                    &format!("https://r/{worker}/{i}"),
                    &format!("post {i}"),
                ));
                if i % 10 == 0 {
                    store.persist().unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    store.persist().unwrap();

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), WORKERS * RECORDS);

    let mut ids: Vec<u64> = snapshot.iter().map(|e| e.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), WORKERS * RECORDS);

    let reloaded = Store::open(&path, Arc::new(IdAllocator::new()));
    assert_eq!(reloaded.len(), WORKERS * RECORDS);
}

#[test]
fn reopened_store_continues_discovery_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("posts.json");

    let store = Store::open(&path, Arc::new(IdAllocator::new()));
    store.upsert(post("r/a", "https://r/1", "one"));
    store.upsert(post("r/a", "https://r/2", "two"));
    assert_eq!(store.persist().unwrap(), 2);

    let reopened = Store::open(&path, Arc::new(IdAllocator::new()));
    assert_eq!(reopened.snapshot(), store.snapshot());

    let next = reopened.upsert(post("r/a", "https://r/3", "three"));
    assert_eq!(next, UpsertOutcome::Inserted(3));
    // a known key still merges into the loaded entry
    assert_eq!(
        reopened.upsert(post("r/a", "https://r/1", "one again")),
        UpsertOutcome::Merged(1)
    );
}

#[test]
fn missing_empty_and_corrupt_files_open_empty() {
    let dir = tempfile::tempdir().unwrap();

    let missing = Store::open(dir.path().join("absent.json"), Arc::new(IdAllocator::new()));
    assert!(missing.is_empty());

    let empty_path = dir.path().join("empty.json");
    std::fs::write(&empty_path, "").unwrap();
    assert!(Store::open(&empty_path, Arc::new(IdAllocator::new())).is_empty());

    let corrupt_path = dir.path().join("corrupt.json");
    std::fs::write(&corrupt_path, "[{\"id\": 1, \"title\": ").unwrap();
    let corrupt = Store::open(&corrupt_path, Arc::new(IdAllocator::new()));
    assert!(corrupt.is_empty());

    corrupt.upsert(post("r/a", "https://r/1", "fresh"));
    corrupt.persist().unwrap();
    let raw = std::fs::read_to_string(&corrupt_path).unwrap();
    let entries: Vec<Record> = serde_json::from_str(&raw).unwrap();
    assert_eq!(entries.len(), 1);
}

#[test]
fn persisted_document_is_a_json_array_with_null_labels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts.json");
    let store = Store::open(&path, Arc::new(IdAllocator::new()));
    store.upsert(post("r/a", "https://r/1", "one"));
    store.persist().unwrap();

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let entries = value.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0]["token_name"].is_null());
    assert_eq!(entries[0]["source"], "r/a");
}
