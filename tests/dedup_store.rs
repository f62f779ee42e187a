// tests/dedup_store.rs
// Persistence, eviction and reservation properties of the dedup store.

use offer_relay::{DedupStore, ReserveOutcome, SharedDedupStore};
use std::time::Duration;

fn shared(dir: &tempfile::TempDir, max_items: usize) -> SharedDedupStore {
    SharedDedupStore::new(DedupStore::load(dir.path().join("seen.txt"), max_items).unwrap())
}

#[test]
fn eviction_keeps_only_the_newest_max_items() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = DedupStore::load(dir.path().join("seen.txt"), 5).unwrap();

    for i in 0..8 {
        store.add(&format!("k{i}")).unwrap();
    }
    assert_eq!(store.len(), 5);
    for i in 0..3 {
        assert!(!store.contains(&format!("k{i}")), "k{i} should be evicted");
    }
    for i in 3..8 {
        assert!(store.contains(&format!("k{i}")), "k{i} should survive");
    }
}

#[test]
fn persisted_order_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.txt");

    let mut store = DedupStore::load(&path, 10).unwrap();
    for k in ["a", "b", "c"] {
        store.add(k).unwrap();
    }
    store.flush().unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content, "a\nb\nc\n");

    // reload with a smaller capacity keeps the most recent entries
    let reloaded = DedupStore::load(&path, 2).unwrap();
    assert!(!reloaded.contains("a"));
    assert!(reloaded.contains("b"));
    assert!(reloaded.contains("c"));
}

#[tokio::test]
async fn rollback_restores_pre_reservation_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = shared(&dir, 10);
    let keys = vec!["fp_text".to_string(), "img:fp_media".to_string()];

    assert_eq!(store.reserve(&keys).await.unwrap(), ReserveOutcome::Reserved);
    // simulated publish failure → rollback
    store.release(&keys).await.unwrap();

    assert!(!store.contains("fp_text").await);
    assert!(!store.contains("img:fp_media").await);
    assert_eq!(store.len().await, 0);

    // the same keys are reservable again
    assert_eq!(store.reserve(&keys).await.unwrap(), ReserveOutcome::Reserved);
}

#[tokio::test]
async fn reservation_is_flushed_before_the_lock_is_released() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.txt");
    let store = SharedDedupStore::new(DedupStore::load(&path, 10).unwrap());

    store.reserve(&["k1".to_string()]).await.unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content, "k1\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_admit_exactly_one() {
    let dir = tempfile::tempdir().unwrap();
    let store = shared(&dir, 100);

    let mut handles = Vec::new();
    for _ in 0..32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            // jitter so the tasks interleave at the lock
            tokio::time::sleep(Duration::from_millis(rand::random::<u64>() % 10)).await;
            store.reserve(&["same_content".to_string()]).await.unwrap()
        }));
    }

    let mut reserved = 0;
    let mut duplicates = 0;
    for h in handles {
        match h.await.unwrap() {
            ReserveOutcome::Reserved => reserved += 1,
            ReserveOutcome::Duplicate(_) => duplicates += 1,
        }
    }
    assert_eq!(reserved, 1);
    assert_eq!(duplicates, 31);
    assert_eq!(store.len().await, 1);
}
