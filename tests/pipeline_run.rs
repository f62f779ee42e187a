// tests/pipeline_run.rs
// Driver behavior: source resolution, chronological backfill with failure
// isolation, live dispatch, and the graceful-shutdown flush.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use offer_relay::{
    fingerprint, CandidateItem, DedupStore, DisabledRewriter, MediaKind, MediaRef,
    MessageProcessor, OfferFilter, PipelineDriver, ProcessorOptions, ScoreTable,
    SharedDedupStore, SourceEntity, Transport,
};

#[derive(Default)]
struct ScriptedTransport {
    /// `resolve` answers from here; anything else is not-found.
    entities: HashMap<String, SourceEntity>,
    /// chat id → newest-first history.
    history: HashMap<i64, Vec<CandidateItem>>,
    /// chat ids whose history fetch fails.
    history_fail: HashSet<i64>,
    /// handed out once by `subscribe`.
    live_rx: Mutex<Option<mpsc::Receiver<CandidateItem>>>,
    published: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }
    async fn is_authorized(&self) -> Result<bool> {
        Ok(true)
    }
    async fn resolve(&self, source: &str) -> Result<Option<SourceEntity>> {
        Ok(self.entities.get(source).cloned())
    }
    async fn subscribe(
        &self,
        _entities: &[SourceEntity],
    ) -> Result<mpsc::Receiver<CandidateItem>> {
        match self.live_rx.lock().take() {
            Some(rx) => Ok(rx),
            None => {
                let (_tx, rx) = mpsc::channel(1);
                Ok(rx) // closed channel: live loop ends immediately
            }
        }
    }
    async fn fetch_history(
        &self,
        entity: &SourceEntity,
        limit: usize,
    ) -> Result<Vec<CandidateItem>> {
        if self.history_fail.contains(&entity.id) {
            bail!("simulated history failure for {}", entity.title);
        }
        let mut items = self.history.get(&entity.id).cloned().unwrap_or_default();
        items.truncate(limit);
        Ok(items)
    }
    async fn download_media(&self, _media: &MediaRef) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn send_text(&self, _destination: &str, text: &str) -> Result<()> {
        self.published.lock().push(text.to_string());
        Ok(())
    }
    async fn send_file(
        &self,
        _destination: &str,
        _kind: MediaKind,
        _bytes: Vec<u8>,
        caption: &str,
    ) -> Result<()> {
        self.published.lock().push(caption.to_string());
        Ok(())
    }
}

fn entity(id: i64, title: &str) -> SourceEntity {
    SourceEntity {
        id,
        title: title.to_string(),
    }
}

fn item(chat_id: i64, id: i64, text: &str, timestamp: i64) -> CandidateItem {
    CandidateItem {
        id,
        chat_id,
        text: text.to_string(),
        timestamp,
        media: None,
    }
}

/// min_score 0: every non-empty text passes the gate.
fn accept_all_filter() -> Arc<OfferFilter> {
    Arc::new(OfferFilter::new(vec![], vec![], 0, ScoreTable::default()))
}

fn build_driver(
    transport: Arc<ScriptedTransport>,
    sources: Vec<&str>,
) -> (PipelineDriver, SharedDedupStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store =
        SharedDedupStore::new(DedupStore::load(dir.path().join("seen.txt"), 100).unwrap());
    let processor = Arc::new(MessageProcessor::new(
        transport.clone(),
        Arc::new(DisabledRewriter),
        store.clone(),
        accept_all_filter(),
        ProcessorOptions {
            destination: "@dest".to_string(),
            media_dedup: false,
            rewrite_enabled: false,
            dry_run: false,
        },
    ));
    let driver = PipelineDriver::new(
        transport,
        processor,
        store.clone(),
        sources.into_iter().map(str::to_string).collect(),
    );
    (driver, store, dir)
}

#[tokio::test]
async fn zero_resolvable_sources_is_fatal() {
    let transport = Arc::new(ScriptedTransport::default());
    let (driver, _store, _dir) = build_driver(transport, vec!["@ghost_a", "@ghost_b"]);

    let err = driver.run(std::future::pending()).await.unwrap_err();
    assert!(err.to_string().contains("sources"));
}

#[tokio::test]
async fn unresolvable_sources_are_skipped_not_fatal() {
    let (tx, rx) = mpsc::channel(8);
    let mut transport = ScriptedTransport::default();
    transport.entities.insert("@alive".to_string(), entity(1, "Alive"));
    *transport.live_rx.lock() = Some(rx);
    let transport = Arc::new(transport);

    let (driver, _store, _dir) = build_driver(transport.clone(), vec!["@ghost", "@alive"]);

    tx.send(item(1, 10, "from the living channel", 100)).await.unwrap();
    drop(tx); // closes the feed so run() returns

    driver.run(std::future::pending()).await.unwrap();

    let published = transport.published.lock();
    assert_eq!(published.len(), 1);
    assert!(published[0].contains("Источник: Alive"));
    assert!(published[0].contains("from the living channel"));
}

#[tokio::test]
async fn backfill_is_chronological_and_failures_stay_local() {
    let now = chrono::Utc::now().timestamp();
    let mut transport = ScriptedTransport::default();
    transport.entities.insert("@broken".to_string(), entity(1, "Broken"));
    transport.entities.insert("@healthy".to_string(), entity(2, "Healthy"));
    transport.history_fail.insert(1);
    // newest-first, as the transport contract specifies; the last one is
    // outside the lookback window
    transport.history.insert(
        2,
        vec![
            item(2, 33, "third", now - 10),
            item(2, 32, "second", now - 20),
            item(2, 31, "first", now - 30),
            item(2, 30, "ancient", now - 50_000),
        ],
    );
    let transport = Arc::new(transport);

    let (driver, _store, _dir) = build_driver(transport.clone(), vec!["@broken", "@healthy"]);
    let driver = driver.with_backfill(10, 1_000);

    driver.run(std::future::pending()).await.unwrap();

    let published = transport.published.lock();
    let bodies: Vec<&str> = published
        .iter()
        .map(|p| p.rsplit("\n\n").next().unwrap())
        .collect();
    assert_eq!(bodies, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn backfill_respects_the_per_source_cap() {
    let now = chrono::Utc::now().timestamp();
    let mut transport = ScriptedTransport::default();
    transport.entities.insert("@src".to_string(), entity(5, "Src"));
    transport.history.insert(
        5,
        vec![
            item(5, 3, "newest", now - 1),
            item(5, 2, "middle", now - 2),
            item(5, 1, "oldest", now - 3),
        ],
    );
    let transport = Arc::new(transport);

    let (driver, _store, _dir) = build_driver(transport.clone(), vec!["@src"]);
    let driver = driver.with_backfill(2, 1_000);

    driver.run(std::future::pending()).await.unwrap();

    // cap applies to the newest items; the oldest falls off
    let published = transport.published.lock();
    let bodies: Vec<&str> = published
        .iter()
        .map(|p| p.rsplit("\n\n").next().unwrap())
        .collect();
    assert_eq!(bodies, vec!["middle", "newest"]);
}

#[tokio::test]
async fn shutdown_drains_in_flight_items_and_flushes_the_store() {
    let (tx, rx) = mpsc::channel(8);
    let mut transport = ScriptedTransport::default();
    transport.entities.insert("@src".to_string(), entity(7, "Src"));
    *transport.live_rx.lock() = Some(rx);
    let transport = Arc::new(transport);

    let (driver, store, dir) = build_driver(transport.clone(), vec!["@src"]);

    tx.send(item(7, 1, "last minute deal", 100)).await.unwrap();
    let shutdown = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
    };
    driver.run(shutdown).await.unwrap();
    drop(tx);

    assert_eq!(transport.published.lock().len(), 1);

    // the fingerprint reached disk on the graceful path
    let fp = fingerprint::text_fingerprint("last minute deal").unwrap();
    assert!(store.contains(&fp).await);
    let content = std::fs::read_to_string(dir.path().join("seen.txt")).unwrap();
    assert!(content.contains(&fp));
}
