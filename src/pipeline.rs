// src/pipeline.rs
//! Pipeline driver: resolves configured sources, runs the optional
//! chronological backfill, then drains the live feed, spawning one task per
//! inbound item. Shutdown drains in-flight items within a grace period and
//! flushes the dedup store.

use anyhow::{bail, Result};
use metrics::counter;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::dedup::SharedDedupStore;
use crate::processor::MessageProcessor;
use crate::transport::{SourceEntity, Transport};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct PipelineDriver {
    transport: Arc<dyn Transport>,
    processor: Arc<MessageProcessor>,
    store: SharedDedupStore,
    sources: Vec<String>,
    backfill_limit: usize,
    backfill_window_secs: i64,
}

impl PipelineDriver {
    pub fn new(
        transport: Arc<dyn Transport>,
        processor: Arc<MessageProcessor>,
        store: SharedDedupStore,
        sources: Vec<String>,
    ) -> Self {
        Self {
            transport,
            processor,
            store,
            sources,
            backfill_limit: 0,
            backfill_window_secs: 86_400,
        }
    }

    /// Enable backfill: up to `limit` items per source, no older than
    /// `window_secs`. A limit of 0 keeps backfill off.
    pub fn with_backfill(mut self, limit: usize, window_secs: i64) -> Self {
        self.backfill_limit = limit;
        self.backfill_window_secs = window_secs;
        self
    }

    /// Run until the live feed closes or `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let entities = self.resolve_sources().await?;
        let cache: Arc<HashMap<i64, SourceEntity>> = Arc::new(
            entities.iter().map(|e| (e.id, e.clone())).collect(),
        );

        if self.backfill_limit > 0 {
            self.backfill(&entities).await;
        }

        let mut rx = self.transport.subscribe(&entities).await?;
        info!(sources = entities.len(), "live feed started");

        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
                maybe = rx.recv() => {
                    let Some(item) = maybe else {
                        warn!("live feed closed");
                        break;
                    };
                    // reap finished tasks so the set does not grow unbounded
                    while let Some(res) = tasks.try_join_next() {
                        if let Err(e) = res {
                            warn!(error = ?e, "item task panicked");
                        }
                    }
                    let source = cache.get(&item.chat_id).cloned().unwrap_or(SourceEntity {
                        id: item.chat_id,
                        title: item.chat_id.to_string(),
                    });
                    let processor = self.processor.clone();
                    tasks.spawn(async move {
                        if let Err(e) = processor.process(item, &source).await {
                            warn!(error = ?e, source = %source.title, "item processing failed");
                        }
                    });
                }
            }
        }
        drop(rx);

        // Let in-flight items reach a terminal state before flushing.
        let drain = async {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    warn!(error = ?e, "item task panicked");
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("grace period elapsed, aborting in-flight items");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        self.store.flush().await?;
        info!("pipeline stopped");
        Ok(())
    }

    /// Resolve every configured source; unresolvable ones are skipped with a
    /// warning. Zero resolved sources is fatal.
    async fn resolve_sources(&self) -> Result<Vec<SourceEntity>> {
        let mut entities = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match self.transport.resolve(source).await {
                Ok(Some(entity)) => {
                    info!(source = %source, id = entity.id, title = %entity.title, "source resolved");
                    entities.push(entity);
                }
                Ok(None) => warn!(source = %source, "source not found, skipping"),
                Err(e) => warn!(error = ?e, source = %source, "source resolution failed, skipping"),
            }
        }
        if entities.is_empty() {
            bail!("none of the configured sources could be resolved");
        }
        Ok(entities)
    }

    /// Per-source history, processed oldest-first so reservation order
    /// matches real-world recency. One source failing does not stop the rest.
    async fn backfill(&self, entities: &[SourceEntity]) {
        let cutoff = chrono::Utc::now().timestamp() - self.backfill_window_secs;
        for entity in entities {
            match self
                .transport
                .fetch_history(entity, self.backfill_limit)
                .await
            {
                Ok(mut items) => {
                    items.retain(|i| i.timestamp >= cutoff);
                    items.sort_by_key(|i| i.timestamp);
                    let count = items.len();
                    for item in items {
                        counter!("relay_backfill_items_total").increment(1);
                        if let Err(e) = self.processor.process(item, entity).await {
                            warn!(error = ?e, source = %entity.title, "backfill item failed");
                        }
                    }
                    info!(source = %entity.title, items = count, "backfill complete");
                }
                Err(e) => {
                    warn!(error = ?e, source = %entity.title, "backfill failed, continuing")
                }
            }
        }
    }
}
