// src/processor.rs
//! Per-item state machine: score gate → fingerprints → reservation →
//! optional rewrite → media handling → publish, with rollback of the
//! reservation when the publish step fails.
//!
//! Concurrent items are independent; they only serialize through the dedup
//! store's guarded reserve/release. Media bytes live in an owned buffer that
//! drops on every exit path.

use anyhow::Result;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dedup::{ReserveOutcome, SharedDedupStore};
use crate::filter::OfferFilter;
use crate::fingerprint;
use crate::rewrite::Rewriter;
use crate::transport::{CandidateItem, MediaKind, SourceEntity, Transport};

/// Telegram caption hard limit, in characters.
pub const CAPTION_LIMIT: usize = 1024;
const DRY_RUN_PREVIEW_CHARS: usize = 250;

/// Terminal state of one processed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Scoring gate said no.
    Rejected { score: i32 },
    /// At least one fingerprint was already known.
    Duplicate,
    /// Reservation made, publish skipped (dry-run mode).
    DryRun,
    Published,
}

pub struct ProcessorOptions {
    pub destination: String,
    pub media_dedup: bool,
    pub rewrite_enabled: bool,
    pub dry_run: bool,
}

pub struct MessageProcessor {
    transport: Arc<dyn Transport>,
    rewriter: Arc<dyn Rewriter>,
    store: SharedDedupStore,
    filter: Arc<OfferFilter>,
    opts: ProcessorOptions,
}

impl MessageProcessor {
    pub fn new(
        transport: Arc<dyn Transport>,
        rewriter: Arc<dyn Rewriter>,
        store: SharedDedupStore,
        filter: Arc<OfferFilter>,
        opts: ProcessorOptions,
    ) -> Self {
        Self {
            transport,
            rewriter,
            store,
            filter,
            opts,
        }
    }

    pub async fn process(
        &self,
        item: CandidateItem,
        source: &SourceEntity,
    ) -> Result<ProcessOutcome> {
        let result = self.filter.evaluate(&item.text);
        if !result.is_interesting {
            debug!(
                source = %source.title,
                id = item.id,
                score = result.score,
                "item rejected by scoring"
            );
            counter!("relay_rejected_total").increment(1);
            return Ok(ProcessOutcome::Rejected {
                score: result.score,
            });
        }

        let mut fingerprints = Vec::new();
        if let Some(fp) = fingerprint::text_fingerprint(&item.text) {
            fingerprints.push(fp);
        }

        // Media fingerprinting materializes the bytes; keep them around so a
        // later publish does not download twice.
        let mut media_bytes: Option<Vec<u8>> = None;
        if self.opts.media_dedup {
            if let Some(media) = &item.media {
                match self.transport.download_media(media).await {
                    Ok(Some(bytes)) => {
                        fingerprints.push(fingerprint::media_fingerprint(&bytes));
                        media_bytes = Some(bytes);
                    }
                    Ok(None) => {
                        debug!(id = item.id, "media handle has no downloadable bytes")
                    }
                    Err(e) => {
                        warn!(error = ?e, id = item.id, "media download failed, skipping media fingerprint");
                        counter!("relay_media_fetch_failures_total").increment(1);
                    }
                }
            }
        }

        // Items with zero fingerprints are non-deduplicable; skip reservation.
        if !fingerprints.is_empty() {
            match self.store.reserve(&fingerprints).await? {
                ReserveOutcome::Duplicate(key) => {
                    debug!(source = %source.title, id = item.id, key = %key, "duplicate, skipping");
                    counter!("relay_duplicate_total").increment(1);
                    return Ok(ProcessOutcome::Duplicate);
                }
                ReserveOutcome::Reserved => {}
            }
        }

        // Dry run sits after reservation (the item stays recorded as seen)
        // but before the rewrite call, so rehearsals never spend quota.
        if self.opts.dry_run {
            let message =
                compose_message(&source.title, result.score, &result.reasons, &item.text);
            let preview: String = message.chars().take(DRY_RUN_PREVIEW_CHARS).collect();
            info!(source = %source.title, id = item.id, %preview, "[dry-run] would publish");
            counter!("relay_dry_run_total").increment(1);
            return Ok(ProcessOutcome::DryRun);
        }

        let mut body = item.text.clone();
        if self.opts.rewrite_enabled && !body.trim().is_empty() {
            body = self.rewriter.rewrite(&body).await;
        }

        let message = compose_message(&source.title, result.score, &result.reasons, &body);

        // Media that was not materialized for fingerprinting is fetched now;
        // a failed fetch degrades to a text-only publish.
        if media_bytes.is_none() {
            if let Some(media) = &item.media {
                match self.transport.download_media(media).await {
                    Ok(bytes) => media_bytes = bytes,
                    Err(e) => {
                        warn!(error = ?e, id = item.id, "media download failed, publishing text only");
                        counter!("relay_media_fetch_failures_total").increment(1);
                    }
                }
            }
        }

        let kind = item.media.as_ref().map(|m| m.kind);
        match self.publish(&message, kind, media_bytes).await {
            Ok(()) => {
                info!(
                    source = %source.title,
                    id = item.id,
                    score = result.score,
                    "published"
                );
                counter!("relay_published_total").increment(1);
                Ok(ProcessOutcome::Published)
            }
            Err(e) => {
                if !fingerprints.is_empty() {
                    if let Err(rollback_err) = self.store.release(&fingerprints).await {
                        warn!(error = ?rollback_err, id = item.id, "rollback flush failed");
                    }
                }
                counter!("relay_rollback_total").increment(1);
                Err(e)
            }
        }
    }

    async fn publish(
        &self,
        message: &str,
        kind: Option<MediaKind>,
        media_bytes: Option<Vec<u8>>,
    ) -> Result<()> {
        match (kind, media_bytes) {
            (Some(kind), Some(bytes)) => {
                let (caption, rest) = split_caption(message, CAPTION_LIMIT);
                self.transport
                    .send_file(&self.opts.destination, kind, bytes, caption)
                    .await?;
                if let Some(rest) = rest {
                    self.transport.send_text(&self.opts.destination, rest).await?;
                }
                Ok(())
            }
            _ => self.transport.send_text(&self.opts.destination, message).await,
        }
    }
}

/// Header + body of a published message.
pub fn compose_message(source_title: &str, score: i32, reasons: &[String], body: &str) -> String {
    let reason_text = if reasons.is_empty() {
        "no-reason".to_string()
    } else {
        reasons.join(", ")
    };
    format!(
        "🔥 Интересное предложение\nИсточник: {source_title}\nScore: {score} ({reason_text})\n\n{body}"
    )
    .trim()
    .to_string()
}

/// Char-based split at `limit`; the second half is `None` when the text fits.
pub fn split_caption(text: &str, limit: usize) -> (&str, Option<&str>) {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => (&text[..idx], Some(&text[idx..])),
        None => (text, None),
    }
}
