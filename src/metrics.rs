// src/metrics.rs
//! Metric registration and optional Prometheus exposition.

use anyhow::{Context, Result};
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;

/// One-time counter registration so series show up with help text.
pub fn describe() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_rejected_total", "Items rejected by the scoring gate.");
        describe_counter!("relay_duplicate_total", "Items dropped as duplicates.");
        describe_counter!("relay_published_total", "Items published to the target chat.");
        describe_counter!("relay_dry_run_total", "Items handled in dry-run mode.");
        describe_counter!(
            "relay_rollback_total",
            "Reservations rolled back after a publish failure."
        );
        describe_counter!(
            "relay_media_fetch_failures_total",
            "Media downloads that failed (item continued without media)."
        );
        describe_counter!(
            "relay_rewrite_failures_total",
            "Rewrite calls that failed open to the original text."
        );
        describe_counter!(
            "relay_backfill_items_total",
            "Historical items processed during backfill."
        );
    });
}

/// Install the Prometheus recorder with its own HTTP listener.
pub fn install_exporter(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("parsing METRICS_ADDR {addr}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus: install recorder")?;
    Ok(())
}
