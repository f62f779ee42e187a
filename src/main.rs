//! offer-relay — Binary Entrypoint
//! Boots tracing, loads settings, wires the transport, dedup store, rewriter
//! and pipeline driver, then runs until interrupted.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use offer_relay::{
    metrics, BotApiTransport, DedupStore, DisabledRewriter, MessageProcessor, OfferFilter,
    OpenAiRewriter, PipelineDriver, ProcessorOptions, Rewriter, ScoreTable, Settings,
    SharedDedupStore, Transport,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env().context("loading configuration")?;

    if let Some(addr) = &settings.metrics_addr {
        metrics::install_exporter(addr)?;
    }
    metrics::describe();

    let table = match &settings.scoring_config_path {
        Some(path) => ScoreTable::load(path).context("loading scoring table")?,
        None => ScoreTable::default(),
    };
    let filter = Arc::new(OfferFilter::new(
        settings.include_keywords.clone(),
        settings.exclude_keywords.clone(),
        settings.min_score,
        table,
    ));

    let store = DedupStore::load(&settings.dedup_path, settings.dedup_max_items)
        .context("loading dedup store")?;
    info!(
        entries = store.len(),
        path = %settings.dedup_path.display(),
        "dedup store loaded"
    );
    let store = SharedDedupStore::new(store);

    let transport: Arc<dyn Transport> =
        Arc::new(BotApiTransport::new(&settings.bot_token, &settings.api_base)?);
    transport.connect().await.context("connecting to Telegram")?;
    if !transport.is_authorized().await? {
        bail!(
            "bot token rejected by Telegram; check TG_BOT_TOKEN or issue a new token via @BotFather"
        );
    }

    let rewriter: Arc<dyn Rewriter> = if settings.rewrite_enabled {
        Arc::new(OpenAiRewriter::new(
            settings.openai_api_key.clone(),
            settings.openai_model.clone(),
        ))
    } else {
        Arc::new(DisabledRewriter)
    };
    info!(rewriter = rewriter.name(), dry_run = settings.dry_run, "relay configured");

    let processor = Arc::new(MessageProcessor::new(
        transport.clone(),
        rewriter,
        store.clone(),
        filter,
        ProcessorOptions {
            destination: settings.target_chat.clone(),
            media_dedup: settings.media_dedup,
            rewrite_enabled: settings.rewrite_enabled,
            dry_run: settings.dry_run,
        },
    ));

    let driver = PipelineDriver::new(transport, processor, store, settings.sources.clone())
        .with_backfill(settings.backfill_limit, settings.backfill_window_secs);

    driver
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("exiting");
    Ok(())
}
