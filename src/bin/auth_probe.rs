//! Provisioning probe: verifies the bot token and every configured chat
//! identifier without starting the pipeline. Bot API tokens come from
//! @BotFather, so unlike a user session there is nothing interactive to do —
//! the probe only confirms the token works and each chat is reachable
//! (the bot must be a member of the target and the source channels).
//!
//! Run with: `cargo run --bin auth_probe`

use anyhow::{Context, Result};
use offer_relay::{BotApiTransport, Settings, Transport};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    let settings = Settings::from_env().context("loading configuration")?;
    let transport = BotApiTransport::new(&settings.bot_token, &settings.api_base)?;

    if !transport.is_authorized().await? {
        eprintln!("FAIL  token rejected by Telegram; issue a new one via @BotFather");
        std::process::exit(1);
    }
    transport.connect().await?;
    println!("OK    token accepted");

    let mut identifiers = vec![settings.target_chat.clone()];
    identifiers.extend(settings.sources.iter().cloned());

    for identifier in identifiers {
        match transport.resolve(&identifier).await {
            Ok(Some(entity)) => {
                println!("OK    {identifier} -> {} (id {})", entity.title, entity.id)
            }
            Ok(None) => println!("MISS  {identifier} not found (is the bot a member?)"),
            Err(e) => println!("FAIL  {identifier}: {e:#}"),
        }
    }

    Ok(())
}
