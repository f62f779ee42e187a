// src/config.rs
//! Environment-driven settings, built once in `main` and handed to each
//! component. Fatal preconditions (token, destination, sources) are checked
//! here, before any network activity.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Settings {
    pub bot_token: String,
    pub api_base: String,
    pub sources: Vec<String>,
    pub target_chat: String,
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub min_score: i32,
    pub dry_run: bool,
    pub dedup_path: PathBuf,
    pub dedup_max_items: usize,
    pub media_dedup: bool,
    pub backfill_limit: usize,
    pub backfill_window_secs: i64,
    pub rewrite_enabled: bool,
    pub openai_api_key: String,
    pub openai_model: String,
    pub scoring_config_path: Option<PathBuf>,
    pub metrics_addr: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let bot_token = var_or("TG_BOT_TOKEN", "");
        if bot_token.is_empty() {
            bail!("TG_BOT_TOKEN must be set (get a token from @BotFather)");
        }

        let target_chat = var_or("TARGET_CHAT", "");
        if target_chat.is_empty() {
            bail!("TARGET_CHAT must be set");
        }

        // The targets file wins over the inline list when it yields entries.
        let targets_file = var_or("TARGETS_FILE", "targets.txt");
        let file_sources = load_targets_file(Path::new(&targets_file))?;
        let sources = if !file_sources.is_empty() {
            file_sources
        } else {
            parse_csv(&var_or("SOURCE_CHATS", ""))
        };
        if sources.is_empty() {
            bail!("no source chats configured; fill {targets_file} or SOURCE_CHATS");
        }

        Ok(Self {
            bot_token,
            api_base: var_or("TG_API_BASE", "https://api.telegram.org"),
            sources,
            target_chat,
            include_keywords: parse_csv(&var_or("INCLUDE_KEYWORDS", "")),
            exclude_keywords: parse_csv(&var_or("EXCLUDE_KEYWORDS", "")),
            min_score: parse_num("MIN_SCORE", 2)?,
            dry_run: parse_bool(&var_or("DRY_RUN", "false")),
            dedup_path: PathBuf::from(var_or("DEDUP_PATH", "state/seen_posts.txt")),
            dedup_max_items: parse_num("DEDUP_MAX_ITEMS", 5000)?,
            media_dedup: parse_bool(&var_or("MEDIA_DEDUP", "true")),
            backfill_limit: parse_num("BACKFILL_LIMIT", 0)?,
            backfill_window_secs: parse_num("BACKFILL_WINDOW_SECS", 86_400)?,
            rewrite_enabled: parse_bool(&var_or("REWRITE_ENABLED", "false")),
            openai_api_key: var_or("OPENAI_API_KEY", ""),
            openai_model: var_or("OPENAI_MODEL", "gpt-4o-mini"),
            scoring_config_path: std::env::var("SCORING_CONFIG_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_num<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {name}={raw}")),
        _ => Ok(default),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Comma-delimited list; empty entries dropped.
pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Line-delimited source list; `#` comments and blank lines ignored.
/// A missing file is an empty list, not an error.
pub fn load_targets_file(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading targets file {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}
