// src/filter.rs
//! Relevance scoring for inbound offers: keyword gates plus numeric
//! price/discount heuristics. Pure and deterministic — no I/O — so every rule
//! is unit-testable without a live feed.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Result of scoring one text. `reasons` preserve evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub is_interesting: bool,
    pub score: i32,
    pub reasons: Vec<String>,
}

impl MatchResult {
    fn rejected(reason: &str) -> Self {
        Self {
            is_interesting: false,
            score: 0,
            reasons: vec![reason.to_string()],
        }
    }
}

/// One scoring band: values `<= max` earn `score` and are tagged `tag`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScoreBand {
    pub max: u32,
    pub score: i32,
    pub tag: String,
}

/// Price-tier and discount-band constants. The defaults are the pinned
/// product table; a TOML file can replace it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScoreTable {
    pub price_tiers: Vec<ScoreBand>,
    pub discount_bands: Vec<ScoreBand>,
}

impl Default for ScoreTable {
    fn default() -> Self {
        let band = |max: u32, score: i32, tag: &str| ScoreBand {
            max,
            score,
            tag: tag.to_string(),
        };
        Self {
            price_tiers: vec![
                band(500, 1, "low_price"),
                band(1500, 2, "mid_price"),
                band(5000, 3, "high_price"),
            ],
            discount_bands: vec![
                band(30, 1, "discount"),
                band(60, 2, "big_discount"),
                band(99, 3, "huge_discount"),
            ],
        }
    }
}

impl ScoreTable {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing scoring table TOML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading scoring table from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// The tightest band covering `value`, if any. Values above every band
    /// score nothing.
    fn band_for(bands: &[ScoreBand], value: u32) -> Option<&ScoreBand> {
        bands
            .iter()
            .filter(|b| value <= b.max)
            .min_by_key(|b| b.max)
    }
}

fn price_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:^|\D)(\d{2,7})\s?(?:₽|руб|р|rub)(?:\D|$)").unwrap())
}

fn discount_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:-|скидк\w*\s*)(\d{1,2})\s?%").unwrap())
}

/// Keyword + price/discount scoring gate.
///
/// Scoring rules, in order:
/// 1. empty text → not interesting, reason `empty_text`;
/// 2. any exclude keyword (case-insensitive containment) → not interesting,
///    reason `exclude_keyword`, nothing else evaluated;
/// 3. include keywords: flat +1 when at least one matches, reason lists the
///    distinct matched keywords sorted and comma-joined;
/// 4. the minimum extracted price selects a tier from the table;
/// 5. the first discount match selects a band from the table.
///
/// `is_interesting = score >= min_score`, and nothing else sets it.
#[derive(Debug, Clone)]
pub struct OfferFilter {
    include_keywords: Vec<String>,
    exclude_keywords: Vec<String>,
    min_score: i32,
    table: ScoreTable,
}

impl OfferFilter {
    pub fn new(
        include_keywords: Vec<String>,
        exclude_keywords: Vec<String>,
        min_score: i32,
        table: ScoreTable,
    ) -> Self {
        let clean = |kw: Vec<String>| -> Vec<String> {
            kw.iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        };
        Self {
            include_keywords: clean(include_keywords),
            exclude_keywords: clean(exclude_keywords),
            min_score,
            table,
        }
    }

    pub fn evaluate(&self, text: &str) -> MatchResult {
        if text.trim().is_empty() {
            return MatchResult::rejected("empty_text");
        }

        let normalized = text.to_lowercase();

        if self
            .exclude_keywords
            .iter()
            .any(|k| normalized.contains(k.as_str()))
        {
            return MatchResult::rejected("exclude_keyword");
        }

        let mut score = 0;
        let mut reasons = Vec::new();

        let mut matched: Vec<&str> = self
            .include_keywords
            .iter()
            .filter(|k| normalized.contains(k.as_str()))
            .map(|k| k.as_str())
            .collect();
        if !matched.is_empty() {
            matched.sort_unstable();
            matched.dedup();
            score += 1;
            reasons.push(format!("include_keywords:{}", matched.join(",")));
        }

        if let Some(min_price) = self.extract_min_price(text) {
            if let Some(tier) = ScoreTable::band_for(&self.table.price_tiers, min_price) {
                score += tier.score;
                reasons.push(format!("{}:{}", tier.tag, min_price));
            }
        }

        if let Some(discount) = self.extract_discount(text) {
            if let Some(band) = ScoreTable::band_for(&self.table.discount_bands, discount) {
                score += band.score;
                reasons.push(format!("{}:{}", band.tag, discount));
            }
        }

        MatchResult {
            is_interesting: score >= self.min_score,
            score,
            reasons,
        }
    }

    /// Minimum amount followed by a currency marker, 2–7 digits.
    fn extract_min_price(&self, text: &str) -> Option<u32> {
        price_regex()
            .captures_iter(text)
            .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
            .min()
    }

    /// First percentage preceded by a dash or a discount word stem.
    fn extract_discount(&self, text: &str) -> Option<u32> {
        discount_regex()
            .captures(text)
            .and_then(|c| c.get(1)?.as_str().parse::<u32>().ok())
    }
}
