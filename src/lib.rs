// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod config;
pub mod dedup;
pub mod filter;
pub mod fingerprint;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod rewrite;
pub mod telegram;
pub mod transport;

// ---- Re-exports for stable public API ----
pub use crate::config::Settings;
pub use crate::dedup::{DedupStore, ReserveOutcome, SharedDedupStore};
pub use crate::filter::{MatchResult, OfferFilter, ScoreTable};
pub use crate::pipeline::PipelineDriver;
pub use crate::processor::{MessageProcessor, ProcessOutcome, ProcessorOptions};
pub use crate::rewrite::{DisabledRewriter, OpenAiRewriter, Rewriter};
pub use crate::telegram::BotApiTransport;
pub use crate::transport::{CandidateItem, MediaKind, MediaRef, SourceEntity, Transport};
