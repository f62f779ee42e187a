// src/transport.rs
use anyhow::Result;
use tokio::sync::mpsc;

/// Resolved identity of a source feed. Cached for the process lifetime once
/// resolved; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntity {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Document,
}

/// Opaque handle to a media attachment. Bytes are materialized lazily via
/// [`Transport::download_media`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub file_id: String,
    pub kind: MediaKind,
}

/// One inbound unit of content, immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    /// Message id, scoped to the source chat.
    pub id: i64,
    pub chat_id: i64,
    pub text: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub media: Option<MediaRef>,
}

impl CandidateItem {
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }
}

/// Session boundary to the chat platform. The pipeline only ever talks to
/// this trait; `telegram::BotApiTransport` is the production implementation
/// and tests substitute their own.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn is_authorized(&self) -> Result<bool>;

    /// Resolve a configured identifier (`@name` or numeric id) to an entity.
    /// `Ok(None)` means the platform does not know the identifier.
    async fn resolve(&self, source: &str) -> Result<Option<SourceEntity>>;

    /// Live events for the given entities, delivered through a single queue
    /// in source-delivery order per entity.
    async fn subscribe(&self, entities: &[SourceEntity])
        -> Result<mpsc::Receiver<CandidateItem>>;

    /// Recent items for one entity, newest first, at most `limit`.
    async fn fetch_history(
        &self,
        entity: &SourceEntity,
        limit: usize,
    ) -> Result<Vec<CandidateItem>>;

    /// Raw bytes of a media attachment. `Ok(None)` when the platform has
    /// nothing downloadable behind the handle.
    async fn download_media(&self, media: &MediaRef) -> Result<Option<Vec<u8>>>;

    async fn send_text(&self, destination: &str, text: &str) -> Result<()>;

    async fn send_file(
        &self,
        destination: &str,
        kind: MediaKind,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<()>;
}
