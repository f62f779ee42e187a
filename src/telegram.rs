// src/telegram.rs
//! Telegram Bot API implementation of the [`Transport`] capability.
//!
//! Hand-rolled JSON client over reqwest: `getMe` for session checks,
//! `getChat` for resolution, `getUpdates` long-polling for the live feed,
//! `getFile` + file download for media bytes, and `sendMessage` /
//! `sendPhoto` / `sendDocument` for publication.
//!
//! History backfill has no dedicated Bot API call, so the pending update
//! backlog (Telegram retains up to 24 h of undelivered updates) is drained
//! once and served per chat from that snapshot. The drained offset is shared
//! with the live poll, which therefore resumes exactly after the backlog.

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::transport::{CandidateItem, MediaKind, MediaRef, SourceEntity, Transport};

const LONG_POLL_SECS: u64 = 50;
const SEND_RETRIES: u8 = 3;

#[derive(Clone)]
pub struct BotApiTransport {
    http: reqwest::Client,
    /// `<api_base>/bot<token>`
    base: String,
    /// `<api_base>/file/bot<token>`
    file_base: String,
    poll: Arc<Mutex<PollState>>,
}

/// Shared between the backlog drain and the live poll loop.
struct PollState {
    offset: i64,
    backlog: HashMap<i64, Vec<CandidateItem>>,
    backlog_drained: bool,
}

impl BotApiTransport {
    pub fn new(token: &str, api_base: &str) -> Result<Self> {
        if token.is_empty() {
            bail!("empty bot token");
        }
        let http = reqwest::Client::builder()
            .user_agent("offer-relay/0.1")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building http client")?;
        let api_base = api_base.trim_end_matches('/');
        Ok(Self {
            http,
            base: format!("{api_base}/bot{token}"),
            file_base: format!("{api_base}/file/bot{token}"),
            poll: Arc::new(Mutex::new(PollState {
                offset: 0,
                backlog: HashMap::new(),
                backlog_drained: false,
            })),
        })
    }

    async fn call<T, P>(&self, method: &str, payload: &P, timeout: Duration) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let resp = self
            .http
            .post(format!("{}/{method}", self.base))
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("telegram {method} request failed"))?;
        let status = resp.status();
        let body: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("telegram {method} returned a non-JSON body"))?;
        if !body.ok {
            bail!(
                "telegram {method} failed (http {status}): {}",
                body.description.unwrap_or_else(|| "no description".to_string())
            );
        }
        body.result
            .ok_or_else(|| anyhow!("telegram {method} returned ok without a result"))
    }

    /// One `getUpdates` batch; advances the shared offset and maps messages
    /// to candidate items.
    async fn poll_updates(&self, state: &mut PollState, timeout_secs: u64) -> Result<Vec<CandidateItem>> {
        let payload = serde_json::json!({
            "offset": state.offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "channel_post"],
        });
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                &payload,
                Duration::from_secs(timeout_secs + 10),
            )
            .await?;

        let mut items = Vec::with_capacity(updates.len());
        for update in updates {
            state.offset = state.offset.max(update.update_id + 1);
            if let Some(msg) = update.message.or(update.channel_post) {
                items.push(item_from_message(msg));
            }
        }
        Ok(items)
    }

    /// Drain the pending backlog once, grouping items per chat in delivery
    /// (chronological) order.
    async fn ensure_backlog_drained(&self, state: &mut PollState) -> Result<()> {
        if state.backlog_drained {
            return Ok(());
        }
        let mut total = 0usize;
        loop {
            let items = self.poll_updates(state, 0).await?;
            if items.is_empty() {
                break;
            }
            total += items.len();
            for item in items {
                state.backlog.entry(item.chat_id).or_default().push(item);
            }
        }
        state.backlog_drained = true;
        info!(items = total, chats = state.backlog.len(), "update backlog drained");
        Ok(())
    }

    async fn send_with_retry<F>(&self, what: &str, build: F) -> Result<()>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = build().timeout(Duration::from_secs(30)).send().await;
            let err = match res {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let body = resp.text().await.unwrap_or_default();
                    anyhow!("telegram {what} failed (http {status}): {body}")
                }
                Err(e) => anyhow!("telegram {what} request failed: {e}"),
            };
            if attempt >= SEND_RETRIES {
                return Err(err);
            }
            warn!(error = %err, attempt, "send failed, retrying");
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

#[async_trait::async_trait]
impl Transport for BotApiTransport {
    async fn connect(&self) -> Result<()> {
        let me: User = self
            .call("getMe", &serde_json::json!({}), Duration::from_secs(15))
            .await?;
        info!(
            bot = %me.username.as_deref().unwrap_or("?"),
            id = me.id,
            "connected to Bot API"
        );
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool> {
        let resp = self
            .http
            .post(format!("{}/getMe", self.base))
            .timeout(Duration::from_secs(15))
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("telegram getMe request failed")?;
        if matches!(resp.status().as_u16(), 401 | 403 | 404) {
            return Ok(false);
        }
        let body: ApiResponse<User> = resp.json().await.context("telegram getMe body")?;
        Ok(body.ok)
    }

    async fn resolve(&self, source: &str) -> Result<Option<SourceEntity>> {
        let payload = serde_json::json!({ "chat_id": chat_id_value(source) });
        let resp = self
            .http
            .post(format!("{}/getChat", self.base))
            .timeout(Duration::from_secs(15))
            .json(&payload)
            .send()
            .await
            .context("telegram getChat request failed")?;
        let body: ApiResponse<Chat> = resp.json().await.context("telegram getChat body")?;

        if body.ok {
            return Ok(body.result.map(entity_from_chat));
        }
        let description = body.description.unwrap_or_default();
        if description.to_lowercase().contains("not found") {
            return Ok(None);
        }
        bail!("telegram getChat({source}) failed: {description}")
    }

    async fn subscribe(&self, entities: &[SourceEntity]) -> Result<mpsc::Receiver<CandidateItem>> {
        let allowed: HashSet<i64> = entities.iter().map(|e| e.id).collect();
        let (tx, rx) = mpsc::channel(64);
        let this = self.clone();

        tokio::spawn(async move {
            loop {
                let batch = {
                    let mut state = this.poll.lock().await;
                    this.poll_updates(&mut state, LONG_POLL_SECS).await
                };
                match batch {
                    Ok(items) => {
                        for item in items {
                            if !allowed.contains(&item.chat_id) {
                                debug!(chat_id = item.chat_id, "update from unwatched chat, skipping");
                                continue;
                            }
                            if tx.send(item).await.is_err() {
                                return; // receiver gone, pipeline is shutting down
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = ?e, "getUpdates poll failed, backing off");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn fetch_history(&self, entity: &SourceEntity, limit: usize) -> Result<Vec<CandidateItem>> {
        let mut state = self.poll.lock().await;
        self.ensure_backlog_drained(&mut state).await?;

        // backlog is chronological; newest-first per the contract
        let mut items = state.backlog.remove(&entity.id).unwrap_or_default();
        items.reverse();
        items.truncate(limit);
        Ok(items)
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Option<Vec<u8>>> {
        let file: TgFile = self
            .call(
                "getFile",
                &serde_json::json!({ "file_id": media.file_id }),
                Duration::from_secs(30),
            )
            .await?;
        let Some(path) = file.file_path else {
            return Ok(None);
        };

        let resp = self
            .http
            .get(format!("{}/{path}", self.file_base))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .context("telegram file download failed")?;
        if !resp.status().is_success() {
            bail!("telegram file download failed (http {})", resp.status());
        }
        let bytes = resp.bytes().await.context("reading media body")?;
        Ok(Some(bytes.to_vec()))
    }

    async fn send_text(&self, destination: &str, text: &str) -> Result<()> {
        let payload = serde_json::json!({
            "chat_id": chat_id_value(destination),
            "text": text,
        });
        self.send_with_retry("sendMessage", || {
            self.http
                .post(format!("{}/sendMessage", self.base))
                .json(&payload)
        })
        .await
    }

    async fn send_file(
        &self,
        destination: &str,
        kind: MediaKind,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<()> {
        let (method, field, file_name) = match kind {
            MediaKind::Photo => ("sendPhoto", "photo", "photo.jpg"),
            MediaKind::Document => ("sendDocument", "document", "file.bin"),
        };
        let chat_id = match chat_id_value(destination) {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => s,
            _ => destination.to_string(),
        };
        let caption = caption.to_string();

        self.send_with_retry(method, || {
            let part = reqwest::multipart::Part::bytes(bytes.clone()).file_name(file_name);
            let form = reqwest::multipart::Form::new()
                .text("chat_id", chat_id.clone())
                .text("caption", caption.clone())
                .part(field, part);
            self.http
                .post(format!("{}/{method}", self.base))
                .multipart(form)
        })
        .await
    }
}

/// Numeric ids go out as JSON numbers; usernames get a leading `@`.
fn chat_id_value(identifier: &str) -> serde_json::Value {
    let trimmed = identifier.trim();
    if let Ok(id) = trimmed.parse::<i64>() {
        return serde_json::Value::from(id);
    }
    if trimmed.starts_with('@') {
        serde_json::Value::from(trimmed)
    } else {
        serde_json::Value::from(format!("@{trimmed}"))
    }
}

fn entity_from_chat(chat: Chat) -> SourceEntity {
    let title = chat
        .title
        .or_else(|| chat.username.map(|u| format!("@{u}")))
        .unwrap_or_else(|| chat.id.to_string());
    SourceEntity { id: chat.id, title }
}

fn item_from_message(msg: Message) -> CandidateItem {
    let media = if let Some(sizes) = msg.photo {
        // Telegram lists photo sizes ascending; take the largest.
        sizes
            .into_iter()
            .max_by_key(|s| s.file_size.unwrap_or(0))
            .map(|s| MediaRef {
                file_id: s.file_id,
                kind: MediaKind::Photo,
            })
    } else {
        msg.document.map(|d| MediaRef {
            file_id: d.file_id,
            kind: MediaKind::Document,
        })
    };

    CandidateItem {
        id: msg.message_id,
        chat_id: msg.chat.id,
        text: msg.text.or(msg.caption).unwrap_or_default(),
        timestamp: msg.date,
        media,
    }
}

// --- Bot API DTOs (only the fields the relay reads) ---

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct Chat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    channel_post: Option<Message>,
}

#[derive(Deserialize)]
struct Message {
    message_id: i64,
    date: i64,
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    document: Option<Document>,
}

#[derive(Deserialize)]
struct PhotoSize {
    file_id: String,
    #[serde(default)]
    file_size: Option<i64>,
}

#[derive(Deserialize)]
struct Document {
    file_id: String,
}

#[derive(Deserialize)]
struct TgFile {
    #[serde(default)]
    file_path: Option<String>,
}
