// src/rewrite.rs
//! Generative rewrite adapter. The trait is infallible on purpose: fail-open
//! is structural, so a broken or misconfigured rewrite service can never
//! abort an item — callers always get text back.

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait Rewriter: Send + Sync {
    /// Rewrite the text, or return it unchanged when anything goes wrong.
    async fn rewrite(&self, text: &str) -> String;
    /// Adapter name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Identity rewriter used when rewriting is turned off.
pub struct DisabledRewriter;

#[async_trait]
impl Rewriter for DisabledRewriter {
    async fn rewrite(&self, text: &str) -> String {
        text.to_string()
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

const SYSTEM_PROMPT: &str =
    "Ты редактор Telegram-канала с акцентом на короткий, чистый и продающий стиль.";

fn user_prompt(original_text: &str) -> String {
    format!(
        "Перепиши текст объявления для Telegram в едином стиле. \
         Сохрани факты, цену, условия, контакты и эмодзи по смыслу. \
         Не добавляй вымышленные данные. Верни только итоговый текст поста без пояснений.\n\n\
         Исходный текст:\n{original_text}"
    )
}

/// Chat Completions rewriter. Any transport or API failure, and any empty
/// response, falls back to the original text with a warning.
pub struct OpenAiRewriter {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiRewriter {
    pub fn new(api_key: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }

    /// Endpoint override for tests and gateways.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn try_rewrite(&self, text: &str) -> Option<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        if self.api_key.is_empty() {
            return None;
        }

        let prompt = user_prompt(text);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.4,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "rewrite request rejected");
            return None;
        }

        let body: Resp = resp.json().await.ok()?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.trim())
            .unwrap_or("");
        if content.is_empty() {
            None
        } else {
            Some(content.to_string())
        }
    }
}

#[async_trait]
impl Rewriter for OpenAiRewriter {
    async fn rewrite(&self, text: &str) -> String {
        match self.try_rewrite(text).await {
            Some(rewritten) => {
                debug!(model = %self.model, "rewrite succeeded");
                rewritten
            }
            None => {
                warn!("rewrite failed or returned nothing, keeping original text");
                counter!("relay_rewrite_failures_total").increment(1);
                text.to_string()
            }
        }
    }
    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_rewriter_is_identity() {
        let r = DisabledRewriter;
        assert_eq!(r.rewrite("как есть").await, "как есть");
    }

    #[tokio::test]
    async fn missing_api_key_fails_open() {
        // no key → no network call, original text back
        let r = OpenAiRewriter::new(String::new(), "gpt-4o-mini".to_string());
        assert_eq!(r.rewrite("оригинал").await, "оригинал");
    }
}
