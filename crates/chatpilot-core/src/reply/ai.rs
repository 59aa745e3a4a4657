//! AI reply generation
//!
//! Two backends answer messages no rule matched. The large model answers
//! over an OpenAI-compatible chat-completions API. The assistant relay hands
//! the prompt to the reserved assistant contact; its answer arrives later as
//! an inbound message and takes the forwarding path.

use crate::dispatch::Directive;
use crate::facade::ChatClient;
use crate::reply::engine::AiRequest;
use crate::reply::forward::{Asker, AssistantForwarder};
use crate::settings::AiBackend;
use async_trait::async_trait;
use chatpilot_common::config::AiConfig;
use chatpilot_common::{Error, Result};
use chatpilot_storage::models::OutgoingKind;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Replies at or above this length limit are never truncated
pub const UNLIMITED_TOKENS: usize = 500;

/// Produces an answer for an [`AiRequest`]
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// `Ok(None)` when the answer will arrive some other way
    async fn generate(&self, request: &AiRequest) -> Result<Option<String>>;
}

/// Prefix and truncation applied to generated replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFormat {
    pub prefix: Option<String>,
    pub token_limit: usize,
}

impl ResponseFormat {
    pub fn from_config(config: &AiConfig) -> Self {
        let prefix = Some(config.reply_prefix.trim().to_string())
            .filter(|p| config.prefix_enabled && !p.is_empty());
        Self {
            prefix,
            token_limit: config.token_limit,
        }
    }

    pub fn apply(&self, reply: &str) -> String {
        let reply = reply.trim();
        let mut out = match &self.prefix {
            Some(prefix) => format!("{} {}", prefix, reply),
            None => reply.to_string(),
        };

        if self.token_limit < UNLIMITED_TOKENS && out.chars().count() > self.token_limit {
            let keep = self.token_limit.saturating_sub(3);
            out = out.chars().take(keep).collect::<String>() + "...";
        }
        out
    }
}

impl Default for ResponseFormat {
    fn default() -> Self {
        Self {
            prefix: None,
            token_limit: UNLIMITED_TOKENS,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions backend
pub struct LargeModelClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl LargeModelClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.model_endpoint.clone(),
            model: config.model_name.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl ReplyGenerator for LargeModelClient {
    async fn generate(&self, request: &AiRequest) -> Result<Option<String>> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            stream: false,
        };

        debug!(endpoint = %self.endpoint, model = %self.model, "Requesting AI reply");

        let mut http = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| {
            warn!("AI request failed: {}", e);
            Error::Ai(format!("request failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Ai(format!("model returned status {}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Ai(format!("invalid model response: {}", e)))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()))
    }
}

/// Relays prompts to the reserved assistant contact
pub struct AssistantRelay {
    client: Arc<dyn ChatClient>,
    forwarder: Arc<AssistantForwarder>,
}

impl AssistantRelay {
    pub fn new(client: Arc<dyn ChatClient>, forwarder: Arc<AssistantForwarder>) -> Self {
        Self { client, forwarder }
    }
}

#[async_trait]
impl ReplyGenerator for AssistantRelay {
    async fn generate(&self, request: &AiRequest) -> Result<Option<String>> {
        let asker = if request.is_group() {
            Asker {
                pid: request.pid,
                sender: request
                    .member_id
                    .clone()
                    .unwrap_or_else(|| request.receiver.clone()),
                group_id: Some(request.receiver.clone()),
            }
        } else {
            Asker {
                pid: request.pid,
                sender: request.receiver.clone(),
                group_id: None,
            }
        };
        self.forwarder.remember(asker);

        let assistant = self.forwarder.assistant_id();
        if !self
            .client
            .send_text(request.pid, assistant, &request.prompt)
            .await?
        {
            return Err(Error::Ai("assistant relay refused the prompt".to_string()));
        }
        info!(pid = request.pid, "Prompt relayed to assistant");
        Ok(None)
    }
}

/// Picks the backend named by the request and shapes the answer into a directive
pub struct AiResponder {
    model: Arc<dyn ReplyGenerator>,
    assistant: Arc<dyn ReplyGenerator>,
    format: ResponseFormat,
}

impl AiResponder {
    pub fn new(
        model: Arc<dyn ReplyGenerator>,
        assistant: Arc<dyn ReplyGenerator>,
        format: ResponseFormat,
    ) -> Self {
        Self {
            model,
            assistant,
            format,
        }
    }

    /// Run one generation; `Ok(None)` when there is nothing to send now
    pub async fn respond(&self, request: &AiRequest) -> Result<Option<Directive>> {
        let generator = match request.backend {
            AiBackend::LargeModel => &self.model,
            AiBackend::Assistant => &self.assistant,
        };

        let Some(reply) = generator.generate(request).await? else {
            return Ok(None);
        };
        if reply.trim().is_empty() {
            return Ok(None);
        }

        let delay = request.interval.sample_secs(&mut rand::thread_rng());
        Ok(Some(
            Directive::new(&request.receiver, self.format.apply(&reply), OutgoingKind::AiReply)
                .with_pid(request.pid)
                .with_delay(delay),
        ))
    }
}
