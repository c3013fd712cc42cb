use askweb_core::{ChatModel, Error, Result, Turn};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5:3b-instruct";

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout_ms: u64,
}

impl OllamaClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            timeout_ms,
        }
    }

    pub fn from_env(
        client: reqwest::Client,
        model_override: Option<String>,
        timeout_ms: u64,
    ) -> Self {
        let base_url =
            crate::env("ASKWEB_OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        // Users should override this based on what they have pulled.
        let model = model_override
            .or_else(|| crate::env("ASKWEB_OLLAMA_MODEL"))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self::new(client, base_url, model, timeout_ms)
    }

    fn endpoint_chat(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post_chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let resp = self
            .client
            .post(self.endpoint_chat())
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("ollama HTTP {status}")));
        }
        resp.json().await.map_err(|e| Error::Llm(e.to_string()))
    }

    pub async fn chat(&self, conversation: &[Turn], num_predict: Option<u32>) -> Result<String> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: conversation
                .iter()
                .map(|t| ChatMessage {
                    role: t.role.as_str().to_string(),
                    content: t.content.clone(),
                })
                .collect(),
            stream: false,
            options: num_predict.map(|n| ChatOptions { num_predict: n }),
            keep_alive: None,
        };
        let parsed = self.post_chat(&req).await?;
        Ok(parsed.message.map(|m| m.content).unwrap_or_default())
    }

    /// An empty chat request loads (or, with `keep_alive: 0`, unloads) the model without
    /// generating anything.
    async fn load(&self, keep_alive: Option<u64>) -> Result<()> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: Vec::new(),
            stream: false,
            options: None,
            keep_alive,
        };
        self.post_chat(&req).await.map(|_| ())
    }
}

/// `reclaim_memory` stays a no-op: the Ollama server owns the accelerator memory.
#[async_trait::async_trait]
impl ChatModel for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn generate(&self, conversation: &[Turn], max_new_tokens: u32) -> Result<String> {
        self.chat(conversation, Some(max_new_tokens)).await
    }

    async fn warm_up(&self) -> Result<()> {
        self.load(None).await?;
        tracing::info!(base_url = %self.base_url, model = %self.model, "ollama model loaded");
        Ok(())
    }

    async fn shut_down(&self) -> Result<()> {
        self.load(Some(0)).await?;
        tracing::info!(model = %self.model, "ollama model unloaded");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatOptions {
    num_predict: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
}
