use askweb_core::{ChatModel, Error, Result, Turn};
use serde::{Deserialize, Serialize};

fn openai_compat_base_url_from_env() -> Option<String> {
    crate::env("ASKWEB_OPENAI_COMPAT_BASE_URL")
}

fn openai_compat_api_key_from_env() -> Option<String> {
    crate::env("ASKWEB_OPENAI_COMPAT_API_KEY")
}

fn openai_compat_model_from_env() -> Option<String> {
    crate::env("ASKWEB_OPENAI_COMPAT_MODEL")
}

pub fn is_configured_in_env() -> bool {
    openai_compat_base_url_from_env().is_some()
}

/// Chat client for any server that speaks `/v1/chat/completions` (vLLM, llama.cpp server,
/// text-generation-inference, hosted APIs).
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_ms: u64,
    temperature: Option<f64>,
}

impl OpenAiCompatClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            timeout_ms,
            temperature: None,
        }
    }

    pub fn from_env(
        client: reqwest::Client,
        model_override: Option<String>,
        timeout_ms: u64,
    ) -> Result<Self> {
        let base_url = openai_compat_base_url_from_env().ok_or_else(|| {
            Error::NotConfigured("missing ASKWEB_OPENAI_COMPAT_BASE_URL".to_string())
        })?;
        let api_key = openai_compat_api_key_from_env();

        let model = model_override
            .or_else(openai_compat_model_from_env)
            .ok_or_else(|| {
                Error::NotConfigured(
                    "missing model for openai_compat (set --model or ASKWEB_OPENAI_COMPAT_MODEL)"
                        .to_string(),
                )
            })?;

        let mut out = Self::new(client, base_url, api_key, model, timeout_ms);
        out.temperature = crate::env("ASKWEB_LLM_TEMPERATURE").and_then(|s| s.parse().ok());
        Ok(out)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(k) => rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}")),
            None => rb,
        }
    }

    pub async fn chat(&self, conversation: &[Turn], max_tokens: Option<u64>) -> Result<String> {
        let req = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: conversation
                .iter()
                .map(|t| Message {
                    role: t.role.as_str().to_string(),
                    content: t.content.clone(),
                })
                .collect(),
            max_tokens,
            temperature: self.temperature,
            stream: Some(false),
        };

        let rb = self
            .client
            .post(self.endpoint("chat/completions"))
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        let resp = self
            .authorize(rb)
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "openai_compat chat.completions HTTP {status}"
            )));
        }

        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        Ok(parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}

/// `reclaim_memory` stays a no-op: the remote server owns the accelerator memory.
#[async_trait::async_trait]
impl ChatModel for OpenAiCompatClient {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    async fn generate(&self, conversation: &[Turn], max_new_tokens: u32) -> Result<String> {
        self.chat(conversation, Some(u64::from(max_new_tokens))).await
    }

    /// Fails early when the server is unreachable or rejects the key.
    async fn warm_up(&self) -> Result<()> {
        let rb = self
            .client
            .get(self.endpoint("models"))
            .timeout(std::time::Duration::from_millis(self.timeout_ms));
        let resp = self
            .authorize(rb)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("openai_compat models HTTP {status}")));
        }
        tracing::info!(base_url = %self.base_url, model = %self.model, "openai_compat backend reachable");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}
