use crate::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged message of a conversation sent to a [`ChatModel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A generative model service shared by every request in the process.
///
/// Implementations are created once at startup and handed to the pipeline behind an `Arc`.
/// The lifecycle hooks default to no-ops; adapters override the ones their backend supports.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one completion over `conversation` and return the content of the produced turn.
    async fn generate(&self, conversation: &[Turn], max_new_tokens: u32) -> Result<String>;

    /// Load or check the model before the first request.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Free accelerator memory held between requests, if the backend exposes a way to do so.
    async fn reclaim_memory(&self) -> Result<()> {
        Ok(())
    }

    /// Release the model at process shutdown.
    async fn shut_down(&self) -> Result<()> {
        Ok(())
    }
}
