//! Local adapters for the `askweb-core` traits: page extraction over `reqwest`, browser
//! search through a Node.js + Playwright child process, and chat clients for
//! OpenAI-compatible servers and Ollama.

pub mod extract;
pub mod ollama;
pub mod openai_compat;
pub mod playwright;
pub mod shellout;

pub use extract::PageExtractor;
pub use ollama::OllamaClient;
pub use openai_compat::OpenAiCompatClient;
pub use playwright::{PlaywrightConfig, PlaywrightLauncher};

pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn env_truthy(key: &str) -> bool {
    matches!(
        env(key).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    env(key)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}
