//! Backend-agnostic types, traits and the answer pipeline for `askweb`.
//!
//! This crate contains no IO. Concrete search, fetch and model adapters live in
//! `askweb-local`; the binary wires them into an [`Orchestrator`].

pub mod classify;
pub mod config;
pub mod extract;
pub mod model;
pub mod pipeline;
pub mod search;
pub mod synthesize;

pub use classify::{Exemplar, ExemplarTranscript, QueryClassifier, RawVerdict, Verdict};
pub use config::{
    ExtractionFailurePolicy, PipelineConfig, RetrievalFailurePolicy, UnrecognizedVerdictPolicy,
};
pub use extract::{ContentExtractor, ExtractedDocument, Extraction};
pub use model::{ChatModel, Role, Turn};
pub use pipeline::{Answer, Orchestrator, Stage};
pub use search::{BrowserLauncher, BrowserSession, SessionSearch, WebSearch};
pub use synthesize::{AnswerSynthesizer, PromptShape};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no message provided")]
    MissingInput,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("search timed out waiting for {what} after {waited_ms}ms")]
    SearchTimeout { what: String, waited_ms: u64 },
    #[error("browser session failed: {0}")]
    Browser(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
