//! Runtime configuration: `ASKWEB_*` environment variables, overridable by flags.

use askweb_core::{
    ChatModel, Error, ExemplarTranscript, ExtractionFailurePolicy, Orchestrator, PipelineConfig,
    RetrievalFailurePolicy, SessionSearch, UnrecognizedVerdictPolicy,
};
use askweb_local::{OllamaClient, OpenAiCompatClient, PageExtractor, PlaywrightConfig, PlaywrightLauncher};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Shape of a successful `/send_message` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSchema {
    /// `{"status":"success","messages":[{"sender":"User",..},{"sender":"System",..}]}`
    #[default]
    Messages,
    /// `{"status":"success","response":"..."}`
    Flat,
}

impl FromStr for ResponseSchema {
    type Err = Error;

    fn from_str(s: &str) -> askweb_core::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "messages" => Ok(Self::Messages),
            "flat" => Ok(Self::Flat),
            other => Err(Error::Config(format!("unknown response schema: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmBackend {
    /// OpenAI-compatible when `ASKWEB_OPENAI_COMPAT_BASE_URL` is set, otherwise Ollama.
    #[default]
    Auto,
    OpenAiCompat,
    Ollama,
}

impl LlmBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmBackend::Auto => "auto",
            LlmBackend::OpenAiCompat => "openai_compat",
            LlmBackend::Ollama => "ollama",
        }
    }

    /// Resolve `Auto` against the current environment.
    pub fn resolve(self) -> Self {
        match self {
            LlmBackend::Auto if askweb_local::openai_compat::is_configured_in_env() => {
                LlmBackend::OpenAiCompat
            }
            LlmBackend::Auto => LlmBackend::Ollama,
            other => other,
        }
    }
}

impl FromStr for LlmBackend {
    type Err = Error;

    fn from_str(s: &str) -> askweb_core::Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "auto" => Ok(Self::Auto),
            "openai_compat" | "openai" => Ok(Self::OpenAiCompat),
            "ollama" => Ok(Self::Ollama),
            other => Err(Error::Config(format!("unknown llm backend: {other}"))),
        }
    }
}

/// Pipeline and backend flags shared by `serve`, `ask` and `doctor`.
#[derive(clap::Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Completion budget for the live-data classifier.
    #[arg(long, env = "ASKWEB_CLASSIFIER_MAX_TOKENS", default_value_t = 5)]
    pub classifier_max_tokens: u32,
    /// Completion budget for the answer.
    #[arg(long, env = "ASKWEB_ANSWER_MAX_TOKENS", default_value_t = 120)]
    pub answer_max_tokens: u32,
    /// Bound for each browser wait (results page, first result).
    #[arg(long, env = "ASKWEB_SEARCH_WAIT_MS", default_value_t = 5_000)]
    pub search_wait_ms: u64,
    /// Requests allowed to use the model at once; the rest queue in order.
    #[arg(long, env = "ASKWEB_MAX_CONCURRENT_REQUESTS", default_value_t = 1)]
    pub max_concurrent_requests: usize,
    /// Allowed: general_knowledge, retrieve
    #[arg(long, env = "ASKWEB_UNRECOGNIZED_VERDICT", default_value = "general_knowledge")]
    pub unrecognized_verdict: UnrecognizedVerdictPolicy,
    /// Allowed: degrade, fail
    #[arg(long, env = "ASKWEB_RETRIEVAL_FAILURE", default_value = "degrade")]
    pub retrieval_failure: RetrievalFailurePolicy,
    /// Allowed: forward, drop
    #[arg(long, env = "ASKWEB_EXTRACTION_FAILURE", default_value = "forward")]
    pub extraction_failure: ExtractionFailurePolicy,
    /// Trim whitespace around the classifier output before matching it.
    #[arg(long, env = "ASKWEB_CLASSIFIER_TRIM_OUTPUT", default_value_t = false, action = clap::ArgAction::Set)]
    pub trim_classifier_output: bool,
    /// JSON file with `{"system": "...", "exemplars": [{"query": "...", "label": "TRUE"}]}`.
    #[arg(long, env = "ASKWEB_EXEMPLARS_FILE")]
    pub exemplars_file: Option<PathBuf>,
    /// Allowed: auto, openai_compat, ollama
    #[arg(long, env = "ASKWEB_LLM_BACKEND", default_value = "auto")]
    pub llm_backend: LlmBackend,
    /// Model name override for the selected backend.
    #[arg(long)]
    pub model: Option<String>,
    /// Transport timeout for each model request.
    #[arg(long, env = "ASKWEB_LLM_TIMEOUT_MS", default_value_t = 120_000)]
    pub llm_timeout_ms: u64,
}

impl PipelineArgs {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            classifier_max_tokens: self.classifier_max_tokens,
            answer_max_tokens: self.answer_max_tokens,
            search_wait_ms: self.search_wait_ms,
            max_concurrent_requests: self.max_concurrent_requests,
            unrecognized_verdict: self.unrecognized_verdict,
            retrieval_failure: self.retrieval_failure,
            extraction_failure: self.extraction_failure,
            trim_classifier_output: self.trim_classifier_output,
        }
    }

    pub fn transcript(&self) -> askweb_core::Result<ExemplarTranscript> {
        match &self.exemplars_file {
            Some(p) => ExemplarTranscript::from_json_file(p),
            None => Ok(ExemplarTranscript::default()),
        }
    }

    pub fn build_model(&self) -> askweb_core::Result<Arc<dyn ChatModel>> {
        let client = reqwest::Client::new();
        let backend = self.llm_backend.resolve();
        tracing::debug!(backend = backend.as_str(), "selected llm backend");
        Ok(match backend {
            LlmBackend::OpenAiCompat => Arc::new(OpenAiCompatClient::from_env(
                client,
                self.model.clone(),
                self.llm_timeout_ms,
            )?),
            LlmBackend::Ollama | LlmBackend::Auto => Arc::new(OllamaClient::from_env(
                client,
                self.model.clone(),
                self.llm_timeout_ms,
            )),
        })
    }

    /// Wire the local adapters into an [`Orchestrator`].
    pub fn build_orchestrator(&self) -> askweb_core::Result<Orchestrator> {
        let cfg = self.pipeline_config();
        let transcript = self.transcript()?;
        let model = self.build_model()?;
        let launcher = Arc::new(PlaywrightLauncher::new(PlaywrightConfig::from_env()));
        let search = Arc::new(SessionSearch::new(launcher, cfg.search_wait()));
        let extractor = Arc::new(PageExtractor::from_env()?);
        Orchestrator::new(model, search, extractor, transcript, cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        pipeline: PipelineArgs,
    }

    #[test]
    fn flags_map_onto_pipeline_config() {
        let h = Harness::try_parse_from([
            "askweb",
            "--answer-max-tokens",
            "64",
            "--retrieval-failure",
            "fail",
            "--extraction-failure",
            "DROP",
            "--unrecognized-verdict",
            "retrieve",
            "--trim-classifier-output",
            "true",
        ])
        .unwrap();
        let cfg = h.pipeline.pipeline_config();
        assert_eq!(cfg.answer_max_tokens, 64);
        assert_eq!(cfg.retrieval_failure, RetrievalFailurePolicy::Fail);
        assert_eq!(cfg.extraction_failure, ExtractionFailurePolicy::Drop);
        assert_eq!(cfg.unrecognized_verdict, UnrecognizedVerdictPolicy::Retrieve);
        assert!(cfg.trim_classifier_output);
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        assert!(Harness::try_parse_from(["askweb", "--retrieval-failure", "retry"]).is_err());
    }

    #[test]
    fn schema_and_backend_parse() {
        assert_eq!("FLAT".parse::<ResponseSchema>().unwrap(), ResponseSchema::Flat);
        assert!("xml".parse::<ResponseSchema>().is_err());
        assert_eq!(
            "openai-compat".parse::<LlmBackend>().unwrap(),
            LlmBackend::OpenAiCompat
        );
        assert_eq!(LlmBackend::Ollama.resolve(), LlmBackend::Ollama);
    }
}
