use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// What to do when the classifier output is neither `TRUE` nor `FALSE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecognizedVerdictPolicy {
    /// Answer from general knowledge; ambiguous output never triggers retrieval.
    #[default]
    GeneralKnowledge,
    Retrieve,
}

/// What to do when the search step fails (timeout, driver failure, missing link).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalFailurePolicy {
    /// Log a warning and answer with the open-domain prompt.
    #[default]
    Degrade,
    /// Fail the whole request.
    Fail,
}

/// What to do with an extraction failure at the synthesizer boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailurePolicy {
    /// Pass the degraded error string as if it were page content.
    #[default]
    Forward,
    /// Treat the failure as "no context".
    Drop,
}

macro_rules! parse_policy {
    ($ty:ty, $what:literal, { $($s:literal => $v:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
                    $($s => Ok($v),)+
                    other => Err(Error::Config(format!(
                        concat!("unknown ", $what, " policy: {}"),
                        other
                    ))),
                }
            }
        }
    };
}

parse_policy!(UnrecognizedVerdictPolicy, "unrecognized_verdict", {
    "general_knowledge" => UnrecognizedVerdictPolicy::GeneralKnowledge,
    "retrieve" => UnrecognizedVerdictPolicy::Retrieve,
});

parse_policy!(RetrievalFailurePolicy, "retrieval_failure", {
    "degrade" => RetrievalFailurePolicy::Degrade,
    "fail" => RetrievalFailurePolicy::Fail,
});

parse_policy!(ExtractionFailurePolicy, "extraction_failure", {
    "forward" => ExtractionFailurePolicy::Forward,
    "drop" => ExtractionFailurePolicy::Drop,
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Completion budget for the classifier; one word is enough.
    pub classifier_max_tokens: u32,
    /// Completion budget for the final answer.
    pub answer_max_tokens: u32,
    /// Bound for each of the two waits inside the search step.
    pub search_wait_ms: u64,
    /// Requests allowed to use the model at the same time; the rest queue.
    pub max_concurrent_requests: usize,
    pub unrecognized_verdict: UnrecognizedVerdictPolicy,
    pub retrieval_failure: RetrievalFailurePolicy,
    pub extraction_failure: ExtractionFailurePolicy,
    /// Trim whitespace around the classifier output before matching `TRUE`/`FALSE`.
    #[serde(default)]
    pub trim_classifier_output: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier_max_tokens: 5,
            answer_max_tokens: 120,
            search_wait_ms: 5_000,
            max_concurrent_requests: 1,
            unrecognized_verdict: UnrecognizedVerdictPolicy::default(),
            retrieval_failure: RetrievalFailurePolicy::default(),
            extraction_failure: ExtractionFailurePolicy::default(),
            trim_classifier_output: false,
        }
    }
}

impl PipelineConfig {
    pub fn search_wait(&self) -> Duration {
        Duration::from_millis(self.search_wait_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.classifier_max_tokens == 0 {
            return Err(Error::Config(
                "classifier_max_tokens must be greater than 0".to_string(),
            ));
        }
        if self.answer_max_tokens == 0 {
            return Err(Error::Config(
                "answer_max_tokens must be greater than 0".to_string(),
            ));
        }
        if self.search_wait_ms == 0 {
            return Err(Error::Config(
                "search_wait_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(Error::Config(
                "max_concurrent_requests must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
