//! Per-request answer pipeline.
//!
//! `Received -> Classifying -> [Retrieving -> Extracting] -> Synthesizing -> Completed`.
//! The bracketed stages only run for queries that need live data. There are no retries and no
//! backward transitions; any error that escapes ends the request.

use crate::classify::{ExemplarTranscript, QueryClassifier, Verdict};
use crate::config::{ExtractionFailurePolicy, PipelineConfig, RetrievalFailurePolicy};
use crate::extract::{ContentExtractor, Extraction};
use crate::model::ChatModel;
use crate::search::WebSearch;
use crate::synthesize::{AnswerSynthesizer, PromptShape};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Classifying,
    Retrieving,
    Extracting,
    Synthesizing,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// The user's message, echoed back.
    pub message: String,
    pub answer: String,
    pub verdict: Verdict,
    pub prompt: PromptShape,
    /// URL of the page used as context, when one was found.
    pub source_url: Option<String>,
    pub extraction_failed: bool,
    /// Set when retrieval failed and the request was answered without context.
    pub retrieval_error: Option<String>,
    pub stages: Vec<Stage>,
}

pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    search: Arc<dyn WebSearch>,
    extractor: Arc<dyn ContentExtractor>,
    classifier: QueryClassifier,
    synthesizer: AnswerSynthesizer,
    config: PipelineConfig,
    permits: Semaphore,
}

struct Retrieved {
    context: String,
    source_url: Option<String>,
    extraction_failed: bool,
    retrieval_error: Option<String>,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        search: Arc<dyn WebSearch>,
        extractor: Arc<dyn ContentExtractor>,
        transcript: ExemplarTranscript,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        transcript.validate()?;
        Ok(Self {
            classifier: QueryClassifier::new(
                transcript,
                config.classifier_max_tokens,
                config.unrecognized_verdict,
            )
            .trim_output(config.trim_classifier_output),
            synthesizer: AnswerSynthesizer::new(config.answer_max_tokens),
            permits: Semaphore::new(config.max_concurrent_requests),
            model,
            search,
            extractor,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    pub async fn answer(&self, message: &str) -> Result<Answer> {
        if message.trim().is_empty() {
            return Err(Error::MissingInput);
        }
        let mut stages = vec![Stage::Received];

        // Requests beyond the configured concurrency wait here, in arrival order.
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::NotSupported("request queue is closed".to_string()))?;

        stages.push(Stage::Classifying);
        tracing::info!(stage = ?Stage::Classifying, "analyzing query for web search");
        let verdict = self.classifier.classify(self.model.as_ref(), message).await?;
        tracing::info!(verdict = ?verdict, "query classified");

        let retrieved = match verdict {
            Verdict::GeneralKnowledge => Retrieved {
                context: String::new(),
                source_url: None,
                extraction_failed: false,
                retrieval_error: None,
            },
            Verdict::NeedsRetrieval => self.retrieve(message, &mut stages).await?,
        };

        stages.push(Stage::Synthesizing);
        tracing::info!(stage = ?Stage::Synthesizing, "invoking model for the answer");
        let prompt = AnswerSynthesizer::shape_for(&retrieved.context);
        let answer = self
            .synthesizer
            .synthesize(self.model.as_ref(), message, &retrieved.context)
            .await;

        if let Err(e) = self.model.reclaim_memory().await {
            tracing::warn!(error = %e, "model memory reclamation failed");
        }
        let answer = answer?;

        stages.push(Stage::Completed);
        tracing::info!(stage = ?Stage::Completed, answer_chars = answer.chars().count(), "answer ready");
        Ok(Answer {
            message: message.to_string(),
            answer,
            verdict,
            prompt,
            source_url: retrieved.source_url,
            extraction_failed: retrieved.extraction_failed,
            retrieval_error: retrieved.retrieval_error,
            stages,
        })
    }

    async fn retrieve(&self, query: &str, stages: &mut Vec<Stage>) -> Result<Retrieved> {
        stages.push(Stage::Retrieving);
        tracing::info!(stage = ?Stage::Retrieving, search = self.search.name(), "searching the web");
        let url = match self.search.first_result_url(query).await {
            Ok(url) => url,
            Err(e) => match self.config.retrieval_failure {
                RetrievalFailurePolicy::Fail => return Err(e),
                RetrievalFailurePolicy::Degrade => {
                    tracing::warn!(error = %e, "retrieval failed; answering without context");
                    return Ok(Retrieved {
                        context: String::new(),
                        source_url: None,
                        extraction_failed: false,
                        retrieval_error: Some(e.to_string()),
                    });
                }
            },
        };

        stages.push(Stage::Extracting);
        tracing::info!(stage = ?Stage::Extracting, url = %url, extractor = self.extractor.name(), "extracting page text");
        let extraction = self.extractor.extract(&url).await;
        let extraction_failed = extraction.is_failed();
        let context = match (&extraction, self.config.extraction_failure) {
            (Extraction::Failed { reason, .. }, ExtractionFailurePolicy::Drop) => {
                tracing::warn!(reason = %reason, "extraction failed; dropping context");
                String::new()
            }
            (Extraction::Failed { reason, .. }, ExtractionFailurePolicy::Forward) => {
                tracing::warn!(reason = %reason, "extraction failed; forwarding error text as context");
                extraction.degraded_text()
            }
            (Extraction::Text(_), _) => extraction.degraded_text(),
        };

        Ok(Retrieved {
            context,
            source_url: Some(url),
            extraction_failed,
            retrieval_error: None,
        })
    }
}
