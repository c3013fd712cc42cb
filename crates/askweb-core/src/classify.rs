//! Live-data classification.
//!
//! The model is primed with a fixed few-shot transcript whose assistant turns are the literal
//! labels `TRUE` (static general knowledge) and `FALSE` (needs live data), then asked to label
//! the user's query with a tiny completion budget.

use crate::config::UnrecognizedVerdictPolicy;
use crate::model::{ChatModel, Turn};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const LABEL_STATIC: &str = "TRUE";
pub const LABEL_LIVE: &str = "FALSE";

const DEFAULT_SYSTEM: &str = "You are an AI assistant. For any real-time or up-to-date data query, such as current time, exchange rates, live weather, or current events, respond with **only** 'FALSE'. For general knowledge questions, respond with **only** 'TRUE'.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exemplar {
    pub query: String,
    /// `TRUE` or `FALSE`.
    pub label: String,
}

impl Exemplar {
    fn new(query: &str, label: &str) -> Self {
        Self {
            query: query.to_string(),
            label: label.to_string(),
        }
    }
}

/// Ordered few-shot demonstrations plus the system instruction that frames them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExemplarTranscript {
    pub system: String,
    pub exemplars: Vec<Exemplar>,
}

impl Default for ExemplarTranscript {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM.to_string(),
            exemplars: vec![
                Exemplar::new("What's the current time in Pakistan?", LABEL_LIVE),
                Exemplar::new(
                    "What is the current exchange rate of USD to EUR?",
                    LABEL_LIVE,
                ),
                Exemplar::new("What is the temperature in Tokyo right now?", LABEL_LIVE),
                Exemplar::new("Who won the latest football World Cup?", LABEL_LIVE),
                Exemplar::new(
                    "Who was the first president of the United States?",
                    LABEL_STATIC,
                ),
                Exemplar::new("What is the capital of France?", LABEL_STATIC),
                Exemplar::new("What is the speed of light in a vacuum?", LABEL_STATIC),
                Exemplar::new("Who developed the theory of relativity?", LABEL_STATIC),
            ],
        }
    }
}

impl ExemplarTranscript {
    /// Load a transcript from a JSON file shaped like `{"system": "...", "exemplars": [...]}`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        let t: Self = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<()> {
        if self.exemplars.is_empty() {
            return Err(Error::Config(
                "exemplar transcript must contain at least one example".to_string(),
            ));
        }
        for ex in &self.exemplars {
            if ex.label != LABEL_STATIC && ex.label != LABEL_LIVE {
                return Err(Error::Config(format!(
                    "exemplar label must be TRUE or FALSE, got {:?}",
                    ex.label
                )));
            }
        }
        Ok(())
    }

    /// System turn, the exemplar pairs in order, then `query` as the final user turn.
    pub fn conversation_for(&self, query: &str) -> Vec<Turn> {
        let mut out = Vec::with_capacity(self.exemplars.len() * 2 + 2);
        out.push(Turn::system(self.system.clone()));
        for ex in &self.exemplars {
            out.push(Turn::user(ex.query.clone()));
            out.push(Turn::assistant(ex.label.clone()));
        }
        out.push(Turn::user(query));
        out
    }
}

/// What the model literally said, before any policy is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawVerdict {
    Static,
    Live,
    Unrecognized,
}

impl RawVerdict {
    /// Case-insensitive match of the whole output; `" FALSE\n"` is not `FALSE`.
    pub fn parse(output: &str) -> Self {
        if output.eq_ignore_ascii_case(LABEL_LIVE) {
            RawVerdict::Live
        } else if output.eq_ignore_ascii_case(LABEL_STATIC) {
            RawVerdict::Static
        } else {
            RawVerdict::Unrecognized
        }
    }

    pub fn resolve(self, policy: UnrecognizedVerdictPolicy) -> Verdict {
        match (self, policy) {
            (RawVerdict::Live, _) => Verdict::NeedsRetrieval,
            (RawVerdict::Static, _) => Verdict::GeneralKnowledge,
            (RawVerdict::Unrecognized, UnrecognizedVerdictPolicy::GeneralKnowledge) => {
                Verdict::GeneralKnowledge
            }
            (RawVerdict::Unrecognized, UnrecognizedVerdictPolicy::Retrieve) => {
                Verdict::NeedsRetrieval
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    NeedsRetrieval,
    GeneralKnowledge,
}

#[derive(Debug, Clone)]
pub struct QueryClassifier {
    transcript: ExemplarTranscript,
    max_tokens: u32,
    policy: UnrecognizedVerdictPolicy,
    trim_output: bool,
}

impl QueryClassifier {
    pub fn new(
        transcript: ExemplarTranscript,
        max_tokens: u32,
        policy: UnrecognizedVerdictPolicy,
    ) -> Self {
        Self {
            transcript,
            max_tokens,
            policy,
            trim_output: false,
        }
    }

    /// Strip surrounding whitespace from the model output before matching. Off by default,
    /// so padded output such as `" FALSE\n"` does not trigger retrieval.
    pub fn trim_output(mut self, yes: bool) -> Self {
        self.trim_output = yes;
        self
    }

    pub fn transcript(&self) -> &ExemplarTranscript {
        &self.transcript
    }

    pub async fn classify(&self, model: &dyn ChatModel, query: &str) -> Result<Verdict> {
        let conversation = self.transcript.conversation_for(query);
        let output = model.generate(&conversation, self.max_tokens).await?;
        let raw = if self.trim_output {
            RawVerdict::parse(output.trim())
        } else {
            RawVerdict::parse(&output)
        };
        tracing::debug!(output = %output, raw = ?raw, "classifier output");
        if raw == RawVerdict::Unrecognized {
            tracing::warn!(
                output = %output,
                policy = ?self.policy,
                "classifier output is neither TRUE nor FALSE"
            );
        }
        Ok(raw.resolve(self.policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use proptest::prelude::*;

    #[test]
    fn default_transcript_alternates_examples_and_labels() {
        let t = ExemplarTranscript::default();
        assert!(t.validate().is_ok());
        let conv = t.conversation_for("Is it raining in Oslo?");
        assert_eq!(conv.len(), 1 + 8 * 2 + 1);
        assert_eq!(conv[0].role, Role::System);
        assert_eq!(conv[1].content, "What's the current time in Pakistan?");
        assert_eq!(conv[2], Turn::assistant("FALSE"));
        assert_eq!(conv[12], Turn::assistant("TRUE"));
        assert_eq!(conv.last().unwrap(), &Turn::user("Is it raining in Oslo?"));
    }

    #[test]
    fn false_in_any_case_means_live() {
        for s in ["FALSE", "false", "False", "fAlSe"] {
            assert_eq!(RawVerdict::parse(s), RawVerdict::Live, "{s:?}");
        }
    }

    #[test]
    fn padded_false_is_not_live() {
        for s in [" FALSE", "FALSE\n", " false \n"] {
            assert_eq!(RawVerdict::parse(s), RawVerdict::Unrecognized, "{s:?}");
        }
    }

    struct Says(&'static str);

    #[async_trait::async_trait]
    impl ChatModel for Says {
        fn name(&self) -> &'static str {
            "says"
        }

        async fn generate(&self, _conversation: &[Turn], _max_tokens: u32) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn padded_false_retrieves_only_when_trimming_is_enabled() {
        let model = Says(" FALSE\n");
        let exact = QueryClassifier::new(
            ExemplarTranscript::default(),
            5,
            UnrecognizedVerdictPolicy::GeneralKnowledge,
        );
        assert_eq!(
            exact.classify(&model, "Weather in Tokyo?").await.unwrap(),
            Verdict::GeneralKnowledge
        );

        let trimmed = exact.trim_output(true);
        assert_eq!(
            trimmed.classify(&model, "Weather in Tokyo?").await.unwrap(),
            Verdict::NeedsRetrieval
        );
    }

    #[test]
    fn everything_else_does_not_retrieve_by_default() {
        for s in ["", "true", "TRUE", "unsure", "FALSE.", "The answer is FALSE"] {
            let v = RawVerdict::parse(s).resolve(UnrecognizedVerdictPolicy::GeneralKnowledge);
            assert_eq!(v, Verdict::GeneralKnowledge, "{s:?}");
        }
    }

    #[test]
    fn retrieve_policy_only_changes_unrecognized_output() {
        let p = UnrecognizedVerdictPolicy::Retrieve;
        assert_eq!(RawVerdict::parse("maybe").resolve(p), Verdict::NeedsRetrieval);
        assert_eq!(RawVerdict::parse("true").resolve(p), Verdict::GeneralKnowledge);
    }

    #[test]
    fn validate_rejects_unknown_labels_and_empty_lists() {
        let mut t = ExemplarTranscript::default();
        t.exemplars[0].label = "YES".to_string();
        assert!(matches!(t.validate(), Err(Error::Config(_))));

        t.exemplars.clear();
        assert!(matches!(t.validate(), Err(Error::Config(_))));
    }

    proptest! {
        #[test]
        fn only_false_triggers_retrieval(s in ".{0,12}") {
            let v = RawVerdict::parse(&s).resolve(UnrecognizedVerdictPolicy::GeneralKnowledge);
            let expect_live = s.eq_ignore_ascii_case("false");
            prop_assert_eq!(v == Verdict::NeedsRetrieval, expect_live);
        }
    }
}
