use crate::model::{ChatModel, Turn};
use crate::Result;
use serde::Serialize;

const OPEN_DOMAIN_SYSTEM: &str =
    "You are an AI assistant. Answer the user's question in a clear and helpful way.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptShape {
    /// Answer only from the supplied knowledge base.
    ContextBounded,
    /// Answer from the model's own knowledge.
    OpenDomain,
}

#[derive(Debug, Clone)]
pub struct AnswerSynthesizer {
    max_tokens: u32,
}

impl AnswerSynthesizer {
    pub fn new(max_tokens: u32) -> Self {
        Self { max_tokens }
    }

    pub fn shape_for(context: &str) -> PromptShape {
        if context.is_empty() {
            PromptShape::OpenDomain
        } else {
            PromptShape::ContextBounded
        }
    }

    /// One system turn and the query as the only user turn. The context is quoted verbatim.
    pub fn conversation_for(query: &str, context: &str) -> Vec<Turn> {
        let system = match Self::shape_for(context) {
            PromptShape::OpenDomain => OPEN_DOMAIN_SYSTEM.to_string(),
            PromptShape::ContextBounded => format!(
                "You are an AI assistant. Answer the user's question in a clear and helpful way only from the following knowledge base: `{context}`"
            ),
        };
        vec![Turn::system(system), Turn::user(query)]
    }

    pub async fn synthesize(
        &self,
        model: &dyn ChatModel,
        query: &str,
        context: &str,
    ) -> Result<String> {
        let conversation = Self::conversation_for(query, context);
        tracing::debug!(
            shape = ?Self::shape_for(context),
            context_chars = context.chars().count(),
            "synthesizing answer"
        );
        model.generate(&conversation, self.max_tokens).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn empty_context_selects_open_domain_prompt() {
        let conv = AnswerSynthesizer::conversation_for("What is the capital of France?", "");
        assert_eq!(conv.len(), 2);
        assert_eq!(conv[0].role, Role::System);
        assert_eq!(conv[0].content, OPEN_DOMAIN_SYSTEM);
        assert_eq!(conv[1], Turn::user("What is the capital of France?"));
    }

    #[test]
    fn context_is_interpolated_verbatim() {
        let ctx = "Tokyo: 21°C, `clear` skies\n  wind 3 m/s";
        let conv = AnswerSynthesizer::conversation_for("Weather in Tokyo?", ctx);
        assert_eq!(AnswerSynthesizer::shape_for(ctx), PromptShape::ContextBounded);
        assert!(conv[0].content.contains("only from the following knowledge base"));
        assert!(conv[0].content.ends_with(&format!("`{ctx}`")));
        assert_eq!(conv[1].content, "Weather in Tokyo?");
    }

    #[test]
    fn whitespace_context_is_still_context() {
        assert_eq!(
            AnswerSynthesizer::shape_for(" "),
            PromptShape::ContextBounded
        );
    }
}
