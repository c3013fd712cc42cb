use serde::Serialize;

/// Prefix of the text that stands in for page content when extraction fails.
pub const EXTRACTION_ERROR_PREFIX: &str = "An error occurred while scraping the page: ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedDocument {
    pub url: String,
    /// Visible page text with whitespace collapsed to single spaces.
    pub text: String,
}

/// Outcome of fetching one page.
///
/// Failures are values, not errors: the pipeline decides at the synthesizer boundary whether
/// a failure becomes context text (see [`Extraction::degraded_text`]) or no context at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extraction {
    Text(ExtractedDocument),
    Failed { url: String, reason: String },
}

impl Extraction {
    pub fn url(&self) -> &str {
        match self {
            Extraction::Text(doc) => &doc.url,
            Extraction::Failed { url, .. } => url,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Extraction::Failed { .. })
    }

    /// Page text on success, otherwise the human-readable error sentence.
    ///
    /// Callers cannot tell the two apart from the returned string alone. That mirrors the
    /// historical behaviour and is kept only for compatibility.
    pub fn degraded_text(&self) -> String {
        match self {
            Extraction::Text(doc) => doc.text.clone(),
            Extraction::Failed { reason, .. } => format!("{EXTRACTION_ERROR_PREFIX}{reason}"),
        }
    }
}

#[async_trait::async_trait]
pub trait ContentExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    /// Never fails; fetch and parse problems come back as [`Extraction::Failed`].
    async fn extract(&self, url: &str) -> Extraction;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_text_formats_failures_as_sentences() {
        let ex = Extraction::Failed {
            url: "https://example.com".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(ex.is_failed());
        assert_eq!(
            ex.degraded_text(),
            "An error occurred while scraping the page: connection refused"
        );
    }

    #[test]
    fn degraded_text_is_the_page_text_on_success() {
        let ex = Extraction::Text(ExtractedDocument {
            url: "https://example.com".to_string(),
            text: "Tokyo 21C clear".to_string(),
        });
        assert_eq!(ex.url(), "https://example.com");
        assert_eq!(ex.degraded_text(), "Tokyo 21C clear");
    }
}
