//! First-result web search over a browser-automation session.

use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// `search(query) -> url`: the only capability the pipeline needs from a search backend.
#[async_trait::async_trait]
pub trait WebSearch: Send + Sync {
    fn name(&self) -> &'static str;
    async fn first_result_url(&self, query: &str) -> Result<String>;
}

/// A live browser session. Must be closed; dropping it without `close` must still release it.
#[async_trait::async_trait]
pub trait BrowserSession: Send {
    /// Open the search engine, type `query` into the search box and submit it.
    /// Fails with [`Error::SearchTimeout`] if the page is not ready within `wait`.
    async fn submit_query(&mut self, query: &str, wait: Duration) -> Result<()>;

    /// Wait up to `wait` for the first organic result and return its link target.
    async fn first_result_href(&mut self, wait: Duration) -> Result<String>;

    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait::async_trait]
pub trait BrowserLauncher: Send + Sync {
    fn name(&self) -> &'static str;
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

/// [`WebSearch`] that opens one session per call and always closes it before returning.
#[derive(Clone)]
pub struct SessionSearch {
    launcher: Arc<dyn BrowserLauncher>,
    wait: Duration,
}

impl SessionSearch {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, wait: Duration) -> Self {
        Self { launcher, wait }
    }

    async fn drive(session: &mut dyn BrowserSession, query: &str, wait: Duration) -> Result<String> {
        session.submit_query(query, wait).await?;
        let href = session.first_result_href(wait).await?;
        let href = href.trim();
        if href.is_empty() {
            return Err(Error::Search("first result has no link target".to_string()));
        }
        url::Url::parse(href)
            .map_err(|e| Error::Search(format!("first result link {href:?} is not absolute: {e}")))?;
        Ok(href.to_string())
    }
}

#[async_trait::async_trait]
impl WebSearch for SessionSearch {
    fn name(&self) -> &'static str {
        self.launcher.name()
    }

    async fn first_result_url(&self, query: &str) -> Result<String> {
        let mut session = self.launcher.launch().await?;
        let out = Self::drive(session.as_mut(), query, self.wait).await;
        // Close on every path; a close failure is logged and never replaces the outcome.
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "failed to close browser session");
        }
        match &out {
            Ok(url) => tracing::debug!(url = %url, "search first result"),
            Err(e) => tracing::warn!(error = %e, "search failed"),
        }
        out
    }
}
