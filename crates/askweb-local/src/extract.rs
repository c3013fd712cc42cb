use askweb_core::{ContentExtractor, Error, ExtractedDocument, Extraction, Result};
use std::time::Duration;

/// Sent with every page fetch; many sites reject clients that do not look like a browser.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;

/// Elements whose text is never rendered.
const INVISIBLE: &[&str] = &["script", "style", "noscript", "template"];

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text of the document body: each text node trimmed, empty ones dropped, joined by a
/// single space, then all whitespace runs collapsed.
pub fn visible_text(html: &str) -> String {
    let doc = html_scraper::Html::parse_document(html);
    let body_sel = html_scraper::Selector::parse("body").ok();
    let root = body_sel
        .as_ref()
        .and_then(|s| doc.select(s).next())
        .unwrap_or_else(|| doc.root_element());

    let mut parts: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| INVISIBLE.contains(&el.name()))
        });
        if hidden {
            continue;
        }
        let t = text.trim();
        if !t.is_empty() {
            parts.push(t);
        }
    }
    collapse_whitespace(&parts.join(" "))
}

fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|p| {
        let (k, v) = p.split_once('=')?;
        k.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| v.trim().trim_matches(|c: char| c == '"' || c == '\''))
    })
}

/// Charset declared by a `<meta charset>` or `<meta http-equiv content="...; charset=...">`
/// tag in the first KiB of the document.
fn meta_charset(head: &[u8]) -> Option<String> {
    let head = &head[..head.len().min(1024)];
    let lower = String::from_utf8_lossy(head).to_ascii_lowercase();
    lower.match_indices("<meta").find_map(|(at, _)| {
        let tag = &lower[at..];
        let tag = &tag[..tag.find('>').unwrap_or(tag.len())];
        let rest = &tag[tag.find("charset")? + "charset".len()..];
        let rest = rest.trim_start().strip_prefix('=')?;
        let label: String = rest
            .trim_start_matches(|c: char| c.is_whitespace() || c == '"' || c == '\'')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
            .collect();
        (!label.is_empty()).then_some(label)
    })
}

/// Decode a page body: a BOM wins, then the `Content-Type` charset, then `<meta charset>`,
/// then UTF-8. Unknown labels fall through to the next source.
pub fn decode_html(bytes: &[u8], content_type: Option<&str>) -> String {
    let declared = content_type
        .and_then(charset_param)
        .and_then(|l| encoding_rs::Encoding::for_label(l.as_bytes()));
    let encoding = declared
        .or_else(|| {
            meta_charset(bytes).and_then(|l| encoding_rs::Encoding::for_label(l.as_bytes()))
        })
        .unwrap_or(encoding_rs::UTF_8);
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = used.name(), "page body had undecodable bytes");
    }
    text.into_owned()
}

#[derive(Debug, Clone)]
pub struct PageExtractor {
    client: reqwest::Client,
    max_bytes: u64,
}

impl PageExtractor {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            // Avoid hanging forever on DNS/TLS/body stalls.
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(Self { client, max_bytes })
    }

    /// `ASKWEB_FETCH_TIMEOUT_MS` (default 30000) and `ASKWEB_FETCH_MAX_BYTES` (default 5 MiB).
    pub fn from_env() -> Result<Self> {
        let timeout_ms = crate::env_u64("ASKWEB_FETCH_TIMEOUT_MS", 30_000).max(1);
        let max_bytes = crate::env_u64("ASKWEB_FETCH_MAX_BYTES", DEFAULT_MAX_BYTES).max(1);
        Self::new(Duration::from_millis(timeout_ms), max_bytes)
    }

    /// Capped body bytes and the response `Content-Type`.
    async fn fetch_body(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let url = url::Url::parse(url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            // Error pages are still parsed; they are often what the site actually shows.
            tracing::debug!(status = status.as_u16(), "non-success status while fetching page");
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let max_bytes = self.max_bytes as usize;
        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
            if bytes.len().saturating_add(chunk.len()) > max_bytes {
                let can_take = max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                tracing::debug!(max_bytes, "page body truncated");
                break;
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok((bytes, content_type))
    }
}

#[async_trait::async_trait]
impl ContentExtractor for PageExtractor {
    fn name(&self) -> &'static str {
        "reqwest+scraper"
    }

    async fn extract(&self, url: &str) -> Extraction {
        match self.fetch_body(url).await {
            Ok((bytes, content_type)) => {
                let html = decode_html(&bytes, content_type.as_deref());
                let text = visible_text(&html);
                tracing::debug!(url, bytes = bytes.len(), text_chars = text.chars().count(), "page extracted");
                Extraction::Text(ExtractedDocument {
                    url: url.to_string(),
                    text,
                })
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "page extraction failed");
                Extraction::Failed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }
}
