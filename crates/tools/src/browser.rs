//! Browser tool — web search and page viewing over a search API.
//!
//! Serves the `browser.search` / `browser.open` / `browser.find` methods.
//! Call content is a JSON argument object. The capability keeps a
//! per-session page list addressed by cursor: every search or open appends
//! a page, links render as `【{id}†{title}】`, and the model cites lines as
//! `【{cursor}†L{start}-L{end}】`.
//!
//! The search provider sits behind [`SearchBackend`]; [`ExaClient`] is the
//! production implementation (`POST {base}/search` with text contents).

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use colloquy_core::{Message, ToolCapability, ToolClass, ToolError};

const DEFAULT_VIEW_LINES: usize = 60;

/// One search hit with its page text.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub text: String,
}

/// The search provider seam.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, num_results: usize)
        -> Result<Vec<SearchResult>, ToolError>;

    /// Fetch the text contents of one URL.
    async fn fetch(&self, url: &str) -> Result<String, ToolError>;
}

/// Exa search API client.
pub struct ExaClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ExaClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<ExaResponse, ToolError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "browser".into(),
                reason: format!("request to {url} failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Search API returned error");
            return Err(ToolError::ExecutionFailed {
                tool_name: "browser".into(),
                reason: format!("search API returned status {status}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "browser".into(),
                reason: format!("malformed search API response: {e}"),
            })
    }
}

#[derive(Debug, Deserialize)]
struct ExaResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[async_trait]
impl SearchBackend for ExaClient {
    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<Vec<SearchResult>, ToolError> {
        debug!(query, num_results, "Searching");
        let body = serde_json::json!({
            "query": query,
            "numResults": num_results,
            "contents": { "text": true },
        });
        Ok(self.post("/search", body).await?.results)
    }

    async fn fetch(&self, url: &str) -> Result<String, ToolError> {
        debug!(url, "Fetching page contents");
        let body = serde_json::json!({
            "urls": [url],
            "text": true,
        });
        let mut results = self.post("/contents", body).await?.results;
        if results.is_empty() {
            return Err(ToolError::ExecutionFailed {
                tool_name: "browser".into(),
                reason: format!("no contents returned for {url}"),
            });
        }
        Ok(results.remove(0).text)
    }
}

// ── Capability ─────────────────────────────────────────────────────────

/// A page in the session's browsing history.
struct Page {
    title: String,
    url: String,
    lines: Vec<String>,
    links: Vec<SearchResult>,
}

pub struct BrowserCapability {
    backend: Box<dyn SearchBackend>,
    pages: Mutex<Vec<Page>>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchArgs {
    #[serde(default)]
    query: String,
    #[serde(default = "default_topn")]
    topn: usize,
}

fn default_topn() -> usize {
    10
}

#[derive(Debug, Deserialize)]
struct OpenArgs {
    /// Link id within the cursor page, or a fully qualified URL
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default = "default_cursor")]
    cursor: i64,
    #[serde(default)]
    loc: Option<usize>,
    #[serde(default)]
    num_lines: Option<usize>,
}

impl Default for OpenArgs {
    fn default() -> Self {
        Self {
            id: None,
            cursor: default_cursor(),
            loc: None,
            num_lines: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FindArgs {
    #[serde(default)]
    pattern: String,
    #[serde(default = "default_cursor")]
    cursor: i64,
}

impl Default for FindArgs {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            cursor: default_cursor(),
        }
    }
}

fn default_cursor() -> i64 {
    -1
}

impl BrowserCapability {
    pub fn new(backend: Box<dyn SearchBackend>) -> Self {
        Self {
            backend,
            pages: Mutex::new(Vec::new()),
        }
    }

    async fn search(&self, args: SearchArgs) -> Result<String, ToolError> {
        if args.query.is_empty() {
            return Err(ToolError::InvalidArguments("search needs a query".into()));
        }
        let results = self.backend.search(&args.query, args.topn).await?;

        let mut lines = Vec::new();
        for (id, result) in results.iter().enumerate() {
            lines.push(format!("* 【{id}†{}】", result.title));
            lines.push(format!("  {}", result.url));
            if let Some(snippet) = result.text.lines().next() {
                lines.push(format!("  {snippet}"));
            }
        }
        if lines.is_empty() {
            lines.push("(no results)".into());
        }

        let page = Page {
            title: format!("Search: {}", args.query),
            url: String::new(),
            lines,
            links: results,
        };
        let mut pages = self.pages.lock().await;
        pages.push(page);
        let cursor = pages.len() - 1;
        Ok(render_page(&pages[cursor], cursor, 0, DEFAULT_VIEW_LINES))
    }

    async fn open(&self, args: OpenArgs) -> Result<String, ToolError> {
        let mut pages = self.pages.lock().await;

        let new_page = match &args.id {
            Some(serde_json::Value::Number(n)) if n.as_i64().is_some_and(|v| v >= 0) => {
                let id = n.as_i64().unwrap_or(0) as usize;
                let base = resolve_cursor(&pages, args.cursor)?;
                let link = pages[base].links.get(id).cloned().ok_or_else(|| {
                    ToolError::InvalidArguments(format!("no link {id} on page {base}"))
                })?;
                let text = if link.text.is_empty() {
                    self.backend.fetch(&link.url).await?
                } else {
                    link.text
                };
                Some(Page {
                    title: link.title,
                    url: link.url,
                    lines: text.lines().map(str::to_string).collect(),
                    links: Vec::new(),
                })
            }
            Some(serde_json::Value::String(url)) => {
                let text = self.backend.fetch(url).await?;
                Some(Page {
                    title: url.clone(),
                    url: url.clone(),
                    lines: text.lines().map(str::to_string).collect(),
                    links: Vec::new(),
                })
            }
            _ => None, // scroll within an existing page
        };

        let cursor = match new_page {
            Some(page) => {
                pages.push(page);
                pages.len() - 1
            }
            None => resolve_cursor(&pages, args.cursor)?,
        };

        let loc = args.loc.unwrap_or(0);
        let num_lines = args.num_lines.unwrap_or(DEFAULT_VIEW_LINES);
        Ok(render_page(&pages[cursor], cursor, loc, num_lines))
    }

    async fn find(&self, args: FindArgs) -> Result<String, ToolError> {
        if args.pattern.is_empty() {
            return Err(ToolError::InvalidArguments("find needs a pattern".into()));
        }
        let pages = self.pages.lock().await;
        let cursor = resolve_cursor(&pages, args.cursor)?;
        let page = &pages[cursor];

        let mut out = format!("[{cursor}] Find `{}` in `{}`\n", args.pattern, page.title);
        let mut hits = 0;
        for (n, line) in page.lines.iter().enumerate() {
            if line.contains(&args.pattern) {
                out.push_str(&format!("L{n}: {line}\n"));
                hits += 1;
            }
        }
        if hits == 0 {
            out.push_str("(no matches)\n");
        }
        Ok(out)
    }
}

fn resolve_cursor(pages: &[Page], cursor: i64) -> Result<usize, ToolError> {
    if pages.is_empty() {
        return Err(ToolError::InvalidArguments(
            "no pages open yet; search first".into(),
        ));
    }
    if cursor < 0 {
        return Ok(pages.len() - 1);
    }
    let cursor = cursor as usize;
    if cursor >= pages.len() {
        return Err(ToolError::InvalidArguments(format!(
            "cursor {cursor} out of range"
        )));
    }
    Ok(cursor)
}

fn render_page(page: &Page, cursor: usize, loc: usize, num_lines: usize) -> String {
    let mut out = format!("[{cursor}] {}", page.title);
    if !page.url.is_empty() {
        out.push_str(&format!("\n({})", page.url));
    }
    let total = page.lines.len();
    let start = loc.min(total);
    let end = (start + num_lines).min(total);
    out.push_str(&format!("\n**viewing lines [{start} - {end}] of {total}**\n"));
    for (n, line) in page.lines[start..end].iter().enumerate() {
        out.push_str(&format!("L{}: {line}\n", start + n));
    }
    out
}

fn parse_args<T: Default + for<'de> Deserialize<'de>>(text: &str) -> Result<T, ToolError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(trimmed)
        .map_err(|e| ToolError::InvalidArguments(format!("bad browser arguments: {e}")))
}

#[async_trait]
impl ToolCapability for BrowserCapability {
    fn class(&self) -> ToolClass {
        ToolClass::Browser
    }

    async fn invoke(&self, call: &Message) -> Result<Vec<String>, ToolError> {
        let recipient = call.recipient.as_deref().unwrap_or_default();
        let method = recipient.strip_prefix("browser.").unwrap_or(recipient);
        let text = call.text();

        let output = match method {
            "search" => self.search(parse_args(&text)?).await?,
            "open" => self.open(parse_args(&text)?).await?,
            "find" => self.find(parse_args(&text)?).await?,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "unknown browser method '{other}'"
                )));
            }
        };
        Ok(vec![output])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedBackend;

    #[async_trait]
    impl SearchBackend for ScriptedBackend {
        async fn search(
            &self,
            query: &str,
            _num_results: usize,
        ) -> Result<Vec<SearchResult>, ToolError> {
            Ok(vec![
                SearchResult {
                    title: format!("First hit for {query}"),
                    url: "https://example.com/a".into(),
                    text: "alpha line one\nalpha line two".into(),
                },
                SearchResult {
                    title: "Second hit".into(),
                    url: "https://example.com/b".into(),
                    text: "beta body".into(),
                },
            ])
        }

        async fn fetch(&self, url: &str) -> Result<String, ToolError> {
            Ok(format!("contents of {url}"))
        }
    }

    fn capability() -> BrowserCapability {
        BrowserCapability::new(Box::new(ScriptedBackend))
    }

    fn call(method: &str, args: &str) -> Message {
        Message::assistant(args)
            .with_channel("commentary")
            .with_recipient(format!("browser.{method}"))
    }

    #[tokio::test]
    async fn search_renders_link_markers() {
        let browser = capability();
        let out = browser
            .invoke(&call("search", r#"{"query": "rust"}"#))
            .await
            .unwrap();
        assert!(out[0].contains("【0†First hit for rust】"));
        assert!(out[0].contains("【1†Second hit】"));
        assert!(out[0].starts_with("[0] Search: rust"));
    }

    #[tokio::test]
    async fn open_link_by_id_shows_numbered_lines() {
        let browser = capability();
        browser
            .invoke(&call("search", r#"{"query": "rust"}"#))
            .await
            .unwrap();
        let out = browser
            .invoke(&call("open", r#"{"id": 0, "cursor": 0}"#))
            .await
            .unwrap();
        assert!(out[0].contains("L0: alpha line one"));
        assert!(out[0].contains("L1: alpha line two"));
        assert!(out[0].contains("https://example.com/a"));
    }

    #[tokio::test]
    async fn open_url_fetches_contents() {
        let browser = capability();
        let out = browser
            .invoke(&call("open", r#"{"id": "https://example.com/x"}"#))
            .await
            .unwrap();
        assert!(out[0].contains("contents of https://example.com/x"));
    }

    #[tokio::test]
    async fn open_scrolls_with_loc_window() {
        let browser = capability();
        browser
            .invoke(&call("search", r#"{"query": "rust"}"#))
            .await
            .unwrap();
        browser
            .invoke(&call("open", r#"{"id": 0}"#))
            .await
            .unwrap();
        let out = browser
            .invoke(&call("open", r#"{"loc": 1, "num_lines": 1}"#))
            .await
            .unwrap();
        assert!(out[0].contains("L1: alpha line two"));
        assert!(!out[0].contains("L0:"));
    }

    #[tokio::test]
    async fn find_reports_matching_lines() {
        let browser = capability();
        browser
            .invoke(&call("search", r#"{"query": "rust"}"#))
            .await
            .unwrap();
        browser
            .invoke(&call("open", r#"{"id": 0}"#))
            .await
            .unwrap();
        let out = browser
            .invoke(&call("find", r#"{"pattern": "line two"}"#))
            .await
            .unwrap();
        assert!(out[0].contains("L1: alpha line two"));

        let none = browser
            .invoke(&call("find", r#"{"pattern": "zzz"}"#))
            .await
            .unwrap();
        assert!(none[0].contains("(no matches)"));
    }

    #[tokio::test]
    async fn find_before_search_is_invalid() {
        let browser = capability();
        let err = browser
            .invoke(&call("find", r#"{"pattern": "x"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn unknown_method_is_invalid() {
        let browser = capability();
        let err = browser.invoke(&call("navigate", "{}")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
