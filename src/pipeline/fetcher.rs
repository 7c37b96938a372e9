//! Pulls one feed URL, auto-detects RSS 2.0 / Atom 1.0, and yields a batch
//! of Articles. Malformed items are skipped with a warning rather than
//! failing the whole fetch; only a malformed URL or an exhausted-retries
//! network failure fails it.

use crate::config::FetchConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::article::{canonicalize_url, is_fetchable_host, Article};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Outcome of fetching one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub source_url: String,
    pub articles: Vec<Article>,
    pub fetch_timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PipelineError::Fatal(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Fetches and parses a single source. Never panics or propagates a hard
    /// error for anything except a malformed source URL: all other failures
    /// come back as `FetchResult { success: false, .. }`.
    pub async fn fetch(&self, source_url: &str) -> FetchResult {
        let fetch_timestamp = Utc::now();

        if !is_valid_source_url(source_url) {
            return FetchResult {
                source_url: source_url.to_string(),
                articles: vec![],
                fetch_timestamp,
                success: false,
                error: Some("malformed or disallowed source url".to_string()),
            };
        }

        match self.fetch_with_retries(source_url).await {
            Ok(body) => match self.parse_feed(&body, source_url, fetch_timestamp) {
                Ok(articles) => FetchResult {
                    source_url: source_url.to_string(),
                    articles,
                    fetch_timestamp,
                    success: true,
                    error: None,
                },
                Err(err) => FetchResult {
                    source_url: source_url.to_string(),
                    articles: vec![],
                    fetch_timestamp,
                    success: false,
                    error: Some(err.to_string()),
                },
            },
            Err(err) => FetchResult {
                source_url: source_url.to_string(),
                articles: vec![],
                fetch_timestamp,
                success: false,
                error: Some(err.to_string()),
            },
        }
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<bytes::Bytes> {
        // Fixed backoff per §4.2 ("fixed-backoff retries up to N attempts"),
        // not exponential: the delay is the same before every retry.
        let delay = self.config.retry_delay;
        let mut last_err = None;

        for attempt in 1..=self.config.max_retries {
            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.bytes().await.map_err(|e| {
                        PipelineError::transient(url, format!("failed to read body: {e}"))
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let err = if status.is_server_error() {
                        PipelineError::transient(url, format!("http {status}"))
                    } else {
                        PipelineError::malformed(url, format!("http {status}"))
                    };
                    if !err.retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(e) => {
                    let err = PipelineError::transient(url, e.to_string());
                    if attempt == self.config.max_retries {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }

            warn!(url, attempt, "fetch failed, retrying");
            tokio::time::sleep(delay).await;
        }

        Err(last_err.unwrap_or_else(|| PipelineError::transient(url, "exhausted retries")))
    }

    fn parse_feed(
        &self,
        body: &[u8],
        source_url: &str,
        fetch_timestamp: DateTime<Utc>,
    ) -> Result<Vec<Article>> {
        let feed = feed_rs::parser::parse(body)
            .map_err(|e| PipelineError::malformed(source_url, format!("unparseable feed: {e}")))?;

        let mut articles = Vec::new();
        for entry in feed.entries {
            match self.entry_to_article(entry, fetch_timestamp) {
                Ok(article) => articles.push(article),
                Err(err) => warn!(source_url, error = %err, "skipping malformed feed item"),
            }
            if articles.len() >= self.config.max_articles_per_feed {
                break;
            }
        }

        info!(source_url, count = articles.len(), "fetched feed");
        Ok(articles)
    }

    fn entry_to_article(
        &self,
        entry: feed_rs::model::Entry,
        fetch_timestamp: DateTime<Utc>,
    ) -> Result<Article> {
        let raw_url = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .filter(|h| !h.is_empty())
            .or_else(|| (!entry.id.is_empty()).then(|| entry.id.clone()))
            .ok_or_else(|| PipelineError::malformed("feed item", "missing url"))?;
        let canonical_url = canonicalize_url(&raw_url)?;

        let title = entry
            .title
            .map(|t| clean_text(&t.content))
            .unwrap_or_default();

        let content = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content))
            .map(|c| clean_text(&c))
            .unwrap_or_default();

        let author = entry.authors.first().map(|a| a.name.clone());

        let tags: Vec<String> = entry.categories.iter().map(|c| c.term.clone()).collect();

        let published_at = entry.published.or(entry.updated);

        Ok(Article::new(
            canonical_url,
            title,
            content,
            author,
            tags,
            published_at,
            fetch_timestamp,
        ))
    }
}

fn is_valid_source_url(url: &str) -> bool {
    url::Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
        && is_fetchable_host(url)
}

/// Strips HTML tags, decodes entities, and collapses whitespace.
fn clean_text(input: &str) -> String {
    let fragment = scraper::Html::parse_fragment(input);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_loopback_source() {
        assert!(!is_valid_source_url("http://127.0.0.1/feed.xml"));
    }

    #[test]
    fn accepts_https_source() {
        assert!(is_valid_source_url("https://example.com/feed.xml"));
    }

    #[test]
    fn clean_text_strips_tags_and_collapses_whitespace() {
        let cleaned = clean_text("<p>Hello   <b>world</b></p>\n\n<p>again</p>");
        assert_eq!(cleaned, "Hello world again");
    }
}
