//! The canonical in-flight data shape and its immutable transforms.
//!
//! Articles move through the pipeline by value. Every processor that
//! annotates an article does so via `with_*`, which clones and returns a
//! new `Article` — nothing here ever mutates an existing instance in place.

use crate::config::SummaryStyle;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use url::Url;

/// A single feed item with normalized metadata, as it flows between activities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    /// Canonical, tracking-stripped, https-normalized URL; the in-run identity key.
    pub url: String,
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    /// Logically a set: normalizer dedups while preserving first-seen order.
    pub tags: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub fetch_timestamp: DateTime<Utc>,
    pub ai_topics: Option<Vec<String>>,
    pub summary: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Article {
    /// `published_at: None` (the feed item omitted it) falls back to
    /// `fetch_timestamp` here, per §4.5.2 — `DateTime<Utc>` on the field
    /// itself rules out the "naive or non-UTC" half of that rule.
    pub fn new(
        url: String,
        title: String,
        content: String,
        author: Option<String>,
        tags: Vec<String>,
        published_at: Option<DateTime<Utc>>,
        fetch_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            url,
            title,
            content,
            author,
            tags,
            published_at: published_at.unwrap_or(fetch_timestamp),
            fetch_timestamp,
            ai_topics: None,
            summary: None,
            metadata: Map::new(),
        }
    }

    /// Copy-with-updates: returns a new Article carrying extracted topics.
    pub fn with_topics(&self, topics: Vec<String>) -> Article {
        let mut next = self.clone();
        next.ai_topics = Some(topics);
        next
    }

    /// Copy-with-updates: returns a new Article carrying a summary.
    pub fn with_summary(&self, summary: String) -> Article {
        let mut next = self.clone();
        next.summary = Some(summary);
        next
    }

    /// Copy-with-updates: merges `updates` into `metadata` (existing keys overwritten).
    pub fn with_metadata(&self, updates: Map<String, Value>) -> Article {
        let mut next = self.clone();
        for (k, v) in updates {
            next.metadata.insert(k, v);
        }
        next
    }

    /// Copy-with-updates used by the normalizer: replaces the normalized fields wholesale.
    #[allow(clippy::too_many_arguments)]
    pub fn with_normalized_fields(
        &self,
        url: String,
        title: String,
        content: String,
        author: Option<String>,
        tags: Vec<String>,
        published_at: DateTime<Utc>,
    ) -> Article {
        let mut next = self.clone();
        next.url = url;
        next.title = title;
        next.content = content;
        next.author = author;
        next.tags = tags;
        next.published_at = published_at;
        next
    }

    pub fn quality_score(&self) -> Option<f64> {
        self.metadata.get("quality_score").and_then(Value::as_f64)
    }

    /// Written by the relevance activity (§4.7); absent until that stage runs.
    pub fn relevance_score(&self) -> Option<f64> {
        self.metadata.get("relevance_score").and_then(Value::as_f64)
    }

    /// Written alongside `relevance_score`; carries the empty-keyword-profile
    /// exception (always true) through summarize/similarity to the assembler.
    pub fn passes_relevance_threshold(&self) -> Option<bool> {
        self.metadata.get("relevance_passes_threshold").and_then(Value::as_bool)
    }

    /// Age in hours, using `published_at` against the given instant.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.published_at).num_seconds() as f64 / 3600.0
    }
}

/// Canonicalizes a URL for in-run identity: lowercase scheme+host (handled by
/// the URL parser), strip `utm_*`/`ref`/`campaign` query params, sort the
/// remaining query, drop the fragment, upgrade http to https.
pub fn canonicalize_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| PipelineError::malformed("url", format!("unparseable url: {e}")))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(PipelineError::malformed(
            "url",
            format!("unsupported scheme: {}", url.scheme()),
        ));
    }

    if url.scheme() == "http" {
        let _ = url.set_scheme("https");
    }

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_lowercase();
            !(k.starts_with("utm_") || k == "ref" || k == "campaign")
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let qs = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&qs));
    }

    Ok(url.to_string())
}

/// Rejects internal/loopback targets; called by the fetcher before dialing out.
pub fn is_fetchable_host(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else { return false };
    match url.host_str() {
        None => false,
        Some(host) => {
            if host == "localhost" {
                return false;
            }
            if let Ok(ip) = host.parse::<std::net::IpAddr>() {
                return !(ip.is_loopback() || ip.is_unspecified() || is_private(&ip));
            }
            true
        }
    }
}

fn is_private(ip: &std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
        std::net::IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
    }
}

pub fn sha256_hex16(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// User-supplied keywords plus scoring knobs consumed by the relevance scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestProfile {
    pub keywords: Vec<String>,
    pub relevance_threshold: u32,
    pub boost_factor: f64,
    pub summary_style: SummaryStyle,
}

impl InterestProfile {
    pub fn new(
        keywords: Vec<String>,
        relevance_threshold: u32,
        boost_factor: f64,
        summary_style: SummaryStyle,
    ) -> Self {
        let mut seen = std::collections::HashSet::new();
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .take(50)
            .collect();

        Self {
            keywords,
            relevance_threshold: relevance_threshold.min(100),
            boost_factor: boost_factor.clamp(0.5, 2.0),
            summary_style,
        }
    }

    /// Content-address for the relevance cache key: `sha256(sorted_keywords | threshold | boost_factor)`.
    pub fn fingerprint(&self) -> String {
        let mut sorted = self.keywords.clone();
        sorted.sort();
        let material = format!(
            "{}|{}|{}",
            sorted.join(","),
            self.relevance_threshold,
            self.boost_factor
        );
        sha256_hex16(&material)
    }
}

/// A feed the user wants pulled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub url: String,
    pub name: Option<String>,
}

/// Read-only per-run input describing who the digest is for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub user_id: String,
    pub email: String,
    pub timezone: String,
    pub interest_profile: InterestProfile,
    pub sources: Vec<SourceRef>,
}

/// §4.1.2 Validator output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationResult {
    pub is_empty: bool,
    pub is_too_short: bool,
    pub is_spam: bool,
    pub confidence: f64,
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn passes(&self) -> bool {
        !self.is_empty && !self.is_too_short && !(self.is_spam && self.confidence >= 0.5)
    }
}

/// §4.1.3 Quality scorer output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentQualityResult {
    pub quality_score: f64,
    pub metadata_score: f64,
    pub ai_content_score: f64,
    pub breakdown: Value,
}

/// §4.1.4 Relevance scorer breakdown.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelevanceBreakdown {
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub temporal_boost: f64,
    pub quality_boost: f64,
    pub matched_keywords: Vec<String>,
    pub semantic_reasoning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceResult {
    pub relevance_score: f64,
    pub breakdown: RelevanceBreakdown,
    pub passes_threshold: bool,
}

/// §4.1.5 Summarizer output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
    pub key_points: Vec<String>,
    pub reasoning: Option<String>,
}

/// §4.1.6 A connected component of the similarity graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleGroup {
    pub members: Vec<Article>,
    pub aggregated_topics: Vec<String>,
    pub primary: Article,
}

/// The final object returned from the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestPayload {
    pub user_id: String,
    pub email: String,
    pub generation_timestamp: DateTime<Utc>,
    pub html_body: String,
    pub text_body: String,
    pub groups_summary: Vec<String>,
    pub metadata: DigestMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DigestMetadata {
    pub total_groups: usize,
    pub total_articles: usize,
    pub html_size: usize,
    pub text_size: usize,
    pub assembly_ms: u64,
    /// Source-level failures surfaced so the sending layer can annotate the email (§7).
    pub failed_sources: Vec<String>,
    /// AI-level and other per-activity error counts, surfaced for the same reason.
    pub activity_errors: std::collections::BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_tracking_params_and_sorts() {
        let canon = canonicalize_url(
            "HTTP://Example.com/path?utm_source=x&b=2&ref=y&a=1&campaign=z#frag",
        )
        .unwrap();
        assert_eq!(canon, "https://example.com/path?a=1&b=2");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize_url("http://Example.com/p?utm_x=1&z=2&a=1").unwrap();
        let twice = canonicalize_url(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn canonicalize_rejects_non_http_scheme() {
        assert!(canonicalize_url("ftp://example.com/file").is_err());
    }

    #[test]
    fn loopback_targets_are_not_fetchable() {
        assert!(!is_fetchable_host("http://127.0.0.1/feed"));
        assert!(!is_fetchable_host("http://localhost:8080/feed"));
        assert!(is_fetchable_host("https://example.com/feed"));
    }

    #[test]
    fn interest_profile_normalizes_and_clamps() {
        let profile = InterestProfile::new(
            vec!["AI".into(), "ai".into(), " Python ".into()],
            40,
            5.0,
            SummaryStyle::Brief,
        );
        assert_eq!(profile.keywords, vec!["ai", "python"]);
        assert_eq!(profile.boost_factor, 2.0);
    }

    #[test]
    fn validation_result_rejects_high_confidence_spam() {
        let v = ValidationResult {
            is_spam: true,
            confidence: 0.9,
            ..Default::default()
        };
        assert!(!v.passes());

        let v2 = ValidationResult {
            is_spam: true,
            confidence: 0.3,
            ..Default::default()
        };
        assert!(v2.passes());
    }
}
