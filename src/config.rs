//! Pipeline configuration.
//!
//! Every knob enumerated in the run contract has a default; nothing is
//! required to run the pipeline in development. Configuration loading,
//! secret management, and the logging sink itself are owned by the
//! surrounding service — this module only shapes the frozen record that
//! gets passed into each activity.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Deployment environment; affects nothing but log format and AI provider defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match std::env::var("ENVIRONMENT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Fetching knobs (§6 "Fetching").
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub fetch_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_articles_per_feed: usize,
    pub user_agent: String,
    /// Upper bound on sources fetched concurrently within one run (§5).
    pub max_concurrent_fetches: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(env_u64("FETCH_TIMEOUT_S", 30)),
            max_retries: env_u32("FETCH_MAX_RETRIES", 3),
            retry_delay: Duration::from_millis(env_u64("FETCH_RETRY_DELAY_MS", 1000)),
            max_articles_per_feed: env_usize("MAX_ARTICLES_PER_FEED", 100),
            user_agent: std::env::var("FETCH_USER_AGENT")
                .unwrap_or_else(|_| "daily-digest-pipeline/0.1".to_string()),
            max_concurrent_fetches: env_usize("MAX_CONCURRENT_FETCHES", 10),
        }
    }
}

/// Content normalization/validation knobs (§6 "Content").
#[derive(Debug, Clone)]
pub struct ContentConfig {
    pub min_length: usize,
    pub max_length: usize,
    pub title_max: usize,
    pub author_max: usize,
    pub tag_max: usize,
    pub max_tags: usize,
    pub spam_detection_enabled: bool,
    pub quality_scoring_enabled: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            min_length: env_usize("CONTENT_MIN_LENGTH", 100),
            max_length: env_usize("CONTENT_MAX_LENGTH", 50_000),
            title_max: env_usize("TITLE_MAX", 500),
            author_max: env_usize("AUTHOR_MAX", 100),
            tag_max: env_usize("TAG_MAX", 50),
            max_tags: env_usize("MAX_TAGS", 20),
            spam_detection_enabled: env_bool("SPAM_DETECTION_ENABLED", true),
            quality_scoring_enabled: env_bool("QUALITY_SCORING_ENABLED", true),
        }
    }
}

/// Topic extraction knobs (§6 "Topics").
#[derive(Debug, Clone)]
pub struct TopicsConfig {
    pub max_topics: usize,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            max_topics: env_usize("MAX_TOPICS", 5).clamp(1, 10),
        }
    }
}

/// Summarization knobs (§6 "Summarization").
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStyle {
    Brief,
    Detailed,
    BulletPoints,
}

#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub max_length_words: usize,
    pub content_length: usize,
    pub style: SummaryStyle,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_length_words: env_usize("SUMMARY_MAX_LENGTH_WORDS", 500),
            content_length: env_usize("SUMMARY_CONTENT_LENGTH", 2000),
            style: SummaryStyle::Brief,
        }
    }
}

/// Similarity grouping knobs (§6 "Similarity").
#[derive(Debug, Clone)]
pub struct SimilarityConfig {
    pub threshold: f64,
    pub cache_ttl: Duration,
    pub batch_size: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: env_f64("SIMILARITY_THRESHOLD", 0.7),
            cache_ttl: Duration::from_secs(60 * env_u64("SIMILARITY_CACHE_TTL_MIN", 1440)),
            batch_size: env_usize("SIMILARITY_BATCH_SIZE", 10),
        }
    }
}

/// Personalization/relevance knobs (§6 "Personalization").
#[derive(Debug, Clone)]
pub struct PersonalizationConfig {
    pub kw_weight_title: u32,
    pub kw_weight_content: u32,
    pub kw_weight_tags: u32,
    pub max_keywords: usize,
    pub relevance_threshold_default: u32,
    pub boost_factor_default: f64,
    pub cache_ttl: Duration,
    pub enable_semantic_scoring: bool,
}

impl Default for PersonalizationConfig {
    fn default() -> Self {
        Self {
            kw_weight_title: env_u32("KW_WEIGHT_TITLE", 3),
            kw_weight_content: env_u32("KW_WEIGHT_CONTENT", 2),
            kw_weight_tags: env_u32("KW_WEIGHT_TAGS", 4),
            max_keywords: env_usize("MAX_KEYWORDS", 50),
            relevance_threshold_default: env_u32("RELEVANCE_THRESHOLD_DEFAULT", 40),
            boost_factor_default: env_f64("BOOST_FACTOR_DEFAULT", 1.0),
            cache_ttl: Duration::from_secs(60 * env_u64("PERSONALIZATION_CACHE_TTL_MIN", 720)),
            enable_semantic_scoring: env_bool("ENABLE_SEMANTIC_SCORING", true),
        }
    }
}

/// Per-activity cache TTLs (§4.3).
#[derive(Debug, Clone)]
pub struct CacheTtlConfig {
    pub spam: Duration,
    pub quality: Duration,
    pub topics: Duration,
    pub relevance: Duration,
    pub similarity: Duration,
    pub summarizer: Duration,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            spam: Duration::from_secs(24 * 3600),
            quality: Duration::from_secs(12 * 3600),
            topics: Duration::from_secs(24 * 3600),
            relevance: Duration::from_secs(12 * 3600),
            similarity: Duration::from_secs(24 * 3600),
            summarizer: Duration::from_secs(24 * 3600),
        }
    }
}

/// The frozen configuration record passed into every activity.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub fetch: FetchConfig,
    pub content: ContentConfig,
    pub topics: TopicsConfig,
    pub summary: SummaryConfig,
    pub similarity: SimilarityConfig,
    pub personalization: PersonalizationConfig,
    pub cache_ttl: CacheTtlConfig,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::default()
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.content.min_length, 100);
        assert_eq!(cfg.personalization.relevance_threshold_default, 40);
        assert_eq!(cfg.similarity.threshold, 0.7);
        assert_eq!(cfg.topics.max_topics, 5);
    }

    #[test]
    fn topics_max_is_clamped() {
        std::env::set_var("MAX_TOPICS", "99");
        let cfg = TopicsConfig::default();
        assert_eq!(cfg.max_topics, 10);
        std::env::remove_var("MAX_TOPICS");
    }
}
