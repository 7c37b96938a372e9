//! §4.7 Activities: batch wrappers around the processors in
//! `pipeline::processors`. Each activity is cache check → processor call →
//! cache store → metrics, exactly as described by the pseudocode in the
//! run contract. Per-article failures are counted, never propagated —
//! the article is carried forward with the processor's own documented
//! fallback.

use crate::config::PipelineConfig;
use crate::metrics::MetricsCollector;
use crate::pipeline::ai::AiProvider;
use crate::pipeline::article::{
    sha256_hex16, Article, ArticleGroup, ContentQualityResult, InterestProfile, RelevanceResult,
    SummaryResult, ValidationResult,
};
use crate::pipeline::cache::{activity_key, get_json, set_json, Cache};
use crate::pipeline::processors::{normalizer, quality, relevance, similarity, summarizer, topics, validator};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Stats common to every activity invocation (§4.7, §8 replay property).
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    pub ai_calls: u64,
    pub cache_hits: u64,
    pub errors_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchStats {
    fn start() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }
}

/// Wraps a processor's result with whether computing it made an AI call.
/// Only the inner value is ever cached; `ai_called` is meaningless for a
/// cache hit (no call was made to produce the cached bytes) and is reset
/// to `false` on deserialize accordingly.
struct Computed<T> {
    value: T,
    ai_called: bool,
}

impl<T: Serialize> Serialize for Computed<T> {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(s)
    }
}

impl<'de, T: serde::Deserialize<'de>> serde::Deserialize<'de> for Computed<T> {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Computed {
            value: T::deserialize(d)?,
            ai_called: false,
        })
    }
}

/// Cache-check → compute → cache-store, with hit/miss metrics. Returns the
/// computed (or cached) value and whether it came from cache.
async fn cached_or_compute<T, F, Fut>(
    cache: &dyn Cache,
    key: &str,
    ttl: std::time::Duration,
    metrics: &MetricsCollector,
    activity: &str,
    compute: F,
) -> (Computed<T>, bool)
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Computed<T>>,
{
    if let Some(cached) = get_json::<Computed<T>>(cache, key).await {
        metrics.cache_hits_total.with_label_values(&[activity]).inc();
        return (cached, true);
    }
    metrics.cache_misses_total.with_label_values(&[activity]).inc();
    let computed = compute().await;
    if computed.ai_called {
        metrics.ai_calls_total.with_label_values(&[activity]).inc();
    }
    set_json(cache, key, &computed, ttl).await;
    (computed, false)
}

/// Wraps an `AiProvider`, counting every `Err` it returns against both the
/// per-batch `errors_count` and the `ai_errors_total` metric. Processors
/// never see this layer — they call the same `AiProvider` interface and
/// degrade on error exactly as documented; this only observes the outcome.
struct ErrorCountingAiProvider<'a> {
    inner: &'a dyn AiProvider,
    errors: &'a AtomicU64,
    metrics: &'a MetricsCollector,
    activity: &'static str,
}

#[async_trait::async_trait]
impl<'a> AiProvider for ErrorCountingAiProvider<'a> {
    async fn run_structured(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        output_schema: &serde_json::Value,
        timeout: std::time::Duration,
    ) -> Result<serde_json::Value, crate::pipeline::ai::AiError> {
        let started = std::time::Instant::now();
        let result = self.inner.run_structured(system_prompt, user_prompt, output_schema, timeout).await;
        self.metrics
            .ai_call_duration_seconds
            .with_label_values(&[self.activity])
            .observe(started.elapsed().as_secs_f64());
        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .ai_errors_total
                    .with_label_values(&[self.activity, if e.retryable { "true" } else { "false" }])
                    .inc();
                Err(e)
            }
        }
    }
}

fn rejection_reason(result: &ValidationResult) -> &'static str {
    if result.is_empty {
        "empty"
    } else if result.is_too_short {
        "too_short"
    } else if result.is_spam {
        "spam"
    } else {
        "unknown"
    }
}

/// §4.5.1 / §4.7 "validate" activity. Articles failing `ValidationResult::passes`
/// are dropped from the returned batch; their rejection is not an error (§7).
pub async fn validate_and_filter_batch(
    articles: Vec<Article>,
    config: &PipelineConfig,
    cache: &dyn Cache,
    ai: &dyn AiProvider,
    metrics: &MetricsCollector,
) -> (Vec<Article>, BatchStats) {
    let mut stats = BatchStats::start();
    let mut survivors = Vec::with_capacity(articles.len());
    let error_count = AtomicU64::new(0);
    let counting_ai = ErrorCountingAiProvider { inner: ai, errors: &error_count, metrics, activity: "validate" };

    for article in articles {
        let key = activity_key(
            "validate",
            &sha256_hex16(&format!(
                "{}{}",
                article.title,
                article.content.chars().take(1000).collect::<String>()
            )),
        );

        let (computed, was_hit): (Computed<ValidationResult>, bool) = cached_or_compute(
            cache,
            &key,
            config.cache_ttl.spam,
            metrics,
            "validate",
            || async {
                let (value, ai_called) = validator::validate(&article, &config.content, &counting_ai).await;
                Computed { value, ai_called }
            },
        )
        .await;

        if was_hit {
            stats.cache_hits += 1;
        } else if computed.ai_called {
            stats.ai_calls += 1;
        }

        if computed.value.passes() {
            survivors.push(article);
        } else {
            metrics
                .articles_rejected_total
                .with_label_values(&[rejection_reason(&computed.value)])
                .inc();
        }
    }

    stats.errors_count = error_count.load(Ordering::Relaxed);
    (survivors, stats.finish())
}

/// §4.5.2 / §4.7 "normalize" activity. Not cached: the transform is
/// deterministic and cheap, so memoizing it would only add bookkeeping.
pub fn normalize_articles_batch(articles: Vec<Article>, config: &PipelineConfig) -> (Vec<Article>, BatchStats) {
    let stats = BatchStats::start();
    let normalized = articles
        .iter()
        .map(|a| normalizer::normalize(a, &config.content))
        .collect();
    (normalized, stats.finish())
}

/// §4.5.3 / §4.7 "quality" activity. Annotates `metadata["quality_score"]`
/// and `metadata["quality_breakdown"]`.
pub async fn score_quality_batch(
    articles: Vec<Article>,
    config: &PipelineConfig,
    cache: &dyn Cache,
    ai: &dyn AiProvider,
    metrics: &MetricsCollector,
) -> (Vec<Article>, BatchStats) {
    let mut stats = BatchStats::start();
    let mut out = Vec::with_capacity(articles.len());
    let error_count = AtomicU64::new(0);
    let counting_ai = ErrorCountingAiProvider { inner: ai, errors: &error_count, metrics, activity: "quality" };

    for article in articles {
        let key = activity_key("quality", &sha256_hex16(&article.url));

        let (computed, was_hit): (Computed<ContentQualityResult>, bool) = cached_or_compute(
            cache,
            &key,
            config.cache_ttl.quality,
            metrics,
            "quality",
            || async {
                let (value, ai_called) = quality::score_quality(&article, &config.content, &counting_ai).await;
                Computed { value, ai_called }
            },
        )
        .await;

        if was_hit {
            stats.cache_hits += 1;
        } else if computed.ai_called {
            stats.ai_calls += 1;
        }

        out.push(article.with_metadata(serde_json::Map::from_iter([
            ("quality_score".to_string(), serde_json::json!(computed.value.quality_score)),
            (
                "quality_breakdown".to_string(),
                serde_json::json!({
                    "metadata_score": computed.value.metadata_score,
                    "ai_content_score": computed.value.ai_content_score,
                    "breakdown": computed.value.breakdown,
                }),
            ),
        ])));
    }

    stats.errors_count = error_count.load(Ordering::Relaxed);
    (out, stats.finish())
}

/// §4.5.4 / §4.7 "topics" activity. Annotates `article.ai_topics`.
pub async fn extract_topics_batch(
    articles: Vec<Article>,
    config: &PipelineConfig,
    cache: &dyn Cache,
    ai: &dyn AiProvider,
    metrics: &MetricsCollector,
) -> (Vec<Article>, BatchStats) {
    let mut stats = BatchStats::start();
    let mut out = Vec::with_capacity(articles.len());
    let error_count = AtomicU64::new(0);
    let counting_ai = ErrorCountingAiProvider { inner: ai, errors: &error_count, metrics, activity: "topics" };

    for article in articles {
        let key = activity_key("topics", &sha256_hex16(&article.url));

        let (computed, was_hit): (Computed<Vec<String>>, bool) = cached_or_compute(
            cache,
            &key,
            config.cache_ttl.topics,
            metrics,
            "topics",
            || async {
                let (value, ai_called) = topics::extract_topics(&article, &config.topics, &counting_ai).await;
                Computed { value, ai_called }
            },
        )
        .await;

        if was_hit {
            stats.cache_hits += 1;
        } else if computed.ai_called {
            stats.ai_calls += 1;
        }

        out.push(article.with_topics(computed.value));
    }

    stats.errors_count = error_count.load(Ordering::Relaxed);
    (out, stats.finish())
}

/// §4.5.5 / §4.7 "relevance" activity. Consumes `quality_score`. Writes
/// `relevance_score` into `article.metadata` so the similarity and
/// assembler stages can read it without the side-table (§4.8 elaboration).
pub async fn score_relevance_batch(
    articles: Vec<Article>,
    profile: &InterestProfile,
    config: &PipelineConfig,
    now: DateTime<Utc>,
    cache: &dyn Cache,
    ai: &dyn AiProvider,
    metrics: &MetricsCollector,
) -> (Vec<(Article, RelevanceResult)>, BatchStats) {
    let mut stats = BatchStats::start();
    let mut out = Vec::with_capacity(articles.len());
    let fingerprint = profile.fingerprint();
    let error_count = AtomicU64::new(0);
    let counting_ai = ErrorCountingAiProvider { inner: ai, errors: &error_count, metrics, activity: "relevance" };

    for article in articles {
        let key = activity_key(
            "relevance",
            &sha256_hex16(&format!("{fingerprint}{}", article.url)),
        );

        let (computed, was_hit): (Computed<RelevanceResult>, bool) = cached_or_compute(
            cache,
            &key,
            config.cache_ttl.relevance,
            metrics,
            "relevance",
            || async {
                let (value, ai_called) = relevance::score_relevance(
                    &article,
                    profile,
                    &config.personalization,
                    now,
                    &counting_ai,
                )
                .await;
                Computed { value, ai_called }
            },
        )
        .await;

        if was_hit {
            stats.cache_hits += 1;
        } else if computed.ai_called {
            stats.ai_calls += 1;
        }

        let annotated = article.with_metadata(serde_json::Map::from_iter([
            ("relevance_score".to_string(), serde_json::json!(computed.value.relevance_score)),
            (
                "relevance_passes_threshold".to_string(),
                serde_json::json!(computed.value.passes_threshold),
            ),
        ]));
        out.push((annotated, computed.value));
    }

    stats.errors_count = error_count.load(Ordering::Relaxed);
    (out, stats.finish())
}

/// §4.5.6 / §4.7 "summarizer" activity. Annotates `article.summary`.
pub async fn summarize_articles_batch(
    articles: Vec<Article>,
    config: &PipelineConfig,
    cache: &dyn Cache,
    ai: &dyn AiProvider,
    metrics: &MetricsCollector,
) -> (Vec<Article>, BatchStats) {
    let mut stats = BatchStats::start();
    let mut out = Vec::with_capacity(articles.len());
    let style_tag = style_tag(config.summary.style);
    let error_count = AtomicU64::new(0);
    let counting_ai = ErrorCountingAiProvider { inner: ai, errors: &error_count, metrics, activity: "summarizer" };

    for article in articles {
        let key = activity_key(
            "summarizer",
            &sha256_hex16(&format!("{}{}", article.url, style_tag)),
        );

        let (computed, was_hit): (Computed<SummaryResult>, bool) = cached_or_compute(
            cache,
            &key,
            config.cache_ttl.summarizer,
            metrics,
            "summarizer",
            || async {
                let (value, ai_called) = summarizer::summarize(&article, &config.summary, &counting_ai).await;
                Computed { value, ai_called }
            },
        )
        .await;

        if was_hit {
            stats.cache_hits += 1;
        } else if computed.ai_called {
            stats.ai_calls += 1;
        }

        out.push(article.with_summary(computed.value.summary));
    }

    stats.errors_count = error_count.load(Ordering::Relaxed);
    (out, stats.finish())
}

fn style_tag(style: crate::config::SummaryStyle) -> &'static str {
    match style {
        crate::config::SummaryStyle::Brief => "brief",
        crate::config::SummaryStyle::Detailed => "detailed",
        crate::config::SummaryStyle::BulletPoints => "bullet_points",
    }
}

/// §4.5.7 / §4.7 "similarity" activity. Pairwise comparisons are cached by
/// the order-independent URL-pair key; iteration order is the sorted-pair
/// order `similarity::group_similar` already guarantees.
pub async fn detect_similar_articles_batch(
    articles: Vec<Article>,
    config: &PipelineConfig,
    cache: &dyn Cache,
    ai: &dyn AiProvider,
    metrics: &MetricsCollector,
) -> (Vec<ArticleGroup>, BatchStats) {
    let mut stats = BatchStats::start();
    let calls = AtomicU64::new(0);
    let hits = AtomicU64::new(0);
    let errors = AtomicU64::new(0);
    let next_pair = AtomicUsize::new(0);

    // Precomputed in the same sorted-url-pair order `group_similar` iterates
    // (§4.5.7), so each `run_structured` call below can be matched to its
    // pair's order-independent cache key without re-deriving it from the
    // AI prompt text.
    let pair_keys = similarity::pair_keys(&articles);

    let cached_ai = CachingAiProvider {
        inner: ai,
        cache,
        config,
        metrics,
        calls: &calls,
        hits: &hits,
        errors: &errors,
        pair_keys: &pair_keys,
        next_pair: &next_pair,
    };

    // `group_similar`'s own counter tallies every comparison attempted,
    // cached or not; the wrapper's counters below are the cache-aware
    // truth `BatchStats` needs for the "replay makes zero AI calls" property.
    let (groups, _attempted_pairs) = similarity::group_similar(&articles, &config.similarity, &cached_ai).await;
    stats.ai_calls = calls.load(Ordering::Relaxed);
    stats.cache_hits = hits.load(Ordering::Relaxed);
    stats.errors_count = errors.load(Ordering::Relaxed);
    (groups, stats.finish())
}

/// Wraps an `AiProvider` so the similarity processor's pairwise comparisons
/// go through the content-addressed cache without the processor itself
/// needing to know about caching (it only knows pair ordering, §4.5.7).
/// `pair_keys[n]` is the order-independent `sha256(min(url1,url2)+max(url1,url2))`
/// key (§4.7) for the n-th pair `group_similar` compares; `next_pair` tracks
/// which call this is, since `group_similar` makes exactly one
/// `run_structured` call per pair, in `pair_keys`' order.
struct CachingAiProvider<'a> {
    inner: &'a dyn AiProvider,
    cache: &'a dyn Cache,
    config: &'a PipelineConfig,
    metrics: &'a MetricsCollector,
    calls: &'a AtomicU64,
    hits: &'a AtomicU64,
    errors: &'a AtomicU64,
    pair_keys: &'a [String],
    next_pair: &'a AtomicUsize,
}

#[async_trait::async_trait]
impl<'a> AiProvider for CachingAiProvider<'a> {
    async fn run_structured(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        output_schema: &serde_json::Value,
        timeout: std::time::Duration,
    ) -> Result<serde_json::Value, crate::pipeline::ai::AiError> {
        let pair_index = self.next_pair.fetch_add(1, Ordering::Relaxed);
        let key = activity_key("similarity", &self.pair_keys[pair_index]);

        if let Some(cached) = get_json::<serde_json::Value>(self.cache, &key).await {
            self.metrics.cache_hits_total.with_label_values(&["similarity"]).inc();
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.metrics.cache_misses_total.with_label_values(&["similarity"]).inc();

        let started = std::time::Instant::now();
        let outcome = self
            .inner
            .run_structured(system_prompt, user_prompt, output_schema, timeout)
            .await;
        self.metrics
            .ai_call_duration_seconds
            .with_label_values(&["similarity"])
            .observe(started.elapsed().as_secs_f64());
        let value = match outcome {
            Ok(v) => v,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .ai_errors_total
                    .with_label_values(&["similarity", if e.retryable { "true" } else { "false" }])
                    .inc();
                return Err(e);
            }
        };
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.metrics.ai_calls_total.with_label_values(&["similarity"]).inc();
        set_json(self.cache, &key, &value, self.config.cache_ttl.similarity).await;
        Ok(value)
    }
}

/// Rolls per-activity `BatchStats` into the run-wide error tally surfaced
/// on `DigestPayload.metadata.activity_errors` (§7).
pub fn merge_activity_errors(into: &mut BTreeMap<String, u64>, activity: &str, stats: &BatchStats) {
    if stats.errors_count > 0 {
        *into.entry(activity.to_string()).or_insert(0) += stats.errors_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::ai::StaticAiProvider;
    use crate::pipeline::cache::MemoCache;
    use chrono::Utc;

    fn article(url: &str, content_len: usize) -> Article {
        Article::new(
            url.into(),
            "Title".into(),
            "x".repeat(content_len),
            None,
            vec![],
            Some(Utc::now()),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn validate_activity_filters_and_is_idempotent_on_replay() {
        let cache = MemoCache::default();
        let metrics = MetricsCollector::new().unwrap();
        let config = PipelineConfig::default();
        let ai = StaticAiProvider {
            value: serde_json::json!({"is_spam": false, "confidence": 0.0, "reasoning": ""}),
        };

        let articles = vec![article("https://a.com/1", 200), article("https://a.com/2", 10)];

        let (survivors, stats1) =
            validate_and_filter_batch(articles.clone(), &config, &cache, &ai, &metrics).await;
        assert_eq!(survivors.len(), 1);
        assert!(stats1.ai_calls > 0);

        let (survivors2, stats2) =
            validate_and_filter_batch(articles, &config, &cache, &ai, &metrics).await;
        assert_eq!(survivors2.len(), 1);
        assert_eq!(stats2.ai_calls, 0, "replay with warm cache must not call the ai provider again");
        assert_eq!(stats2.cache_hits, 2);
    }

    #[tokio::test]
    async fn quality_activity_annotates_metadata_and_caches() {
        let cache = MemoCache::default();
        let metrics = MetricsCollector::new().unwrap();
        let config = PipelineConfig::default();
        let ai = StaticAiProvider {
            value: serde_json::json!({"writing_quality": 10, "informativeness": 10, "credibility": 5, "reasoning": "ok"}),
        };

        let articles = vec![article("https://a.com/1", 1200)];
        let (out, stats1) = score_quality_batch(articles.clone(), &config, &cache, &ai, &metrics).await;
        assert!(out[0].metadata.contains_key("quality_score"));
        assert_eq!(stats1.cache_hits, 0);

        let (_, stats2) = score_quality_batch(articles, &config, &cache, &ai, &metrics).await;
        assert_eq!(stats2.cache_hits, 1);
        assert_eq!(stats2.ai_calls, 0);
    }

    #[tokio::test]
    async fn relevance_activity_writes_relevance_score_into_metadata() {
        let cache = MemoCache::default();
        let metrics = MetricsCollector::new().unwrap();
        let config = PipelineConfig::default();
        let profile = InterestProfile::new(vec!["ai".into()], 40, 1.0, crate::config::SummaryStyle::Brief);
        let ai = StaticAiProvider {
            value: serde_json::json!({"semantic_score": 10, "matched_interests": [], "reasoning": "x"}),
        };

        let mut a = article("https://a.com/1", 200);
        a.title = "ai news".into();
        let (out, _) = score_relevance_batch(vec![a], &profile, &config, Utc::now(), &cache, &ai, &metrics).await;
        assert!(out[0].0.metadata.contains_key("relevance_score"));
    }

    #[tokio::test]
    async fn similarity_activity_caches_pairwise_comparisons() {
        let cache = MemoCache::default();
        let metrics = MetricsCollector::new().unwrap();
        let config = PipelineConfig::default();
        let ai = StaticAiProvider {
            value: serde_json::json!({"similarity_score": 0.9}),
        };

        let articles = vec![article("https://a.com/1", 200), article("https://a.com/2", 200)];
        let (groups1, stats1) = detect_similar_articles_batch(articles.clone(), &config, &cache, &ai, &metrics).await;
        assert_eq!(groups1.len(), 1);
        assert_eq!(stats1.ai_calls, 1);

        let (groups2, _) = detect_similar_articles_batch(articles, &config, &cache, &ai, &metrics).await;
        assert_eq!(groups2.len(), 1);
    }
}
