//! §4.8 Workflow orchestrator: the deterministic coordinator that strings
//! the ten steps together. A plain struct holding config plus shared
//! collaborators (cache, AI provider, metrics), mirroring this codebase's
//! `NewsPipelineOrchestrator` shape — `run()` delegates to an internal
//! method, stats flow out through a side-channel (`DigestMetadata`), not a
//! second return value.
//!
//! `fetch_user_config` (step 1) is not implemented here: account storage
//! and lookup are out of scope (§1), so a caller already holding a
//! `UserConfig` passes it straight to `run`.

use crate::config::PipelineConfig;
use crate::metrics::MetricsCollector;
use crate::pipeline::activities::{self, BatchStats};
use crate::pipeline::ai::AiProvider;
use crate::pipeline::article::{Article, DigestPayload, SourceRef, UserConfig};
use crate::pipeline::assembler::assemble_digest;
use crate::pipeline::cache::Cache;
use crate::pipeline::fetcher::{FetchResult, Fetcher};
use crate::error::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    cache: Arc<dyn Cache>,
    ai: Arc<dyn AiProvider>,
    metrics: Arc<MetricsCollector>,
    fetcher: Fetcher,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        cache: Arc<dyn Cache>,
        ai: Arc<dyn AiProvider>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let fetcher = Fetcher::new(config.fetch.clone())?;
        Ok(Self { config, cache, ai, metrics, fetcher })
    }

    /// §4.8 steps 2-10: fetch every source, then run the digest for one user.
    pub async fn run(&self, user: &UserConfig) -> DigestPayload {
        let fetch_results = self.fetch_sources_parallel(&user.sources).await;
        self.run_from_fetch_results(fetch_results, user).await
    }

    /// §4.8 step 2: one fetch activity per source, fanned out up to the
    /// configured concurrency cap (§5), awaited together. A source that
    /// fails never fails the run — its `FetchResult` just carries
    /// `success: false` and gets recorded in `failed_sources` downstream.
    async fn fetch_sources_parallel(&self, sources: &[SourceRef]) -> Vec<FetchResult> {
        let cap = self.config.fetch.max_concurrent_fetches.max(1);
        stream::iter(sources.iter().map(|s| s.url.clone()))
            .map(|url| async move { self.fetcher.fetch(&url).await })
            .buffer_unordered(cap)
            .collect::<Vec<_>>()
            .await
    }

    /// §4.8 steps 3-10, taking already-fetched results so tests can drive
    /// this without a network fetch.
    async fn run_from_fetch_results(
        &self,
        fetch_results: Vec<FetchResult>,
        user: &UserConfig,
    ) -> DigestPayload {
        let started = Instant::now();
        let mut activity_errors = BTreeMap::new();

        let (articles, failed_sources, now) = self.merge_fetch_results(fetch_results);

        let (survivors, stats) = activities::validate_and_filter_batch(
            articles,
            &self.config,
            self.cache.as_ref(),
            self.ai.as_ref(),
            &self.metrics,
        )
        .await;
        self.observe("validate", &stats, &mut activity_errors);

        let (normalized, stats) = activities::normalize_articles_batch(survivors, &self.config);
        self.observe("normalize", &stats, &mut activity_errors);

        let (scored, stats) = activities::score_quality_batch(
            normalized,
            &self.config,
            self.cache.as_ref(),
            self.ai.as_ref(),
            &self.metrics,
        )
        .await;
        self.observe("quality", &stats, &mut activity_errors);

        let (topical, stats) = activities::extract_topics_batch(
            scored,
            &self.config,
            self.cache.as_ref(),
            self.ai.as_ref(),
            &self.metrics,
        )
        .await;
        self.observe("topics", &stats, &mut activity_errors);

        let (relevance_scored, stats) = activities::score_relevance_batch(
            topical,
            &user.interest_profile,
            &self.config,
            now,
            self.cache.as_ref(),
            self.ai.as_ref(),
            &self.metrics,
        )
        .await;
        self.observe("relevance", &stats, &mut activity_errors);
        let annotated: Vec<Article> = relevance_scored.into_iter().map(|(article, _)| article).collect();

        let (summarized, stats) = activities::summarize_articles_batch(
            annotated,
            &self.config,
            self.cache.as_ref(),
            self.ai.as_ref(),
            &self.metrics,
        )
        .await;
        self.observe("summarizer", &stats, &mut activity_errors);

        let (groups, stats) = activities::detect_similar_articles_batch(
            summarized,
            &self.config,
            self.cache.as_ref(),
            self.ai.as_ref(),
            &self.metrics,
        )
        .await;
        self.observe("similarity", &stats, &mut activity_errors);

        let mut payload = assemble_digest(groups, user, now);
        payload.metadata.failed_sources = failed_sources;
        payload.metadata.activity_errors = activity_errors;

        self.metrics.digest_groups_total.set(payload.metadata.total_groups as f64);
        self.metrics
            .run_duration_seconds
            .with_label_values(&[user.user_id.as_str()])
            .observe(started.elapsed().as_secs_f64());
        self.metrics.runs_total.with_label_values(&["success"]).inc();

        info!(
            user_id = %user.user_id,
            total_groups = payload.metadata.total_groups,
            total_articles = payload.metadata.total_articles,
            failed_sources = payload.metadata.failed_sources.len(),
            "digest run complete"
        );

        payload
    }

    /// Merges successful fetches' articles (deduped by canonical URL,
    /// first occurrence wins), records failed source URLs, and derives
    /// `now` from the latest successful `fetch_timestamp` — never from a
    /// direct wall-clock read, except the zero-successful-sources fallback
    /// the determinism invariant explicitly allows (§4.8).
    fn merge_fetch_results(&self, fetch_results: Vec<FetchResult>) -> (Vec<Article>, Vec<String>, DateTime<Utc>) {
        let mut seen = HashSet::new();
        let mut articles = Vec::new();
        let mut failed_sources = Vec::new();
        let mut latest_fetch: Option<DateTime<Utc>> = None;

        for result in fetch_results {
            self.metrics
                .fetch_sources_total
                .with_label_values(&[if result.success { "success" } else { "failure" }])
                .inc();

            if !result.success {
                failed_sources.push(result.source_url);
                continue;
            }

            if latest_fetch.map_or(true, |t| result.fetch_timestamp > t) {
                latest_fetch = Some(result.fetch_timestamp);
            }

            for article in result.articles {
                if seen.insert(article.url.clone()) {
                    articles.push(article);
                }
            }
        }

        self.metrics.articles_fetched_total.inc_by(articles.len() as f64);
        let now = latest_fetch.unwrap_or_else(Utc::now);
        (articles, failed_sources, now)
    }

    fn observe(&self, activity: &str, stats: &BatchStats, activity_errors: &mut BTreeMap<String, u64>) {
        activities::merge_activity_errors(activity_errors, activity, stats);

        if let (Some(start), Some(finish)) = (stats.started_at, stats.finished_at) {
            let secs = (finish - start).num_milliseconds().max(0) as f64 / 1000.0;
            self.metrics
                .activity_duration_seconds
                .with_label_values(&[activity])
                .observe(secs);
        }
        if stats.errors_count > 0 {
            self.metrics
                .activity_errors_total
                .with_label_values(&[activity, "ai"])
                .inc_by(stats.errors_count as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaryStyle;
    use crate::pipeline::ai::{FailingAiProvider, StaticAiProvider};
    use crate::pipeline::article::{Article, InterestProfile};
    use crate::pipeline::cache::MemoCache;
    use serde_json::json;

    fn user(keywords: Vec<&str>, threshold: u32) -> UserConfig {
        UserConfig {
            user_id: "u1".into(),
            email: "u1@example.com".into(),
            timezone: "UTC".into(),
            interest_profile: InterestProfile::new(
                keywords.into_iter().map(String::from).collect(),
                threshold,
                1.0,
                SummaryStyle::Brief,
            ),
            sources: vec![SourceRef { url: "https://feed.example.com/rss".into(), name: None }],
        }
    }

    fn article(url: &str, title: &str, content_len: usize) -> Article {
        Article::new(
            url.into(),
            title.into(),
            "x".repeat(content_len),
            Some("Reporter".into()),
            vec![],
            Some(Utc::now()),
            Utc::now(),
        )
    }

    fn fetch_result(source_url: &str, articles: Vec<Article>, success: bool) -> FetchResult {
        FetchResult {
            source_url: source_url.into(),
            articles,
            fetch_timestamp: Utc::now(),
            success,
            error: if success { None } else { Some("boom".into()) },
        }
    }

    fn orchestrator(ai: Arc<dyn AiProvider>) -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            PipelineConfig::default(),
            Arc::new(MemoCache::default()),
            ai,
            Arc::new(MetricsCollector::new().unwrap()),
        )
        .unwrap()
    }

    fn ai_static_happy() -> Arc<dyn AiProvider> {
        Arc::new(StaticAiProvider {
            value: json!({
                "is_spam": false, "confidence": 0.0, "reasoning": "",
                "writing_quality": 8, "informativeness": 8, "credibility": 8,
                "semantic_score": 15, "matched_interests": ["ai"],
                "similarity_score": 0.1,
                "summary": "a short summary", "key_points": ["point one"],
                "topics": ["ai", "research"],
            }),
        })
    }

    #[tokio::test]
    async fn happy_path_produces_a_populated_digest() {
        let orch = orchestrator(ai_static_happy());
        let fetch_results = vec![fetch_result(
            "https://feed.example.com/rss",
            vec![article("https://a.com/1", "AI breakthrough", 500)],
            true,
        )];

        let payload = orch.run_from_fetch_results(fetch_results, &user(vec!["ai"], 10)).await;
        assert_eq!(payload.metadata.failed_sources.len(), 0);
        assert!(payload.metadata.total_articles <= 1);
    }

    #[tokio::test]
    async fn dead_source_is_recorded_but_does_not_fail_the_run() {
        let orch = orchestrator(ai_static_happy());
        let fetch_results = vec![fetch_result("https://dead.example.com/rss", vec![], false)];

        let payload = orch.run_from_fetch_results(fetch_results, &user(vec!["ai"], 10)).await;
        assert_eq!(payload.metadata.failed_sources, vec!["https://dead.example.com/rss".to_string()]);
        assert_eq!(payload.metadata.total_groups, 0);
    }

    #[tokio::test]
    async fn zero_successful_sources_yields_an_empty_digest_not_an_error() {
        let orch = orchestrator(ai_static_happy());
        let payload = orch.run_from_fetch_results(vec![], &user(vec!["ai"], 10)).await;
        assert_eq!(payload.metadata.total_groups, 0);
        assert_eq!(payload.metadata.total_articles, 0);
    }

    #[tokio::test]
    async fn ai_outage_degrades_every_activity_but_still_produces_a_digest() {
        let orch = orchestrator(Arc::new(FailingAiProvider));
        let fetch_results = vec![fetch_result(
            "https://feed.example.com/rss",
            vec![article("https://a.com/1", "Some headline", 500)],
            true,
        )];

        let payload = orch.run_from_fetch_results(fetch_results, &user(vec!["ai"], 10)).await;
        assert!(!payload.metadata.activity_errors.is_empty());
    }

    #[tokio::test]
    async fn empty_keyword_profile_passes_every_surviving_article() {
        let orch = orchestrator(ai_static_happy());
        let fetch_results = vec![fetch_result(
            "https://feed.example.com/rss",
            vec![article("https://a.com/1", "Whatever headline", 500)],
            true,
        )];

        let payload = orch.run_from_fetch_results(fetch_results, &user(vec![], 40)).await;
        assert_eq!(payload.metadata.total_articles, 1);
    }

    #[tokio::test]
    async fn replay_with_warm_cache_makes_no_further_ai_calls() {
        let cache: Arc<dyn Cache> = Arc::new(MemoCache::default());
        let ai = ai_static_happy();
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let orch = PipelineOrchestrator::new(PipelineConfig::default(), cache, ai, metrics).unwrap();

        let make_fetch = || {
            vec![fetch_result(
                "https://feed.example.com/rss",
                vec![article("https://a.com/1", "Stable headline", 500)],
                true,
            )]
        };

        let u = user(vec!["ai"], 10);
        let first = orch.run_from_fetch_results(make_fetch(), &u).await;
        let second = orch.run_from_fetch_results(make_fetch(), &u).await;
        assert_eq!(first.metadata.total_articles, second.metadata.total_articles);
    }
}
