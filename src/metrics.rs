//! Prometheus metrics for the digest pipeline.
//!
//! No HTTP surface is exposed here — scraping/exposition is the surrounding
//! service's job — but the pipeline still reports structured counters and
//! histograms the way any of this codebase's services would, via a
//! `Registry` that the caller can gather and encode however it sees fit.

use prometheus::{Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder, Encoder};
use std::sync::Arc;

/// Metrics collector for one pipeline process.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,

    pub runs_total: CounterVec,
    pub run_duration_seconds: HistogramVec,

    pub activity_duration_seconds: HistogramVec,
    pub activity_errors_total: CounterVec,

    pub ai_calls_total: CounterVec,
    pub ai_call_duration_seconds: HistogramVec,
    pub ai_errors_total: CounterVec,

    pub cache_hits_total: CounterVec,
    pub cache_misses_total: CounterVec,

    pub fetch_sources_total: CounterVec,
    pub articles_fetched_total: Counter,
    pub articles_rejected_total: CounterVec,

    pub digest_groups_total: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let runs_total = CounterVec::new(
            Opts::new("runs_total", "Total pipeline runs by outcome")
                .namespace("digest_pipeline"),
            &["outcome"],
        )?;

        let run_duration_seconds = HistogramVec::new(
            HistogramOpts::new("run_duration_seconds", "Total run duration")
                .namespace("digest_pipeline")
                .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0]),
            &["user_id"],
        )?;

        let activity_duration_seconds = HistogramVec::new(
            HistogramOpts::new("activity_duration_seconds", "Per-activity duration")
                .namespace("digest_pipeline")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]),
            &["activity"],
        )?;

        let activity_errors_total = CounterVec::new(
            Opts::new("activity_errors_total", "Per-article failures accumulated by an activity")
                .namespace("digest_pipeline"),
            &["activity", "error_kind"],
        )?;

        let ai_calls_total = CounterVec::new(
            Opts::new("ai_calls_total", "AI provider calls issued")
                .namespace("digest_pipeline"),
            &["activity"],
        )?;

        let ai_call_duration_seconds = HistogramVec::new(
            HistogramOpts::new("ai_call_duration_seconds", "AI provider call latency")
                .namespace("digest_pipeline")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["activity"],
        )?;

        let ai_errors_total = CounterVec::new(
            Opts::new("ai_errors_total", "AI provider errors by retryability")
                .namespace("digest_pipeline"),
            &["activity", "retryable"],
        )?;

        let cache_hits_total = CounterVec::new(
            Opts::new("cache_hits_total", "Cache hits by activity")
                .namespace("digest_pipeline"),
            &["activity"],
        )?;

        let cache_misses_total = CounterVec::new(
            Opts::new("cache_misses_total", "Cache misses by activity")
                .namespace("digest_pipeline"),
            &["activity"],
        )?;

        let fetch_sources_total = CounterVec::new(
            Opts::new("fetch_sources_total", "Per-source fetch outcomes")
                .namespace("digest_pipeline"),
            &["outcome"],
        )?;

        let articles_fetched_total = Counter::new(
            "digest_pipeline_articles_fetched_total",
            "Total articles fetched across all sources",
        )?;

        let articles_rejected_total = CounterVec::new(
            Opts::new("articles_rejected_total", "Articles rejected by reason")
                .namespace("digest_pipeline"),
            &["reason"],
        )?;

        let digest_groups_total = Gauge::new(
            "digest_pipeline_digest_groups_total",
            "Number of groups in the most recently assembled digest",
        )?;

        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(run_duration_seconds.clone()))?;
        registry.register(Box::new(activity_duration_seconds.clone()))?;
        registry.register(Box::new(activity_errors_total.clone()))?;
        registry.register(Box::new(ai_calls_total.clone()))?;
        registry.register(Box::new(ai_call_duration_seconds.clone()))?;
        registry.register(Box::new(ai_errors_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(fetch_sources_total.clone()))?;
        registry.register(Box::new(articles_fetched_total.clone()))?;
        registry.register(Box::new(articles_rejected_total.clone()))?;
        registry.register(Box::new(digest_groups_total.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            run_duration_seconds,
            activity_duration_seconds,
            activity_errors_total,
            ai_calls_total,
            ai_call_duration_seconds,
            ai_errors_total,
            cache_hits_total,
            cache_misses_total,
            fetch_sources_total,
            articles_fetched_total,
            articles_rejected_total,
            digest_groups_total,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf).unwrap_or_default();
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_renders() {
        let m = MetricsCollector::new().expect("metrics collector");
        m.runs_total.with_label_values(&["success"]).inc();
        m.cache_hits_total.with_label_values(&["quality"]).inc();
        let rendered = m.render();
        assert!(rendered.contains("digest_pipeline_runs_total"));
        assert!(rendered.contains("digest_pipeline_cache_hits_total"));
    }
}
