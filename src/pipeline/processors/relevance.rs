//! §4.5.5 Relevance scorer: three stages — a cheap keyword score that can
//! short-circuit the AI call, an AI semantic lift, and a temporal/quality
//! boost — combined and scaled by the user's boost factor.

use crate::config::PersonalizationConfig;
use crate::pipeline::ai::AiProvider;
use crate::pipeline::article::{Article, InterestProfile, RelevanceBreakdown, RelevanceResult};
use crate::recovery::with_graceful_degradation;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const CONTENT_SNIPPET_CHARS: usize = 800;
const KEYWORD_SNIPPET_CHARS: usize = 1000;

#[derive(Deserialize, Default)]
struct SemanticVerdict {
    semantic_score: f64,
    matched_interests: Vec<String>,
    reasoning: String,
}

/// Returns the relevance result and whether the semantic (stage 2) AI call was made.
pub async fn score_relevance(
    article: &Article,
    profile: &InterestProfile,
    config: &PersonalizationConfig,
    now: DateTime<Utc>,
    ai: &dyn AiProvider,
) -> (RelevanceResult, bool) {
    if profile.keywords.is_empty() {
        return (
            RelevanceResult {
                relevance_score: 0.0,
                breakdown: RelevanceBreakdown::default(),
                passes_threshold: true,
            },
            false,
        );
    }

    let (keyword_score, matched_keywords) = keyword_stage(article, profile, config);

    let skip_semantic = !config.enable_semantic_scoring
        || keyword_score >= 55.0
        || (keyword_score <= 15.0 && profile.boost_factor <= 1.0);

    let (semantic_score, matched_interests, semantic_reasoning, ai_called) = if skip_semantic {
        (0.0, vec![], None, false)
    } else {
        let verdict = with_graceful_degradation(
            || semantic_stage(article, profile, ai),
            SemanticVerdict {
                semantic_score: 0.0,
                matched_interests: vec![],
                reasoning: "ai_error".to_string(),
            },
            "relevance_semantic",
        )
        .await;
        (
            verdict.semantic_score.clamp(0.0, 30.0),
            verdict.matched_interests,
            Some(verdict.reasoning),
            true,
        )
    };

    let (freshness_boost, quality_boost) = temporal_and_quality_boost(article, now, &matched_keywords);

    let raw = (keyword_score + semantic_score + freshness_boost + quality_boost)
        .max(0.0)
        .min(100.0);
    let scaled = (raw * profile.boost_factor).clamp(0.0, 100.0);

    let result = RelevanceResult {
        relevance_score: scaled,
        breakdown: RelevanceBreakdown {
            keyword_score,
            semantic_score,
            temporal_boost: freshness_boost,
            quality_boost,
            matched_keywords: matched_keywords.into_iter().chain(matched_interests).collect(),
            semantic_reasoning,
        },
        passes_threshold: scaled >= profile.relevance_threshold as f64,
    };
    (result, ai_called)
}

fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

fn keyword_stage(
    article: &Article,
    profile: &InterestProfile,
    config: &PersonalizationConfig,
) -> (f64, Vec<String>) {
    let norm_title = normalize(&article.title);
    let norm_content = normalize(&article.content.chars().take(KEYWORD_SNIPPET_CHARS).collect::<String>());
    let tags_and_topics: String = article
        .tags
        .iter()
        .chain(article.ai_topics.iter().flatten())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    let norm_tags_topics = normalize(&tags_and_topics);

    let mut score = 0.0;
    let mut matched = Vec::new();

    for keyword in &profile.keywords {
        let mut hit = false;
        if norm_title.contains(keyword.as_str()) {
            score += config.kw_weight_title as f64;
            hit = true;
        }
        if norm_content.contains(keyword.as_str()) {
            score += config.kw_weight_content as f64;
            hit = true;
        }
        if norm_tags_topics.contains(keyword.as_str()) {
            score += config.kw_weight_tags as f64;
            hit = true;
        }
        if hit {
            matched.push(keyword.clone());
        }
    }

    (score.min(60.0), matched)
}

async fn semantic_stage(
    article: &Article,
    profile: &InterestProfile,
    ai: &dyn AiProvider,
) -> crate::error::Result<SemanticVerdict> {
    let schema = json!({
        "type": "object",
        "properties": {
            "semantic_score": {"type": "number"},
            "matched_interests": {"type": "array", "items": {"type": "string"}},
            "reasoning": {"type": "string"}
        },
        "required": ["semantic_score", "matched_interests", "reasoning"]
    });

    let snippet: String = article.content.chars().take(CONTENT_SNIPPET_CHARS).collect();
    let user = json!({
        "keywords": profile.keywords,
        "title": article.title,
        "content": snippet,
        "summary": article.summary,
        "ai_topics": article.ai_topics,
    })
    .to_string();

    let system = "Score 0-30 how semantically relevant this article is to the reader's stated \
        interests, beyond simple keyword overlap. Respond only with the requested JSON.";

    let verdict: SemanticVerdict =
        crate::pipeline::ai::run_structured(ai, system, &user, schema, Duration::from_secs(30))
            .await?;
    Ok(verdict)
}

/// Returns `(freshness_boost, quality_boost)` separately so the result
/// envelope's breakdown can report each independently (§3).
fn temporal_and_quality_boost(article: &Article, now: DateTime<Utc>, matched_keywords: &[String]) -> (f64, f64) {
    let age_hours = article.age_hours(now).max(0.0);
    let freshness_boost = if age_hours <= 24.0 {
        (5.0 * (1.0 - age_hours / 24.0)).clamp(0.0, 5.0)
    } else {
        0.0
    };

    let quality_boost = match article.quality_score() {
        Some(q) if q >= 80.0 && !matched_keywords.is_empty() => 5.0,
        _ => 0.0,
    };

    (freshness_boost, quality_boost)
}
