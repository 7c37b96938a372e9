//! §4.5.3 Quality scorer: a metadata-derived score (0-50) plus an AI-derived
//! writing-quality score (0-50), summed into a 0-100 `quality_score`.
//!
//! Whether `published_at` was present in the source feed is no longer
//! directly observable once the normalizer has filled the gap with
//! `fetch_timestamp`; this scorer treats `published_at == fetch_timestamp`
//! as the absent case, the same signal the normalizer used to fill it.

use crate::config::ContentConfig;
use crate::pipeline::ai::AiProvider;
use crate::pipeline::article::{Article, ContentQualityResult};
use crate::recovery::with_graceful_degradation;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Deserialize, Default)]
struct AiQualityVerdict {
    writing_quality: f64,
    informativeness: f64,
    credibility: f64,
    reasoning: Option<String>,
}

pub async fn score_quality(
    article: &Article,
    config: &ContentConfig,
    ai: &dyn AiProvider,
) -> (ContentQualityResult, bool) {
    let mut metadata_score = 0.0;
    if article.author.is_some() {
        metadata_score += 10.0;
    }
    if article.published_at != article.fetch_timestamp {
        metadata_score += 10.0;
    }
    if !article.tags.is_empty() {
        metadata_score += 5.0;
    }
    if article.content.len() > 500 {
        metadata_score += 15.0;
    }
    if article.content.len() > 1000 {
        metadata_score += 10.0;
    }
    metadata_score = metadata_score.min(50.0);

    if !config.quality_scoring_enabled {
        let rescaled = (metadata_score * 2.0).min(100.0);
        return (
            ContentQualityResult {
                quality_score: rescaled,
                metadata_score,
                ai_content_score: 0.0,
                breakdown: json!({"ai_disabled": true}),
            },
            false,
        );
    }

    let verdict = with_graceful_degradation(
        || score_with_ai(article, ai),
        None,
        "quality_ai_score",
    )
    .await;

    match verdict {
        Some(v) => {
            let ai_content_score = (v.writing_quality + v.informativeness + v.credibility).min(50.0);
            (
                ContentQualityResult {
                    quality_score: (metadata_score + ai_content_score).min(100.0),
                    metadata_score,
                    ai_content_score,
                    breakdown: json!({
                        "writing_quality": v.writing_quality,
                        "informativeness": v.informativeness,
                        "credibility": v.credibility,
                        "reasoning": v.reasoning,
                    }),
                },
                true,
            )
        }
        None => {
            let rescaled = (metadata_score * 2.0).min(100.0);
            (
                ContentQualityResult {
                    quality_score: rescaled,
                    metadata_score,
                    ai_content_score: 0.0,
                    breakdown: json!({"ai_error": true}),
                },
                true,
            )
        }
    }
}

async fn score_with_ai(
    article: &Article,
    ai: &dyn AiProvider,
) -> crate::error::Result<Option<AiQualityVerdict>> {
    let schema = json!({
        "type": "object",
        "properties": {
            "writing_quality": {"type": "number"},
            "informativeness": {"type": "number"},
            "credibility": {"type": "number"},
            "reasoning": {"type": "string"}
        },
        "required": ["writing_quality", "informativeness", "credibility", "reasoning"]
    });

    let system = "Rate the writing quality (0-20), informativeness (0-20), and credibility (0-10) \
        of this article. Respond only with the requested JSON.";
    let user = format!("Title: {}\n\nContent:\n{}", article.title, article.content);

    let verdict: AiQualityVerdict =
        crate::pipeline::ai::run_structured(ai, system, &user, schema, Duration::from_secs(30))
            .await?;
    Ok(Some(verdict))
}
