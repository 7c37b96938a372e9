//! §4.5.1 Validator: rejects empty/too-short/spam content before anything
//! downstream spends an AI call on it.

use crate::config::ContentConfig;
use crate::pipeline::ai::AiProvider;
use crate::pipeline::article::{Article, ValidationResult};
use crate::recovery::with_graceful_degradation;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Deserialize)]
struct SpamVerdict {
    is_spam: bool,
    confidence: f64,
    #[allow(dead_code)]
    reasoning: String,
}

/// Returns the validation result and whether an AI call was made.
pub async fn validate(
    article: &Article,
    config: &ContentConfig,
    ai: &dyn AiProvider,
) -> (ValidationResult, bool) {
    if article.content.trim().is_empty() {
        return (
            ValidationResult {
                is_empty: true,
                reason: Some("empty or whitespace-only content".to_string()),
                ..Default::default()
            },
            false,
        );
    }

    if article.content.len() < config.min_length {
        return (
            ValidationResult {
                is_too_short: true,
                reason: Some(format!(
                    "content length {} below minimum {}",
                    article.content.len(),
                    config.min_length
                )),
                ..Default::default()
            },
            false,
        );
    }

    if !config.spam_detection_enabled {
        return (ValidationResult::default(), false);
    }

    let verdict = with_graceful_degradation(
        || classify_spam(article, ai),
        SpamVerdict {
            is_spam: false,
            confidence: 0.0,
            reasoning: "ai_error".to_string(),
        },
        "spam_detection",
    )
    .await;

    let result = ValidationResult {
        is_spam: verdict.is_spam,
        confidence: verdict.confidence,
        reason: verdict.is_spam.then(|| verdict.reasoning.clone()),
        ..Default::default()
    };
    (result, true)
}

async fn classify_spam(
    article: &Article,
    ai: &dyn AiProvider,
) -> crate::error::Result<SpamVerdict> {
    let schema = json!({
        "type": "object",
        "properties": {
            "is_spam": {"type": "boolean"},
            "confidence": {"type": "number"},
            "reasoning": {"type": "string"}
        },
        "required": ["is_spam", "confidence", "reasoning"]
    });

    let system = "You classify whether an article's content is spam or promotional junk. \
        Respond only with the requested JSON.";
    let user = format!("Title: {}\n\nContent:\n{}", article.title, article.content);

    crate::pipeline::ai::run_structured(ai, system, &user, schema, Duration::from_secs(30))
        .await
        .map_err(Into::into)
}
