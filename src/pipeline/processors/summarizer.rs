//! §4.5.6 Summarizer: one style-aware AI call per article, with two distinct
//! fallback rules depending on why the summary never arrived.

use crate::config::{SummaryConfig, SummaryStyle};
use crate::pipeline::ai::AiProvider;
use crate::pipeline::article::{Article, SummaryResult};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const SHORT_CONTENT_CHARS: usize = 100;

#[derive(Deserialize, Default)]
struct SummaryVerdict {
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
    reasoning: Option<String>,
}

/// Returns the summary result and whether the AI call was made.
pub async fn summarize(
    article: &Article,
    config: &SummaryConfig,
    ai: &dyn AiProvider,
) -> (SummaryResult, bool) {
    if article.content.trim().chars().count() < SHORT_CONTENT_CHARS {
        return (
            SummaryResult {
                summary: article.content.trim().to_string(),
                key_points: vec![],
                reasoning: Some("content too short to summarize; used verbatim excerpt".to_string()),
            },
            false,
        );
    }

    match summarize_with_ai(article, config, ai).await {
        Ok(verdict) => {
            let summary = enforce_max_words(&verdict.summary, config.max_length_words);
            (
                SummaryResult {
                    summary,
                    key_points: verdict.key_points,
                    reasoning: verdict.reasoning,
                },
                true,
            )
        }
        Err(_) => {
            let excerpt: String = article.content.chars().take(300).collect();
            (
                SummaryResult {
                    summary: format!("{excerpt}..."),
                    key_points: vec![],
                    reasoning: Some("ai_error".to_string()),
                },
                true,
            )
        }
    }
}

async fn summarize_with_ai(
    article: &Article,
    config: &SummaryConfig,
    ai: &dyn AiProvider,
) -> crate::error::Result<SummaryVerdict> {
    let schema = json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "key_points": {"type": "array", "items": {"type": "string"}},
            "reasoning": {"type": "string"}
        },
        "required": ["summary", "key_points", "reasoning"]
    });

    let system = style_prompt(config.style, config.max_length_words);
    let content: String = article.content.chars().take(config.content_length).collect();
    let user = format!("Title: {}\n\nContent:\n{}", article.title, content);

    crate::pipeline::ai::run_structured(ai, &system, &user, schema, Duration::from_secs(45))
        .await
        .map_err(Into::into)
}

fn style_prompt(style: SummaryStyle, max_words: usize) -> String {
    match style {
        SummaryStyle::Brief => format!(
            "Summarize this article in at most {max_words} words, in 1-2 plain sentences. \
             Respond only with the requested JSON."
        ),
        SummaryStyle::Detailed => format!(
            "Write a thorough summary of this article, at most {max_words} words, covering \
             its main claims and supporting detail. Respond only with the requested JSON."
        ),
        SummaryStyle::BulletPoints => format!(
            "Summarize this article as a short paragraph (at most {max_words} words) plus a \
             list of its key points. Respond only with the requested JSON."
        ),
    }
}

fn enforce_max_words(summary: &str, max_words: usize) -> String {
    let words: Vec<&str> = summary.split_whitespace().collect();
    if words.len() <= max_words {
        summary.to_string()
    } else {
        words[..max_words].join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ai::{FailingAiProvider, StaticAiProvider};
    use chrono::Utc;

    fn article(content: &str) -> Article {
        Article::new(
            "https://example.com/a".into(),
            "Title".into(),
            content.into(),
            None,
            vec![],
            None,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn short_content_uses_verbatim_excerpt() {
        let (result, ai_called) = summarize(
            &article("too short"),
            &SummaryConfig::default(),
            &StaticAiProvider { value: json!({"summary": "x", "key_points": [], "reasoning": "y"}) },
        )
        .await;
        assert_eq!(result.summary, "too short");
        assert!(!ai_called);
    }

    #[tokio::test]
    async fn ai_error_falls_back_to_first_300_chars() {
        let content = "word ".repeat(200);
        let (result, ai_called) =
            summarize(&article(&content), &SummaryConfig::default(), &FailingAiProvider).await;
        assert!(result.summary.ends_with("..."));
        assert_eq!(result.reasoning.as_deref(), Some("ai_error"));
        assert!(ai_called);
    }

    #[tokio::test]
    async fn summary_is_truncated_to_max_words() {
        let content = "word ".repeat(200);
        let long_summary: String = (0..50).map(|i| format!("w{i} ")).collect();
        let (result, _) = summarize(
            &article(&content),
            &SummaryConfig { max_length_words: 5, ..SummaryConfig::default() },
            &StaticAiProvider {
                value: json!({"summary": long_summary, "key_points": [], "reasoning": "ok"}),
            },
        )
        .await;
        assert_eq!(result.summary.split_whitespace().count(), 5);
    }
}
