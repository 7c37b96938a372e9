//! §4.5.4 Topic extractor: one AI call producing 1-3-word topics, capped at
//! `max_topics`. Short articles skip the call entirely.

use crate::config::TopicsConfig;
use crate::pipeline::ai::AiProvider;
use crate::pipeline::article::Article;
use crate::recovery::with_graceful_degradation;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const MIN_MEANINGFUL_CHARS: usize = 50;

#[derive(Deserialize, Default)]
struct TopicsVerdict {
    topics: Vec<String>,
}

/// Returns the extracted topics and whether an AI call was made.
pub async fn extract_topics(
    article: &Article,
    config: &TopicsConfig,
    ai: &dyn AiProvider,
) -> (Vec<String>, bool) {
    if article.content.trim().chars().count() < MIN_MEANINGFUL_CHARS {
        return (vec![], false);
    }

    let topics = with_graceful_degradation(
        || extract_with_ai(article, ai),
        vec![],
        "topic_extraction",
    )
    .await;

    let capped = topics.into_iter().take(config.max_topics).collect();
    (capped, true)
}

async fn extract_with_ai(article: &Article, ai: &dyn AiProvider) -> crate::error::Result<Vec<String>> {
    let schema = json!({
        "type": "object",
        "properties": {
            "topics": {
                "type": "array",
                "items": {"type": "string"}
            }
        },
        "required": ["topics"]
    });

    let system = "Extract 1-3 word topics describing the subject matter of this article. \
        Respond only with the requested JSON.";
    let user = format!("Title: {}\n\nContent:\n{}", article.title, article.content);

    let verdict: TopicsVerdict =
        crate::pipeline::ai::run_structured(ai, system, &user, schema, Duration::from_secs(60))
            .await?;
    Ok(verdict.topics)
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
    async fn short_articles_skip_ai_call() {
        let (topics, ai_called) = extract_topics(
            &article("too short"),
            &TopicsConfig::default(),
            &StaticAiProvider { value: json!({"topics": ["x"]}) },
        )
        .await;
        assert!(topics.is_empty());
        assert!(!ai_called);
    }

    #[tokio::test]
    async fn topics_are_capped_at_max() {
        let content = "x".repeat(200);
        let (topics, ai_called) = extract_topics(
            &article(&content),
            &TopicsConfig { max_topics: 2 },
            &StaticAiProvider {
                value: json!({"topics": ["a", "b", "c", "d"]}),
            },
        )
        .await;
        assert_eq!(topics.len(), 2);
        assert!(ai_called);
    }

    #[tokio::test]
    async fn ai_error_yields_empty_topics() {
        let content = "x".repeat(200);
        let (topics, ai_called) =
            extract_topics(&article(&content), &TopicsConfig::default(), &FailingAiProvider).await;
        assert!(topics.is_empty());
        assert!(ai_called);
    }
}
