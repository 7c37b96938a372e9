//! §4.5.2 Normalizer: annotates and normalizes metadata. Never filters —
//! every input article produces exactly one output article.

use crate::config::ContentConfig;
use crate::pipeline::article::{canonicalize_url, Article};

pub fn normalize(article: &Article, config: &ContentConfig) -> Article {
    // §4.5.2's "published_at absent -> fetch_timestamp" rule is already
    // resolved by `Article::new` at construction time, and `DateTime<Utc>`
    // makes "naive or non-UTC" unrepresentable here, so there's nothing
    // left for this function to convert.
    let published_at = article.published_at;

    let title = truncate_at_word_boundary(&collapse_whitespace(&article.title), config.title_max);
    let title = if title.is_empty() {
        "Untitled Article".to_string()
    } else {
        title
    };

    let author = article.author.as_deref().map(|a| {
        let trimmed = a.trim();
        truncate_at_word_boundary(&title_case(trimmed), config.author_max)
    });

    let mut seen = std::collections::HashSet::new();
    let tags: Vec<String> = article
        .tags
        .iter()
        .map(|t| truncate_at_word_boundary(&t.trim().to_lowercase(), config.tag_max))
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .take(config.max_tags)
        .collect();

    let url = canonicalize_url(&article.url).unwrap_or_else(|_| article.url.clone());

    let content = truncate_at_word_boundary(&article.content, config.max_length);

    article.with_normalized_fields(url, title, content, author, tags, published_at)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_at_word_boundary(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max).collect();
    match truncated.rfind(' ') {
        Some(idx) => truncated[..idx].to_string(),
        None => truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article() -> Article {
        Article::new(
            "http://Example.com/x?utm_source=a".into(),
            "  hello   world  ".into(),
            "x".repeat(150),
            Some("  jane doe  ".into()),
            vec!["Rust".into(), "rust".into(), " AI ".into()],
            None,
            Utc::now(),
        )
    }

    #[test]
    fn normalizes_title_author_tags_and_url() {
        let a = article();
        let n = normalize(&a, &ContentConfig::default());
        assert_eq!(n.title, "hello world");
        assert_eq!(n.author, Some("Jane Doe".to_string()));
        assert_eq!(n.tags, vec!["rust".to_string(), "ai".to_string()]);
        assert_eq!(n.url, "https://example.com/x");
        assert_eq!(n.published_at, n.fetch_timestamp);
    }

    #[test]
    fn empty_title_becomes_untitled() {
        let mut a = article();
        a.title = "   ".into();
        let n = normalize(&a, &ContentConfig::default());
        assert_eq!(n.title, "Untitled Article");
    }

    #[test]
    fn normalizer_is_idempotent() {
        let a = article();
        let config = ContentConfig::default();
        let once = normalize(&a, &config);
        let twice = normalize(&once, &config);
        assert_eq!(once, twice);
    }
}
