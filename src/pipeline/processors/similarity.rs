//! §4.5.7 Similarity grouper: builds an undirected similarity graph over a
//! batch of articles and collapses each connected component into one
//! `ArticleGroup`. Runs after summarization (the source sequencing this
//! mirrors already orders the two that way).

use crate::config::SimilarityConfig;
use crate::pipeline::ai::AiProvider;
use crate::pipeline::article::{sha256_hex16, Article, ArticleGroup};
use crate::recovery::with_graceful_degradation;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

#[derive(Deserialize, Default)]
struct SimilarityVerdict {
    similarity_score: f64,
}

/// Order-independent cache key for a pair of articles, by canonical URL.
pub fn pair_cache_key(url_a: &str, url_b: &str) -> String {
    let (lo, hi) = if url_a <= url_b { (url_a, url_b) } else { (url_b, url_a) };
    sha256_hex16(&format!("{lo}|{hi}"))
}

/// Every unordered index pair in `articles`, in the same deterministic
/// sorted-url-pair order `group_similar` iterates them (§4.5.7). Exposed so
/// the activity layer can precompute the matching `pair_cache_key` sequence
/// without re-deriving this ordering itself.
pub fn sorted_pairs(articles: &[Article]) -> Vec<(usize, usize)> {
    let n = articles.len();
    let mut pairs: Vec<(usize, usize)> = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push((i, j));
        }
    }
    pairs.sort_by(|(a1, b1), (a2, b2)| {
        let key1 = (articles[*a1].url.as_str(), articles[*b1].url.as_str());
        let key2 = (articles[*a2].url.as_str(), articles[*b2].url.as_str());
        key1.cmp(&key2)
    });
    pairs
}

/// The order-independent cache key for each pair `sorted_pairs` would yield,
/// in the same order — what the activity layer's `CachingAiProvider` uses
/// to address the cache per comparison (§4.7's `similarity` key row).
pub fn pair_keys(articles: &[Article]) -> Vec<String> {
    sorted_pairs(articles)
        .into_iter()
        .map(|(i, j)| pair_cache_key(&articles[i].url, &articles[j].url))
        .collect()
}

/// Groups `articles` into connected components of the similarity graph.
/// Returns the groups and the count of pairwise AI comparisons made.
pub async fn group_similar(
    articles: &[Article],
    config: &SimilarityConfig,
    ai: &dyn AiProvider,
) -> (Vec<ArticleGroup>, u64) {
    let n = articles.len();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut ai_calls = 0u64;

    let pairs = sorted_pairs(articles);

    for (i, j) in pairs {
        let score = with_graceful_degradation(
            || compare_pair(&articles[i], &articles[j], ai),
            0.0,
            "similarity_comparison",
        )
        .await;
        ai_calls += 1;
        if score >= config.threshold {
            adjacency[i].push(j);
            adjacency[j].push(i);
        }
    }

    let components = connected_components(&adjacency);

    let groups = components
        .into_iter()
        .map(|indices| build_group(&indices, articles))
        .collect();

    (groups, ai_calls)
}

async fn compare_pair(a: &Article, b: &Article, ai: &dyn AiProvider) -> crate::error::Result<f64> {
    let schema = json!({
        "type": "object",
        "properties": {
            "similarity_score": {"type": "number"}
        },
        "required": ["similarity_score"]
    });

    let system = "Score 0.0-1.0 how much these two articles cover the same underlying story or \
        topic. Respond only with the requested JSON.";
    let a_excerpt = a
        .summary
        .clone()
        .unwrap_or_else(|| a.content.chars().take(300).collect());
    let b_excerpt = b
        .summary
        .clone()
        .unwrap_or_else(|| b.content.chars().take(300).collect());
    let user = format!(
        "Article A title: {}\nArticle A summary: {}\n\nArticle B title: {}\nArticle B summary: {}",
        a.title, a_excerpt, b.title, b_excerpt,
    );

    let verdict: SimilarityVerdict =
        crate::pipeline::ai::run_structured(ai, system, &user, schema, Duration::from_secs(20))
            .await?;
    Ok(verdict.similarity_score.clamp(0.0, 1.0))
}

fn connected_components(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut visited = vec![false; n];
    let mut components = Vec::new();

    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut stack = vec![start];
        let mut component = Vec::new();
        visited[start] = true;
        while let Some(node) = stack.pop() {
            component.push(node);
            for &neighbor in &adjacency[node] {
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    stack.push(neighbor);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }

    components
}

fn build_group(indices: &[usize], articles: &[Article]) -> ArticleGroup {
    let members: Vec<Article> = indices.iter().map(|&i| articles[i].clone()).collect();

    // Primary = highest (relevance, then quality, then recency), per §4.5.7.
    let primary = members
        .iter()
        .max_by(|a, b| {
            let key_a = (
                a.relevance_score().unwrap_or(0.0),
                a.quality_score().unwrap_or(0.0),
                a.published_at,
            );
            let key_b = (
                b.relevance_score().unwrap_or(0.0),
                b.quality_score().unwrap_or(0.0),
                b.published_at,
            );
            key_a
                .0
                .partial_cmp(&key_b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| key_a.1.partial_cmp(&key_b.1).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| key_a.2.cmp(&key_b.2))
        })
        .cloned()
        .unwrap_or_else(|| members[0].clone());

    let mut topic_counts: HashMap<String, ()> = HashMap::new();
    let mut topics: BTreeSet<String> = BTreeSet::new();
    for member in &members {
        if let Some(ai_topics) = &member.ai_topics {
            for t in ai_topics {
                topics.insert(t.clone());
                topic_counts.insert(t.clone(), ());
            }
        }
    }

    ArticleGroup {
        members,
        aggregated_topics: topics.into_iter().collect(),
        primary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ai::StaticAiProvider;
    use chrono::Utc;

    fn article(url: &str, topics: Vec<&str>) -> Article {
        Article::new(
            url.into(),
            format!("Title {url}"),
            "x".repeat(150),
            None,
            vec![],
            Some(Utc::now()),
            Utc::now(),
        )
        .with_topics(topics.into_iter().map(String::from).collect())
    }

    #[test]
    fn pair_cache_key_is_order_independent() {
        assert_eq!(pair_cache_key("a", "b"), pair_cache_key("b", "a"));
    }

    #[test]
    fn pair_keys_line_up_with_sorted_pairs_by_canonical_url() {
        let articles = vec![article("https://b.com/1", vec![]), article("https://a.com/1", vec![])];
        let pairs = sorted_pairs(&articles);
        let keys = pair_keys(&articles);
        assert_eq!(pairs.len(), 1);
        assert_eq!(keys, vec![pair_cache_key(&articles[0].url, &articles[1].url)]);
    }

    #[tokio::test]
    async fn high_similarity_collapses_into_one_group() {
        let articles = vec![article("https://a.com/1", vec!["ai"]), article("https://a.com/2", vec!["ml"])];
        let (groups, ai_calls) = group_similar(
            &articles,
            &SimilarityConfig::default(),
            &StaticAiProvider { value: json!({"similarity_score": 0.95}) },
        )
        .await;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[0].aggregated_topics, vec!["ai".to_string(), "ml".to_string()]);
        assert_eq!(ai_calls, 1);
    }

    #[tokio::test]
    async fn low_similarity_keeps_articles_separate() {
        let articles = vec![article("https://a.com/1", vec![]), article("https://a.com/2", vec![])];
        let (groups, _) = group_similar(
            &articles,
            &SimilarityConfig::default(),
            &StaticAiProvider { value: json!({"similarity_score": 0.1}) },
        )
        .await;
        assert_eq!(groups.len(), 2);
    }

    #[tokio::test]
    async fn single_article_forms_its_own_group_with_no_ai_calls() {
        let articles = vec![article("https://a.com/1", vec![])];
        let (groups, ai_calls) = group_similar(
            &articles,
            &SimilarityConfig::default(),
            &StaticAiProvider { value: json!({"similarity_score": 0.0}) },
        )
        .await;
        assert_eq!(groups.len(), 1);
        assert_eq!(ai_calls, 0);
    }
}
