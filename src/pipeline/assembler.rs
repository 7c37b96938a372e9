//! §4.6 Assembler: the final activity. Filters groups/members by the
//! relevance threshold each article already carries from the relevance
//! activity, sorts what remains, and renders the HTML + plain-text bodies
//! tera templates produce from embedded (non-filesystem) sources.

use crate::pipeline::article::{Article, ArticleGroup, DigestMetadata, DigestPayload, UserConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tera::{Context, Tera};
use tracing::warn;

const HTML_TEMPLATE: &str = include_str!("templates/digest.html.tera");
const TEXT_TEMPLATE: &str = include_str!("templates/digest.txt.tera");

/// A group reshaped for template rendering: the primary article plus its
/// "similar" members ordered by descending relevance (§9 Open Question,
/// resolved in DESIGN.md).
#[derive(Debug, Clone, Serialize)]
struct GroupView {
    primary: Article,
    similar: Vec<Article>,
    aggregated_topics: Vec<String>,
}

fn passes(article: &Article) -> bool {
    article.passes_relevance_threshold().unwrap_or(false)
}

fn relevance_quality_recency_key(article: &Article) -> (f64, f64, DateTime<Utc>) {
    (
        article.relevance_score().unwrap_or(0.0),
        article.quality_score().unwrap_or(0.0),
        article.published_at,
    )
}

/// §4.6 steps 1-3: drop non-passing groups/members, sort the rest.
fn filter_and_sort(groups: Vec<ArticleGroup>) -> Vec<ArticleGroup> {
    let mut kept: Vec<ArticleGroup> = groups
        .into_iter()
        .filter(|g| passes(&g.primary))
        .filter_map(|g| {
            let members: Vec<Article> = g.members.into_iter().filter(passes).collect();
            if members.is_empty() {
                return None;
            }
            // Primary may itself have been filtered out of `members` if it's
            // borderline against a different comparison; re-derive it from the
            // surviving members using the same (relevance, quality, recency) key
            // the similarity grouper used, so primary is always a member.
            let primary = members
                .iter()
                .max_by(|a, b| {
                    relevance_quality_recency_key(a)
                        .partial_cmp(&relevance_quality_recency_key(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .cloned()
                .unwrap_or_else(|| members[0].clone());
            Some(ArticleGroup {
                members,
                aggregated_topics: g.aggregated_topics,
                primary,
            })
        })
        .collect();

    kept.sort_by(|a, b| {
        relevance_quality_recency_key(&b.primary)
            .partial_cmp(&relevance_quality_recency_key(&a.primary))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    kept
}

fn to_view(group: ArticleGroup) -> GroupView {
    let primary_url = group.primary.url.clone();
    let mut similar: Vec<Article> = group
        .members
        .into_iter()
        .filter(|m| m.url != primary_url)
        .collect();
    similar.sort_by(|a, b| {
        b.relevance_score()
            .unwrap_or(0.0)
            .partial_cmp(&a.relevance_score().unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    GroupView {
        primary: group.primary,
        similar,
        aggregated_topics: group.aggregated_topics,
    }
}

fn groups_summary(views: &[GroupView]) -> Vec<String> {
    views
        .iter()
        .map(|v| {
            if v.similar.is_empty() {
                v.primary.title.clone()
            } else {
                format!("{} (+{} similar)", v.primary.title, v.similar.len())
            }
        })
        .collect()
}

fn render(template: &str, ctx: &Context, kind: &str, autoescape: bool) -> String {
    match Tera::one_off(template, ctx, autoescape) {
        Ok(rendered) => rendered,
        Err(err) => {
            warn!(kind, error = %err, "digest template render failed, emitting empty body");
            String::new()
        }
    }
}

/// §4.6: produces the final `DigestPayload` for one user's run.
pub fn assemble_digest(groups: Vec<ArticleGroup>, user: &UserConfig, now: DateTime<Utc>) -> DigestPayload {
    let started = Instant::now();

    let filtered = filter_and_sort(groups);
    let total_articles: usize = filtered.iter().map(|g| g.members.len()).sum();
    let total_groups = filtered.len();

    let views: Vec<GroupView> = filtered.into_iter().map(to_view).collect();
    let summary = groups_summary(&views);

    let local_date = match user.timezone.parse::<chrono_tz::Tz>() {
        Ok(tz) => now.with_timezone(&tz).format("%Y-%m-%d").to_string(),
        Err(_) => {
            warn!(timezone = %user.timezone, "unrecognized timezone, falling back to UTC");
            now.format("%Y-%m-%d").to_string()
        }
    };

    let mut ctx = Context::new();
    ctx.insert("groups", &views);
    ctx.insert("date", &local_date);
    ctx.insert("generated_at", &now.to_rfc3339());
    ctx.insert("user_id", &user.user_id);

    let html_body = render(HTML_TEMPLATE, &ctx, "html", true);
    let text_body = render(TEXT_TEMPLATE, &ctx, "text", false);
    let html_size = html_body.len();
    let text_size = text_body.len();

    DigestPayload {
        user_id: user.user_id.clone(),
        email: user.email.clone(),
        generation_timestamp: now,
        html_body,
        text_body,
        groups_summary: summary,
        metadata: DigestMetadata {
            total_groups,
            total_articles,
            html_size,
            text_size,
            assembly_ms: started.elapsed().as_millis() as u64,
            failed_sources: vec![],
            activity_errors: Default::default(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaryStyle;
    use crate::pipeline::article::{InterestProfile, SourceRef};
    use chrono::Duration;

    fn user() -> UserConfig {
        UserConfig {
            user_id: "u1".into(),
            email: "u1@example.com".into(),
            timezone: "UTC".into(),
            interest_profile: InterestProfile::new(vec!["ai".into()], 40, 1.0, SummaryStyle::Brief),
            sources: vec![SourceRef { url: "https://a.com/feed".into(), name: None }],
        }
    }

    fn scored_article(url: &str, relevance: f64, quality: f64, passes: bool) -> Article {
        let a = Article::new(
            url.into(),
            format!("Title for {url}"),
            "x".repeat(200),
            None,
            vec![],
            Some(Utc::now()),
            Utc::now(),
        );
        a.with_metadata(serde_json::Map::from_iter([
            ("relevance_score".to_string(), serde_json::json!(relevance)),
            ("relevance_passes_threshold".to_string(), serde_json::json!(passes)),
            ("quality_score".to_string(), serde_json::json!(quality)),
        ]))
    }

    #[test]
    fn drops_groups_whose_primary_fails_threshold() {
        let failing = scored_article("https://a.com/1", 10.0, 50.0, false);
        let group = ArticleGroup {
            primary: failing.clone(),
            members: vec![failing],
            aggregated_topics: vec![],
        };
        let payload = assemble_digest(vec![group], &user(), Utc::now());
        assert_eq!(payload.metadata.total_groups, 0);
    }

    #[test]
    fn groups_sorted_by_relevance_desc() {
        let a = scored_article("https://a.com/1", 85.0, 50.0, true);
        let b = scored_article("https://a.com/2", 62.0, 50.0, true);
        let groups = vec![
            ArticleGroup { primary: b.clone(), members: vec![b], aggregated_topics: vec![] },
            ArticleGroup { primary: a.clone(), members: vec![a], aggregated_topics: vec![] },
        ];
        let payload = assemble_digest(groups, &user(), Utc::now());
        assert_eq!(payload.metadata.total_groups, 2);
        assert!(payload.groups_summary[0].starts_with("Title for https://a.com/1"));
    }

    #[test]
    fn renders_non_empty_html_and_text_bodies() {
        let a = scored_article("https://a.com/1", 85.0, 50.0, true);
        let group = ArticleGroup { primary: a.clone(), members: vec![a], aggregated_topics: vec!["ai".into()] };
        let payload = assemble_digest(vec![group], &user(), Utc::now());
        assert!(!payload.html_body.is_empty());
        assert!(!payload.text_body.is_empty());
        assert!(payload.html_body.contains("Title for https://a.com/1"));
    }

    #[test]
    fn empty_groups_yields_empty_digest_not_an_error() {
        let payload = assemble_digest(vec![], &user(), Utc::now());
        assert_eq!(payload.metadata.total_groups, 0);
        assert_eq!(payload.metadata.total_articles, 0);
    }

    #[test]
    fn similar_members_ordered_by_descending_relevance() {
        let primary = scored_article("https://a.com/1", 90.0, 50.0, true);
        let low = scored_article("https://a.com/2", 60.0, 50.0, true);
        let mid = scored_article("https://a.com/3", 75.0, 50.0, true);
        let group = ArticleGroup {
            primary: primary.clone(),
            members: vec![primary, low, mid],
            aggregated_topics: vec![],
        };
        let payload = assemble_digest(vec![group], &user(), Utc::now() + Duration::hours(1));
        assert_eq!(payload.metadata.total_articles, 3);
    }
}
