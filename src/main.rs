//! One-shot CLI runner: reads a `UserConfig` from a JSON file, runs the
//! digest pipeline once, and prints the resulting `DigestPayload` as JSON.
//! Scheduling, delivery, and account storage are the surrounding service's
//! job (§1 non-goals) — this binary only exercises the pipeline end to end.

use daily_digest_pipeline::{
    AiConfig, AiProvider, Cache, MemoCache, MetricsCollector, OpenAiProvider, PipelineConfig,
    PipelineOrchestrator, UserConfig,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let user_config_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: daily-digest-pipeline <user-config.json>"))?;

    let raw = std::fs::read_to_string(&user_config_path)?;
    let user: UserConfig = serde_json::from_str(&raw)?;

    let config = PipelineConfig::from_env();
    let metrics = Arc::new(MetricsCollector::new()?);
    let cache: Arc<dyn Cache> = Arc::new(MemoCache::default());
    let ai: Arc<dyn AiProvider> = Arc::new(OpenAiProvider::new(AiConfig::default()));

    let orchestrator = PipelineOrchestrator::new(config, cache, ai, metrics.clone())?;
    let digest = orchestrator.run(&user).await;

    println!("{}", serde_json::to_string_pretty(&digest)?);
    eprintln!("{}", metrics.render());

    Ok(())
}
