//! Daily Digest Processing Pipeline.
//!
//! Turns a user's subscribed feeds into a personalized HTML/plain-text
//! digest: fetch, validate, normalize, score quality, extract topics, score
//! relevance, summarize, group similar coverage, and assemble. No HTTP
//! surface, account storage, or delivery mechanism is owned by this crate —
//! a surrounding service supplies a `UserConfig` and does something with the
//! resulting `DigestPayload`.

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod recovery;

pub use config::{Environment, PipelineConfig};
pub use error::{PipelineError, Result};
pub use metrics::MetricsCollector;
pub use pipeline::ai::{AiConfig, AiProvider, OpenAiProvider};
pub use pipeline::article::{
    Article, ArticleGroup, DigestMetadata, DigestPayload, InterestProfile, SourceRef, UserConfig,
};
pub use pipeline::cache::{Cache, MemoCache};
pub use pipeline::workflow::PipelineOrchestrator;
