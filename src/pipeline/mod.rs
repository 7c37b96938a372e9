//! The digest pipeline: fetch → validate → normalize → quality → topics →
//! relevance → summarize → group → assemble, plus the cross-cutting layers
//! (cache, AI provider abstraction) the activities are built on.

pub mod activities;
pub mod ai;
pub mod article;
pub mod assembler;
pub mod cache;
pub mod fetcher;
pub mod processors;
pub mod workflow;
