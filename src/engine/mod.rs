// Pawz Pilot Engine: natural-language command interpretation and action
// orchestration for a messaging account.
//
// Request flow:
//   pipeline → (patterns | cache | classifier) → resolver → dispatcher
//            → handlers → aggregator
//
// Shared state (history, activity, cache, budget) lives in
// `pipeline::PipelineContext`; platforms plug in through `atoms::traits`.

pub mod activity;
pub mod aggregator;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod discord;
pub mod dispatcher;
pub mod handlers;
pub mod history;
pub mod http;
pub mod normalize;
pub mod pacing;
pub mod patterns;
pub mod pipeline;
pub mod providers;
pub mod resolver;
pub mod text;

#[cfg(test)]
pub(crate) mod testing;
