// Pawz Pilot: drive a Discord account from plain-language commands.
//
//   atoms/  pure types, constants, traits and errors
//   engine/ classification, resolution, dispatch and the platform adapters

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::traits::{LanguageModel, MessagingGateway, ProviderError};
pub use atoms::types::{ActionResult, CommandResponse, PipelineStats};
pub use engine::config::PilotConfig;
pub use engine::pipeline::{CommandPipeline, PipelineContext};
