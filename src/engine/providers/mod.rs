// Pilot Engine: Language-Model Provider Registry
// Callers hold `Arc<dyn LanguageModel>` and never name the concrete backend.

pub mod openai;

pub use openai::OpenAiProvider;

use crate::atoms::error::EngineResult;
use crate::atoms::traits::LanguageModel;
use crate::engine::config::ClassifierSettings;
use log::info;
use std::sync::Arc;

/// Build the configured model, or `None` when no API key is set.
/// Every supported endpoint speaks the OpenAI chat/completions format
/// (OpenAI, Azure, OpenRouter, Ollama, …), selected by `base_url`.
pub fn from_settings(settings: &ClassifierSettings) -> EngineResult<Option<Arc<dyn LanguageModel>>> {
    match settings.api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => {
            info!("[providers] Semantic fallback via {} ({})", settings.base_url, settings.model);
            Ok(Some(Arc::new(OpenAiProvider::new(settings)?)))
        }
        _ => {
            info!("[providers] No API key, semantic fallback disabled");
            Ok(None)
        }
    }
}
