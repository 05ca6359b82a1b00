// ── Pilot Engine: Configuration ────────────────────────────────────────────
//
// TOML file with five sections, every field optional:
//
//   [pipeline]   budget, cost estimate, history/activity sizes, classification order
//   [classifier] OpenAI-compatible endpoint, model, sampling
//   [cache]      intent cache capacity and TTL
//   [pacing]     human-like delay ranges
//   [discord]    bot token
//
// Secrets may instead come from the environment, which wins over the file.

use crate::atoms::constants::{
    ACTIVITY_BUFFER_CAPACITY, CLASSIFIER_CONTEXT_TURNS, DEFAULT_CACHE_CAPACITY,
    DEFAULT_COST_PER_REQUEST_USD, DEFAULT_MAX_REQUESTS, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
    DEFAULT_OPENAI_BASE_URL, DEFAULT_TEMPERATURE, HISTORY_MAX_TURNS,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ClassificationOrder;
use crate::engine::pacing::Pacer;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub pipeline: PipelineSettings,
    pub classifier: ClassifierSettings,
    pub cache: CacheSettings,
    pub pacing: Pacer,
    pub discord: DiscordSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_requests: u64,
    pub cost_per_request_usd: f64,
    pub history_max_turns: usize,
    pub activity_capacity: usize,
    pub order: ClassificationOrder,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            cost_per_request_usd: DEFAULT_COST_PER_REQUEST_USD,
            history_max_turns: HISTORY_MAX_TURNS,
            activity_capacity: ACTIVITY_BUFFER_CAPACITY,
            order: ClassificationOrder::PatternsFirst,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// No key → no semantic fallback; unmatched input asks for clarification.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub context_turns: usize,
    pub timeout_secs: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            context_turns: CLASSIFIER_CONTEXT_TURNS,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub capacity: usize,
    /// Absent = entries never expire (LRU bound still applies).
    pub ttl_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { capacity: DEFAULT_CACHE_CAPACITY, ttl_secs: None }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordSettings {
    pub token: Option<String>,
}

impl PilotConfig {
    /// `~/.config/pawz-pilot/config.toml` (platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("pawz-pilot").join("config.toml"))
    }

    /// Load from `path` (or the default location), then apply env overrides.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(&p)?;
                let parsed = Self::from_toml(&raw)
                    .map_err(|e| EngineError::Config(format!("{}: {}", p.display(), e)))?;
                info!("[config] Loaded {}", p.display());
                parsed
            }
            Some(p) => {
                info!("[config] No config at {}, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> EngineResult<Self> {
        toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Environment overrides. `lookup` is injectable for tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = get("DISCORD_TOKEN") {
            self.discord.token = Some(token);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.classifier.api_key = Some(key);
        }
        if let Some(model) = get("AI_MODEL") {
            self.classifier.model = model;
        }
        if let Some(url) = get("AI_BASE_URL") {
            self.classifier.base_url = url;
        }
        parse_into(get("AI_MAX_TOKENS"), "AI_MAX_TOKENS", &mut self.classifier.max_tokens);
        parse_into(get("AI_TEMPERATURE"), "AI_TEMPERATURE", &mut self.classifier.temperature);
        parse_into(get("PILOT_MAX_REQUESTS"), "PILOT_MAX_REQUESTS", &mut self.pipeline.max_requests);
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(0.0..=2.0).contains(&self.classifier.temperature) {
            return Err(EngineError::Config(format!(
                "classifier.temperature must be within 0..=2, got {}",
                self.classifier.temperature
            )));
        }
        if self.pipeline.cost_per_request_usd < 0.0 {
            return Err(EngineError::Config("pipeline.cost_per_request_usd must be >= 0".into()));
        }
        if self.cache.capacity == 0 {
            return Err(EngineError::Config("cache.capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

fn parse_into<T: std::str::FromStr>(raw: Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = raw else { return };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => warn!("[config] Ignoring {}={:?}: not a valid value", key, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_constants() {
        let c = PilotConfig::default();
        assert_eq!(c.pipeline.max_requests, 300_000);
        assert_eq!(c.classifier.model, "gpt-3.5-turbo");
        assert_eq!(c.classifier.max_tokens, 500);
        assert_eq!(c.pipeline.history_max_turns, 20);
        assert_eq!(c.pacing, Pacer::default());
        assert!(!c.has_classifier());
    }

    #[test]
    fn partial_toml() {
        let c = PilotConfig::from_toml(
            r#"
            [pipeline]
            max_requests = 10
            order = "classifier_first"

            [cache]
            ttl_secs = 600

            [pacing.between_actions]
            min_ms = 0
            max_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(c.pipeline.max_requests, 10);
        assert_eq!(c.pipeline.order, ClassificationOrder::ClassifierFirst);
        assert_eq!(c.cache.ttl(), Some(Duration::from_secs(600)));
        assert_eq!(c.cache.capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(c.pacing.between_actions.max_ms, 0);
        assert_eq!(c.pacing.typing_dm, Pacer::default().typing_dm);
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("AI_MODEL", "gpt-4o-mini"),
            ("AI_TEMPERATURE", "0.2"),
            ("AI_MAX_TOKENS", "lots"),
            ("PILOT_MAX_REQUESTS", "42"),
        ]
        .into_iter()
        .collect();
        let mut c = PilotConfig::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert!(c.has_classifier());
        assert_eq!(c.classifier.model, "gpt-4o-mini");
        assert_eq!(c.classifier.temperature, 0.2);
        assert_eq!(c.classifier.max_tokens, 500);
        assert_eq!(c.pipeline.max_requests, 42);
    }

    #[test]
    fn invalid_values_rejected() {
        let c = PilotConfig::from_toml("[classifier]\ntemperature = 7.5").unwrap();
        assert!(c.validate().is_err());
        assert!(PilotConfig::from_toml("[pipeline]\nmax_requests = \"many\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let c = PilotConfig::load(Some(Path::new("/nonexistent/pawz-pilot.toml"))).unwrap();
        assert_eq!(c.cache.capacity, DEFAULT_CACHE_CAPACITY);
    }
}
