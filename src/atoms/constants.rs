// ── Pilot Atoms: Constants ─────────────────────────────────────────────────
// All named constants for the crate live here.
// Configurable values use these as their defaults (see engine/config.rs).

// ── Conversation history ───────────────────────────────────────────────────
// Turns kept per conversation id. Oldest trimmed first.
pub const HISTORY_MAX_TURNS: usize = 20;
// Turns sent to the language model as context on each classification.
pub const CLASSIFIER_CONTEXT_TURNS: usize = 5;

// ── Activity buffer ────────────────────────────────────────────────────────
// Platform messages retained for "last person who spoke" / "last channel".
pub const ACTIVITY_BUFFER_CAPACITY: usize = 50;

// ── Request budget ─────────────────────────────────────────────────────────
pub const DEFAULT_MAX_REQUESTS: u64 = 300_000;
// Flat per-request cost estimate reported by getStats (USD).
pub const DEFAULT_COST_PER_REQUEST_USD: f64 = 0.000_002;

// ── Intent cache ───────────────────────────────────────────────────────────
pub const DEFAULT_CACHE_CAPACITY: usize = 1_024;

// ── Language model defaults ────────────────────────────────────────────────
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_TEMPERATURE: f64 = 0.8;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ── Human pacing (milliseconds) ────────────────────────────────────────────
pub const BETWEEN_ACTIONS_MS: (u64, u64) = (1_500, 3_000);
pub const TYPING_CHANNEL_MS: (u64, u64) = (1_500, 3_000);
pub const TYPING_DM_MS: (u64, u64) = (2_500, 4_500);

// ── Symbolic references ────────────────────────────────────────────────────
// Placeholder values the resolver expands against recent context.
pub const REF_LAST_CONVERSATION: &str = "last_conversation";
pub const REF_CURRENT_CHANNEL: &str = "current_channel";
pub const REF_LAST_MESSAGE: &str = "last_message";

// ── Output limits ──────────────────────────────────────────────────────────
pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const MAX_RECENT_LIMIT: usize = 50;
pub const DISCORD_MESSAGE_MAX_CHARS: usize = 2_000;
