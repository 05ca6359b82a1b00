// ── Pilot Atoms: Golden Traits ─────────────────────────────────────────────
// The two seams the pipeline talks through:
//   • MessagingGateway: the messaging platform account being driven
//   • LanguageModel   : the hosted model used as fallback classifier
//
// Concrete implementations live in engine/discord and engine/providers;
// tests substitute in-memory fakes.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    ActivityRecord, ChannelRef, ConversationTurn, MessageRef, PresenceStatus, ServerInfo,
    UserRef,
};
use async_trait::async_trait;
use thiserror::Error;

// ── Messaging gateway ──────────────────────────────────────────────────────

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Short name used in logs and errors ("discord", "fake", …).
    fn name(&self) -> &str;

    /// Whether the platform connection is currently usable.
    fn connection_state(&self) -> bool;

    /// The operator's own account, once the platform has identified it.
    fn current_user(&self) -> Option<UserRef>;

    async fn send_message(&self, channel: &ChannelRef, content: &str) -> EngineResult<MessageRef>;

    async fn send_direct_message(&self, user: &UserRef, content: &str) -> EngineResult<MessageRef>;

    /// The DM channel with `user`, opened if necessary.
    async fn direct_channel(&self, user: &UserRef) -> EngineResult<ChannelRef>;

    async fn react_to_message(&self, message: &MessageRef, emoji: &str) -> EngineResult<()>;

    async fn set_typing_indicator(&self, channel: &ChannelRef, on: bool) -> EngineResult<()>;

    async fn find_user_by_handle(&self, handle: &str) -> EngineResult<Option<UserRef>>;

    async fn list_recent_messages(&self, limit: usize) -> EngineResult<Vec<ActivityRecord>>;

    /// Channels where the account holds both send and view permission.
    async fn list_accessible_channels(&self) -> EngineResult<Vec<ChannelRef>>;

    async fn set_presence(
        &self,
        status: PresenceStatus,
        activity: Option<&str>,
    ) -> EngineResult<()>;

    async fn list_servers(&self) -> EngineResult<Vec<ServerInfo>>;

    async fn fetch_channel_messages(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> EngineResult<Vec<ActivityRecord>>;
}

// ── Language model ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("auth: {0}")]
    Auth(String),
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },
    #[error("api {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unparseable response: {0}")]
    Parse(String),
}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        EngineError::provider("language-model", e.to_string())
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Run one completion constrained to a JSON object and return its raw text.
    async fn complete_json(&self, messages: &[ConversationTurn]) -> Result<String, ProviderError>;
}
