// ── Pilot Engine: Command Pipeline ─────────────────────────────────────────
//
// The only entry point the front-ends use:
//   process_command(text, conversation_id) → CommandResponse
//   get_stats()                             → PipelineStats
//   clear_conversation(conversation_id)
//
// Per command: Received → Classifying → Resolving → Dispatching → Aggregated → Replied.
// Budget exhaustion short-circuits Received → Replied; a resolution failure
// short-circuits Resolving → Replied. Nothing is retried automatically.
//
// Shared state lives in one explicitly constructed PipelineContext, injected
// here and into the gateway feed. No globals.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::{LanguageModel, MessagingGateway};
use crate::atoms::types::{
    Classification, ClassificationOrder, CommandResponse, CommandStage, ConversationTurn,
    IntentSource, PipelineStats,
};
use crate::engine::activity::RecentActivityBuffer;
use crate::engine::aggregator::aggregate;
use crate::engine::cache::IntentCache;
use crate::engine::classifier::SemanticFallbackClassifier;
use crate::engine::config::PilotConfig;
use crate::engine::dispatcher::ActionDispatcher;
use crate::engine::handlers::ActionContext;
use crate::engine::history::ConversationHistory;
use crate::engine::pacing::Pacer;
use crate::engine::patterns::{self, PatternOutcome, UnmatchedPolicy};
use crate::engine::resolver::ReferenceResolver;
use crate::engine::text::truncate_str;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ── Request budget ─────────────────────────────────────────────────────────

/// Hard per-process ceiling on processed commands.
pub struct RequestBudget {
    used: AtomicU64,
    limit: u64,
    cost_per_request: f64,
}

impl RequestBudget {
    pub fn new(limit: u64, cost_per_request: f64) -> Self {
        Self { used: AtomicU64::new(0), limit, cost_per_request }
    }

    /// Count one request. Fails once the count passes the limit; the failed
    /// attempt is still counted.
    pub fn try_acquire(&self) -> EngineResult<u64> {
        let used = self.used.fetch_add(1, Ordering::SeqCst) + 1;
        if used > self.limit {
            return Err(EngineError::BudgetExceeded { used, limit: self.limit });
        }
        Ok(used)
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used())
    }

    pub fn estimated_cost(&self) -> String {
        format!("{:.6}", self.used() as f64 * self.cost_per_request)
    }
}

// ── Shared context ─────────────────────────────────────────────────────────

pub struct PipelineContext {
    pub history: ConversationHistory,
    /// Shared with the gateway event feed, its only writer.
    pub activity: Arc<RecentActivityBuffer>,
    pub cache: IntentCache,
    pub budget: RequestBudget,
}

impl PipelineContext {
    pub fn from_config(config: &PilotConfig) -> Self {
        Self {
            history: ConversationHistory::new(config.pipeline.history_max_turns),
            activity: Arc::new(RecentActivityBuffer::new(config.pipeline.activity_capacity)),
            cache: IntentCache::new(config.cache.capacity, config.cache.ttl()),
            budget: RequestBudget::new(
                config.pipeline.max_requests,
                config.pipeline.cost_per_request_usd,
            ),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            requests_used: self.budget.used(),
            requests_remaining: self.budget.remaining(),
            cache_size: self.cache.len(),
            estimated_cost: self.budget.estimated_cost(),
            conversations: self.history.conversation_count(),
        }
    }
}

// ── Pipeline ───────────────────────────────────────────────────────────────

pub struct CommandPipeline {
    ctx: Arc<PipelineContext>,
    gateway: Arc<dyn MessagingGateway>,
    classifier: Option<SemanticFallbackClassifier>,
    order: ClassificationOrder,
    pacer: Pacer,
}

impl CommandPipeline {
    pub fn new(
        ctx: Arc<PipelineContext>,
        gateway: Arc<dyn MessagingGateway>,
        model: Option<Arc<dyn LanguageModel>>,
        config: &PilotConfig,
    ) -> Self {
        let classifier = model
            .map(|m| SemanticFallbackClassifier::new(m, config.classifier.context_turns));
        Self {
            ctx,
            gateway,
            classifier,
            order: config.pipeline.order,
            pacer: config.pacing,
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub async fn process_command(&self, text: &str, conversation_id: &str) -> CommandResponse {
        let mut stages = vec![CommandStage::Received];
        let text = text.trim();
        if text.is_empty() {
            stages.push(CommandStage::Replied);
            return failure("Empty command.", stages);
        }

        if let Err(e) = self.ctx.budget.try_acquire() {
            warn!("[pipeline] {}", e);
            stages.push(CommandStage::Replied);
            return failure(format!("⛔ {e}"), stages);
        }

        self.enter(&mut stages, CommandStage::Classifying, conversation_id);
        let classification = self.classify(text, conversation_id).await;
        info!(
            "[pipeline] {} '{}' → {} intent(s) from {:?}",
            conversation_id,
            truncate_str(text, 60),
            classification.intents.len(),
            classification.source
        );

        self.enter(&mut stages, CommandStage::Resolving, conversation_id);
        let resolver = ReferenceResolver::new(self.gateway.as_ref(), self.ctx.activity.as_ref());
        let actions = match resolver.resolve_all(&classification.intents).await {
            Ok(actions) => actions,
            Err(e) => {
                info!("[pipeline] {} resolution failed: {}", conversation_id, e);
                stages.push(CommandStage::Replied);
                let mut response = failure(format!("❌ {e}"), stages);
                response.reasoning = classification.reasoning;
                return response;
            }
        };

        self.enter(&mut stages, CommandStage::Dispatching, conversation_id);
        let action_ctx = ActionContext {
            gateway: self.gateway.as_ref(),
            activity: self.ctx.activity.as_ref(),
            pacer: &self.pacer,
        };
        let results = ActionDispatcher::dispatch(action_ctx, actions).await;

        self.enter(&mut stages, CommandStage::Aggregated, conversation_id);
        let verdict = aggregate(&results, classification.human_response.as_deref());

        stages.push(CommandStage::Replied);
        debug!("[pipeline] {} → Replied (success={})", conversation_id, verdict.success);
        CommandResponse {
            success: verdict.success,
            message: verdict.message,
            results,
            reasoning: classification.reasoning,
            stages,
        }
    }

    pub fn get_stats(&self) -> PipelineStats {
        self.ctx.stats()
    }

    pub fn clear_conversation(&self, conversation_id: &str) {
        self.ctx.history.clear(conversation_id);
        info!("[pipeline] Cleared conversation {}", conversation_id);
    }

    fn enter(&self, stages: &mut Vec<CommandStage>, stage: CommandStage, conversation_id: &str) {
        debug!("[pipeline] {} → {:?}", conversation_id, stage);
        stages.push(stage);
    }

    // ── Classification ─────────────────────────────────────────────────────

    async fn classify(&self, text: &str, conversation_id: &str) -> Classification {
        if let Some(mut hit) = self.ctx.cache.get(text) {
            debug!("[pipeline] Cache hit for '{}'", truncate_str(text, 60));
            hit.source = IntentSource::Cache;
            self.record_turns(conversation_id, text, &hit);
            return hit;
        }

        let classification = match (self.order, &self.classifier) {
            (ClassificationOrder::PatternsFirst, Some(classifier)) => {
                match patterns::match_input(text, UnmatchedPolicy::FallThrough) {
                    PatternOutcome::Matched(c) => c,
                    PatternOutcome::NoMatch => {
                        classifier.classify(text, conversation_id, &self.ctx.history).await
                    }
                }
            }
            (ClassificationOrder::ClassifierFirst, Some(classifier)) => {
                let c = classifier.classify(text, conversation_id, &self.ctx.history).await;
                match (c.source, patterns::match_input(text, UnmatchedPolicy::FallThrough)) {
                    (IntentSource::Heuristic, PatternOutcome::Matched(rules)) => rules,
                    _ => c,
                }
            }
            (_, None) => match patterns::match_input(text, UnmatchedPolicy::AskClarification) {
                PatternOutcome::Matched(c) => c,
                PatternOutcome::NoMatch => patterns::clarification(),
            },
        };

        match classification.source {
            // The classifier already wrote its own turns.
            IntentSource::Model => self.ctx.cache.put(text, classification.clone()),
            _ => self.record_turns(conversation_id, text, &classification),
        }
        classification
    }

    fn record_turns(&self, conversation_id: &str, text: &str, classification: &Classification) {
        let serialized = match serde_json::to_string(classification) {
            Ok(s) => s,
            Err(e) => {
                warn!("[pipeline] Could not serialize classification: {}", e);
                return;
            }
        };
        self.ctx.history.append(
            conversation_id,
            [ConversationTurn::user(text), ConversationTurn::assistant(serialized)],
        );
    }
}

fn failure(message: impl Into<String>, stages: Vec<CommandStage>) -> CommandResponse {
    CommandResponse {
        success: false,
        message: message.into(),
        results: Vec::new(),
        reasoning: None,
        stages,
    }
}
