// ── Pilot Engine: Semantic Fallback Classifier ─────────────────────────────
//
// Invoked only when the pattern matcher has nothing (or first, under the
// ClassifierFirst policy). Sends the last few turns plus the new input to a
// language model constrained to JSON, normalizes the answer and records the
// exchange in the conversation history.
//
// Never fails: transport errors and unparseable output both degrade to a
// keyword heuristic so the command always gets *some* classification.

use crate::atoms::constants::{
    DEFAULT_RECENT_LIMIT, REF_CURRENT_CHANNEL, REF_LAST_CONVERSATION, REF_LAST_MESSAGE,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::LanguageModel;
use crate::atoms::types::{ActionType, Classification, ConversationTurn, Intent, IntentSource};
use crate::engine::history::ConversationHistory;
use crate::engine::normalize::parse_model_output;
use crate::engine::text::truncate_str;
use log::{info, warn};
use std::sync::Arc;

pub const SYSTEM_PROMPT: &str = r##"You are an assistant driving a Discord account. Turn the operator's request into Discord actions.

Available actions:
1. SEND_MESSAGE - post in a channel. params: target ("#name" or "current_channel"), message, typing
2. SEND_DM - private message. params: username (handle or "last_conversation"), message, typing
3. REACT - react to a message. params: emoji, target ("last_message")
4. SET_TYPING - typing indicator. params: target, on (bool)
5. SET_STATUS - presence. params: status (online|idle|dnd|invisible), activity
6. SEARCH_USER - look a user up. params: username
7. GET_MESSAGES - show recent messages. params: limit, target
8. LIST_SERVERS - list servers
9. LIST_CHANNELS - list channels. params: server
10. CLARIFY - ask the operator a question. params: question

Answer with a JSON object of this shape:
{
    "actions": [
        {"type": "SEND_DM", "params": {"username": "name", "message": "text", "typing": true}, "order": 1}
    ],
    "reasoning": "what you are going to do",
    "human_response": "short friendly reply for the operator"
}

Rules:
- Messages must read like a real person typing quickly: short, casual, occasional emoji
- Vary the wording
- Use "last_conversation" for "them/him/her" and "current_channel" when no channel is named
- Answer in the operator's language"##;

pub struct SemanticFallbackClassifier {
    model: Arc<dyn LanguageModel>,
    context_turns: usize,
}

impl SemanticFallbackClassifier {
    pub fn new(model: Arc<dyn LanguageModel>, context_turns: usize) -> Self {
        Self { model, context_turns }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Classify `input`. Model results carry `IntentSource::Model` and are the
    /// only ones worth caching; degraded results carry `IntentSource::Heuristic`.
    pub async fn classify(
        &self,
        input: &str,
        conversation_id: &str,
        history: &ConversationHistory,
    ) -> Classification {
        match self.classify_remote(input, conversation_id, history).await {
            Ok(classification) => {
                info!(
                    "[classifier] {} → {} intent(s) via {}",
                    conversation_id,
                    classification.intents.len(),
                    self.model.name()
                );
                classification
            }
            Err(e) => {
                warn!("[classifier] Falling back to heuristics: {}", e);
                heuristic_fallback(input)
            }
        }
    }

    async fn classify_remote(
        &self,
        input: &str,
        conversation_id: &str,
        history: &ConversationHistory,
    ) -> EngineResult<Classification> {
        let mut messages = Vec::with_capacity(self.context_turns + 2);
        messages.push(ConversationTurn::system(SYSTEM_PROMPT));
        messages.extend(history.recent(conversation_id, self.context_turns));
        messages.push(ConversationTurn::user(input));

        let raw = self
            .model
            .complete_json(&messages)
            .await
            .map_err(|e| EngineError::Classification(e.to_string()))?;
        let classification = parse_model_output(&raw)?;

        // Record the canonical form so later context is shape-stable.
        let serialized = serde_json::to_string(&classification).unwrap_or(raw);
        history.append(
            conversation_id,
            [ConversationTurn::user(input), ConversationTurn::assistant(serialized)],
        );
        Ok(classification)
    }
}

// ── Heuristic fallback ─────────────────────────────────────────────────────

const SEND_WORDS: &[&str] = &["envoie", "envoye", "envois", "envoi", "écris", "ecris", "send", "post"];
const TELL_WORDS: &[&str] = &["dis", "dit", "réponds", "reponds", "reply", "tell"];
const REACT_WORDS: &[&str] = &["réagis", "reagis", "react", "like"];
const SHOW_WORDS: &[&str] = &["montre", "affiche", "show", "list"];

pub const HEURISTIC_CLARIFY: &str =
    "I couldn't work that out. Could you rephrase it, e.g. \"send 'hi' on #general\"?";

/// Degraded keyword classification used when the model is unavailable.
/// Looser than the pattern table: it only looks at the leading verb.
pub fn heuristic_fallback(input: &str) -> Classification {
    let text = input.trim();
    let (verb, rest) = split_first_word(text);
    let verb = verb.to_lowercase();

    let intent = if starts_with_any(&verb, REACT_WORDS) {
        Some(
            Intent::new(ActionType::React)
                .with("emoji", "👍")
                .with("target", REF_LAST_MESSAGE),
        )
    } else if starts_with_any(&verb, TELL_WORDS) && !rest.is_empty() {
        Some(
            Intent::new(ActionType::SendDm)
                .with("username", REF_LAST_CONVERSATION)
                .with("message", strip_pronoun(rest))
                .with("typing", true),
        )
    } else if starts_with_any(&verb, SEND_WORDS) && !rest.is_empty() {
        Some(
            Intent::new(ActionType::SendMessage)
                .with("target", REF_CURRENT_CHANNEL)
                .with("message", rest)
                .with("typing", true),
        )
    } else if starts_with_any(&verb, SHOW_WORDS) {
        Some(Intent::new(ActionType::GetMessages).with("limit", DEFAULT_RECENT_LIMIT as u64))
    } else {
        None
    };

    match intent {
        Some(intent) => {
            info!("[classifier] Heuristic → {} for '{}'", intent.action, truncate_str(text, 60));
            Classification {
                intents: vec![intent],
                human_response: None,
                reasoning: Some("heuristic fallback".into()),
                source: IntentSource::Heuristic,
            }
        }
        None => Classification {
            intents: vec![Intent::new(ActionType::Clarify).with("question", HEURISTIC_CLARIFY)],
            human_response: Some(HEURISTIC_CLARIFY.to_string()),
            reasoning: Some("heuristic fallback".into()),
            source: IntentSource::Heuristic,
        },
    }
}

fn split_first_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (s, ""),
    }
}

fn strip_pronoun(s: &str) -> &str {
    let (first, rest) = split_first_word(s);
    match first.to_lowercase().as_str() {
        "leur" | "lui" | "them" | "him" | "her" if !rest.is_empty() => rest,
        _ => s,
    }
}

fn starts_with_any(s: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| s.starts_with(p))
}
