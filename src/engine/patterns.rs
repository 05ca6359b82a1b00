// ── Pilot Engine: Pattern Matcher ────────────────────────────────────────────
//
// Deterministic, zero-cost classifier mapping common phrasings (French and
// English) straight to intents. No I/O, never blocks, never fails.
//
// Rules are grouped and tried in a fixed priority order, first match wins:
//   1. reply-to-user : quoted replies / DMs to a named or implied person
//   2. send-message  : posts to a channel
//   3. react         : reactions to the last observed message
//   4. show-recent   : recent messages, servers, channels, user lookup
//   5. typing-toggle : typing indicator and presence
//   6. greeting-default : bare greetings posted to the current channel
//
// The order is a tie-break: specific, costly-to-misfire patterns come before
// generic ones. Reordering changes behaviour.

use crate::atoms::constants::{
    DEFAULT_RECENT_LIMIT, MAX_RECENT_LIMIT, REF_CURRENT_CHANNEL, REF_LAST_CONVERSATION,
    REF_LAST_MESSAGE,
};
use crate::atoms::types::{
    ActionType, Classification, Intent, IntentSource, PresenceStatus,
};
use log::{debug, warn};
use regex::{Captures, Regex};
use std::sync::LazyLock;

// ── Public surface ─────────────────────────────────────────────────────────

/// What to return when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedPolicy {
    /// Produce a `clarify` intent asking the operator to rephrase.
    AskClarification,
    /// Report `NoMatch` so the caller can try the semantic classifier.
    FallThrough,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternOutcome {
    Matched(Classification),
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleGroup {
    ReplyToUser,
    SendMessage,
    React,
    ShowRecent,
    TypingToggle,
    GreetingDefault,
}

pub const CLARIFY_PROMPT: &str =
    "🤔 I'm not sure what you want me to do. Try something like \"send 'hi' on #general\" or \"react with 👍\".";

/// Classify `input` with the ordered rule table.
pub fn match_input(input: &str, policy: UnmatchedPolicy) -> PatternOutcome {
    let text = input.trim();
    if !text.is_empty() {
        for rule in RULES.iter() {
            let Some(caps) = rule.pattern.captures(text) else { continue };
            if let Some(intents) = (rule.extract)(&caps) {
                debug!("[patterns] '{}' matched rule {} ({:?})", text, rule.name, rule.group);
                return PatternOutcome::Matched(Classification {
                    intents,
                    human_response: None,
                    reasoning: Some(format!("pattern:{}", rule.name)),
                    source: IntentSource::Pattern,
                });
            }
        }
    }

    match policy {
        UnmatchedPolicy::FallThrough => PatternOutcome::NoMatch,
        UnmatchedPolicy::AskClarification => PatternOutcome::Matched(clarification()),
    }
}

/// The canned "please rephrase" classification.
pub fn clarification() -> Classification {
    Classification {
        intents: vec![Intent::new(ActionType::Clarify).with("question", CLARIFY_PROMPT)],
        human_response: Some(CLARIFY_PROMPT.to_string()),
        reasoning: Some("no rule matched".into()),
        source: IntentSource::Pattern,
    }
}

/// Rule names in priority order (for diagnostics and tests).
pub fn rule_names() -> Vec<(&'static str, RuleGroup)> {
    RULES.iter().map(|r| (r.name, r.group)).collect()
}

// ── Rule table ─────────────────────────────────────────────────────────────

type Extract = fn(&Captures) -> Option<Vec<Intent>>;

struct Rule {
    name: &'static str,
    group: RuleGroup,
    pattern: Regex,
    extract: Extract,
}

const SEND_VERBS: &str = r"(?:envoie|envoi|envoies|écris|ecris|poste|post|send|write)";
const QUOTE_OPEN: &str = r#"["«“']"#;
const QUOTE_CLOSE: &str = r#"["»”']"#;

type RuleDef = (&'static str, RuleGroup, String, Extract);

fn rule(name: &'static str, group: RuleGroup, pattern: String, extract: Extract) -> RuleDef {
    (name, group, pattern, extract)
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let defs: Vec<RuleDef> = vec![
        // ── reply-to-user ──────────────────────────────────────────────
        rule(
            "quoted_reply_to_user",
            RuleGroup::ReplyToUser,
            format!(
                r"(?i)^(?:réponds?|reponds?|reply)\s+(?:à|a|to)\s+@?(?P<user>[\w.\-]+)\s*[:,]?\s*{QUOTE_OPEN}(?P<msg>.+){QUOTE_CLOSE}\s*$"
            ),
            |c| Some(vec![dm(&c["user"], &c["msg"])]),
        ),
        rule(
            "dm_to_user",
            RuleGroup::ReplyToUser,
            format!(
                r"(?i)^{SEND_VERBS}\s+(?:un\s+|a\s+)?(?:dm|mp|pm|message\s+priv[ée]|private\s+message)\s+(?:à|a|to)\s+@?(?P<user>[\w.\-]+)\s*[:,]?\s*(?P<msg>.+)$"
            ),
            |c| Some(vec![dm(&c["user"], &unquote(&c["msg"]))]),
        ),
        rule(
            "message_to_user",
            RuleGroup::ReplyToUser,
            format!(
                r"(?i)^{SEND_VERBS}\s+(?:un\s+|a\s+)?message\s+(?:à|a|to)\s+@?(?P<user>[\w.\-]+)\s*[:,]\s*(?P<msg>.+)$"
            ),
            |c| {
                if is_everyone(&c["user"]) {
                    return None;
                }
                Some(vec![dm(&c["user"], &unquote(&c["msg"]))])
            },
        ),
        rule(
            "tell_them",
            RuleGroup::ReplyToUser,
            r"(?i)^(?:dis|dit|tell|say)[\s\-]+(?:leur|lui|them|him|her)\s+(?P<msg>.+)$".to_string(),
            |c| Some(vec![dm(REF_LAST_CONVERSATION, &unquote(&c["msg"]))]),
        ),
        rule(
            "tell_named_user",
            RuleGroup::ReplyToUser,
            r"(?i)^(?:dis|dit|tell)\s+(?:à|a)?\s*@(?P<user>[\w.\-]+)\s*[:,]?\s*(?:que\s+|that\s+)?(?P<msg>.+)$"
                .to_string(),
            |c| Some(vec![dm(&c["user"], &unquote(&c["msg"]))]),
        ),
        rule(
            "reply_to_named_user",
            RuleGroup::ReplyToUser,
            r"(?i)^(?:réponds?|reponds?|reply)\s+(?:à|a|to)\s+@?(?P<user>[\w.\-]+)\s*[:,]?\s+(?P<msg>.+)$"
                .to_string(),
            |c| {
                let user = &c["user"];
                if is_everyone(user) {
                    return None;
                }
                let user = if is_pronoun(user) { REF_LAST_CONVERSATION } else { user };
                Some(vec![dm(user, &unquote(&c["msg"]))])
            },
        ),
        rule(
            "reply_last",
            RuleGroup::ReplyToUser,
            r"(?i)^(?:réponds?|reponds?|reply)(?:[\s\-]+(?:lui|leur|him|her|them))?\s*[:,]?\s+(?P<msg>.+)$"
                .to_string(),
            |c| {
                if starts_with_addressee(&c["msg"]) {
                    return None;
                }
                Some(vec![dm(REF_LAST_CONVERSATION, &unquote(&c["msg"]))])
            },
        ),
        // ── send-message ───────────────────────────────────────────────
        rule(
            "quoted_message_to_channel",
            RuleGroup::SendMessage,
            format!(
                r"(?i)^{SEND_VERBS}\s+{QUOTE_OPEN}(?P<msg>.+){QUOTE_CLOSE}\s+(?:sur|dans|in|on|to)\s+(?P<target>#?[\w\-]+)\s*$"
            ),
            |c| Some(vec![channel_message(&c["target"], &c["msg"])]),
        ),
        rule(
            "message_on_channel",
            RuleGroup::SendMessage,
            format!(
                r"(?i)^{SEND_VERBS}\s+(?:un\s+|a\s+)?(?:message\s+)?(?:sur|dans|in|on|to)\s+(?P<target>#[\w\-]+)\s*[:,]?\s*(?P<msg>.+)$"
            ),
            |c| Some(vec![channel_message(&c["target"], &unquote(&c["msg"]))]),
        ),
        rule(
            "message_here",
            RuleGroup::SendMessage,
            format!(r"(?i)^{SEND_VERBS}\s+(?:un\s+message\s*|a\s+message\s*)?[:,]?\s*(?P<msg>.+)$"),
            |c| {
                let msg = unquote(&c["msg"]);
                if msg.is_empty() {
                    return None;
                }
                Some(vec![channel_message(REF_CURRENT_CHANNEL, &msg)])
            },
        ),
        // ── react ──────────────────────────────────────────────────────
        rule(
            "react_with",
            RuleGroup::React,
            r"(?i)^(?:réagis|reagis|réagir|reagir|react)\s+(?:avec\s+|with\s+|par\s+)?(?P<emoji>\S+)\s*$"
                .to_string(),
            |c| {
                Some(vec![Intent::new(ActionType::React)
                    .with("emoji", &c["emoji"])
                    .with("target", REF_LAST_MESSAGE)])
            },
        ),
        rule(
            "like_last",
            RuleGroup::React,
            r"(?i)^(?:like|mets\s+un\s+like|j'aime)(?:\s+(?:le\s+dernier\s+message|the\s+last\s+message|ça|ca|it))?\s*!?$"
                .to_string(),
            |_| {
                Some(vec![Intent::new(ActionType::React)
                    .with("emoji", "👍")
                    .with("target", REF_LAST_MESSAGE)])
            },
        ),
        // ── show-recent ────────────────────────────────────────────────
        rule(
            "show_recent_messages",
            RuleGroup::ShowRecent,
            r"(?i)^(?:montre|affiche|show|list|liste|get)(?:[\s\-]+(?:moi|me))?\s+(?:les\s+|the\s+|my\s+)?(?:(?P<n>\d+)\s+)?(?:derniers?\s+|recent\s+|latest\s+|last\s+)?(?:messages?|msgs?)\b.*$"
                .to_string(),
            |c| {
                let limit = c
                    .name("n")
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .unwrap_or(DEFAULT_RECENT_LIMIT)
                    .clamp(1, MAX_RECENT_LIMIT);
                Some(vec![Intent::new(ActionType::GetMessages).with("limit", limit as u64)])
            },
        ),
        rule(
            "list_servers",
            RuleGroup::ShowRecent,
            r"(?i)^(?:montre|affiche|show|list|liste)(?:[\s\-]+(?:moi|me))?\s+(?:les\s+|the\s+|my\s+|mes\s+)?(?:serveurs?|servers?|guilds?)\s*$"
                .to_string(),
            |_| Some(vec![Intent::new(ActionType::ListServers)]),
        ),
        rule(
            "list_channels",
            RuleGroup::ShowRecent,
            r"(?i)^(?:montre|affiche|show|list|liste)(?:[\s\-]+(?:moi|me))?\s+(?:les\s+|the\s+|my\s+|mes\s+)?(?:channels?|salons?|canaux)\s*$"
                .to_string(),
            |_| Some(vec![Intent::new(ActionType::ListChannels)]),
        ),
        rule(
            "search_user",
            RuleGroup::ShowRecent,
            r"(?i)^(?:cherche|trouve|find|search|look\s*up|qui\s+est)\s+(?:l'utilisateur\s+|user\s+)?@?(?P<user>[\w.\-]+)\s*\??$"
                .to_string(),
            |c| Some(vec![Intent::new(ActionType::SearchUser).with("username", &c["user"])]),
        ),
        // ── typing-toggle ──────────────────────────────────────────────
        rule(
            "typing_off",
            RuleGroup::TypingToggle,
            r"(?i)^(?:arrête|arrete|stop)(?:\s+de)?\s+(?:taper|écrire|ecrire|typing)\s*$".to_string(),
            |_| Some(vec![typing(false)]),
        ),
        rule(
            "typing_on",
            RuleGroup::TypingToggle,
            r"(?i)^(?:tape|commence\s+à\s+taper|commence\s+a\s+taper|fais\s+semblant\s+d'écrire|start\s+typing|typing)\s*$"
                .to_string(),
            |_| Some(vec![typing(true)]),
        ),
        rule(
            "set_status",
            RuleGroup::TypingToggle,
            r"(?i)^(?:mets[\s\-]+(?:toi|moi)\s+en|passe\s+en|set\s+(?:my\s+)?status\s+(?:to\s+)?|statut\s*:?\s*|status\s*:?\s*)(?P<status>.+?)\s*$"
                .to_string(),
            |c| {
                let status = PresenceStatus::parse(&c["status"])?;
                Some(vec![Intent::new(ActionType::SetStatus).with("status", status.as_str())])
            },
        ),
        // ── greeting-default ───────────────────────────────────────────
        rule(
            "bare_greeting",
            RuleGroup::GreetingDefault,
            r"(?i)^(?P<greeting>salut|bonjour|bonsoir|hello|hi|hey|yo|coucou)(?:\s+(?:à\s+tous|tout\s+le\s+monde|everyone|all))?[\s!.]*$"
                .to_string(),
            |c| Some(vec![channel_message(REF_CURRENT_CHANNEL, c.get(0).map_or("", |m| m.as_str()))]),
        ),
    ];

    defs
        .into_iter()
        .filter_map(|(name, group, pattern, extract)| match Regex::new(&pattern) {
            Ok(pattern) => Some(Rule { name, group, pattern, extract }),
            Err(e) => {
                warn!("[patterns] Failed to compile rule '{}': {}", name, e);
                None
            }
        })
        .collect()
});

/// "à alice", "to bob": the text names an addressee rather than being the reply.
fn starts_with_addressee(msg: &str) -> bool {
    let first = msg.split_whitespace().next().unwrap_or_default().to_lowercase();
    matches!(first.as_str(), "à" | "to")
}

fn is_pronoun(word: &str) -> bool {
    matches!(word.to_lowercase().as_str(), "lui" | "leur" | "him" | "her" | "them")
}

fn is_everyone(word: &str) -> bool {
    matches!(word.to_lowercase().as_str(), "tous" | "tout" | "everyone" | "all" | "everybody")
}

// ── Intent builders ────────────────────────────────────────────────────────

fn dm(user: &str, message: &str) -> Intent {
    Intent::new(ActionType::SendDm)
        .with("username", user.trim())
        .with("message", message.trim())
        .with("typing", true)
}

fn channel_message(target: &str, message: &str) -> Intent {
    Intent::new(ActionType::SendMessage)
        .with("target", target.trim())
        .with("message", message.trim())
        .with("typing", true)
}

fn typing(on: bool) -> Intent {
    Intent::new(ActionType::SetTyping)
        .with("target", REF_CURRENT_CHANNEL)
        .with("on", on)
}

/// Strip one layer of surrounding quotes.
fn unquote(s: &str) -> String {
    let t = s.trim();
    let mut chars = t.chars();
    match (chars.next(), chars.next_back()) {
        (Some(a), Some(b)) if "\"«“'".contains(a) && "\"»”'".contains(b) => {
            chars.as_str().trim().to_string()
        }
        _ => t.to_string(),
    }
}
