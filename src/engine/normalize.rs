// ── Pilot Engine: Intent Normalization ─────────────────────────────────────
//
// Structured model output arrives in several shapes. This is the single place
// where every variant is mapped to the canonical `Classification`; nothing
// downstream ever looks at raw model JSON.
//
// Accepted shapes:
//   {"actions":[{"type":..,"params":{..},"order":1}], "reasoning":.., "human_response":..}
//   {"action":"send_dm","params":{..}}            single intent
//   {"type":"SEND_DM","username":"x","message":"y"} params flattened
//   {"intent":{...}}                              nested wrapper
//   [{...},{...}]                                 bare list

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ActionType, Classification, Intent, IntentSource};
use serde_json::{Map, Value};

const ACTION_KEYS: [&str; 4] = ["type", "action", "action_type", "actionType"];
const PARAM_KEYS: [&str; 3] = ["params", "parameters", "args"];
const LIST_KEYS: [&str; 3] = ["actions", "intents", "steps"];
const RESPONSE_KEYS: [&str; 3] = ["human_response", "humanResponse", "response"];
// Keys on an action object that are never params.
const RESERVED: [&str; 5] = ["order", "reasoning", "human_response", "humanResponse", "response"];

/// Parse raw model text into a canonical classification.
pub fn parse_model_output(raw: &str) -> EngineResult<Classification> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| EngineError::Classification(format!("model output is not JSON: {e}")))?;
    normalize_value(&value, IntentSource::Model)
}

/// Map any accepted JSON shape to a `Classification`.
pub fn normalize_value(value: &Value, source: IntentSource) -> EngineResult<Classification> {
    let (intents, obj) = match value {
        Value::Array(items) => (collect_intents(items)?, None),
        Value::Object(obj) => {
            if let Some(inner) = obj.get("intent").filter(|v| v.is_object() || v.is_array()) {
                let mut nested = normalize_value(inner, source)?;
                nested.human_response = nested.human_response.or_else(|| first_str(obj, &RESPONSE_KEYS));
                nested.reasoning = nested.reasoning.or_else(|| first_str(obj, &["reasoning"]));
                return Ok(nested);
            }
            match LIST_KEYS.iter().find_map(|k| obj.get(*k)) {
                Some(Value::Array(items)) => (collect_intents(items)?, Some(obj)),
                Some(other) => {
                    return Err(EngineError::Classification(format!(
                        "'actions' must be a list, got {other}"
                    )))
                }
                None if has_action_key(obj) => (vec![intent_from_object(obj)?], Some(obj)),
                None => (Vec::new(), Some(obj)),
            }
        }
        other => {
            return Err(EngineError::Classification(format!(
                "expected an object or list, got {other}"
            )))
        }
    };

    let human_response = obj.and_then(|o| first_str(o, &RESPONSE_KEYS));
    let reasoning = obj.and_then(|o| first_str(o, &["reasoning"]));

    if intents.is_empty() && human_response.is_none() {
        return Err(EngineError::Classification("no actions in model output".into()));
    }

    Ok(Classification { intents, human_response, reasoning, source })
}

fn collect_intents(items: &[Value]) -> EngineResult<Vec<Intent>> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(obj) => intent_from_object(obj),
            other => Err(EngineError::Classification(format!(
                "action entry must be an object, got {other}"
            ))),
        })
        .collect()
}

fn has_action_key(obj: &Map<String, Value>) -> bool {
    ACTION_KEYS.iter().any(|k| obj.get(*k).is_some_and(Value::is_string))
}

fn intent_from_object(obj: &Map<String, Value>) -> EngineResult<Intent> {
    let name = ACTION_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .ok_or_else(|| EngineError::Classification("action entry has no type".into()))?;

    let mut intent = Intent::new(ActionType::from_name(name));

    match PARAM_KEYS.iter().find_map(|k| obj.get(*k)) {
        Some(Value::Object(params)) => intent.params = params.clone(),
        Some(Value::Null) | None => {
            // Flattened: every non-reserved sibling is a param.
            for (k, v) in obj {
                if !ACTION_KEYS.contains(&k.as_str()) && !RESERVED.contains(&k.as_str()) {
                    intent.params.insert(k.clone(), v.clone());
                }
            }
        }
        Some(other) => {
            return Err(EngineError::Classification(format!(
                "params for {name} must be an object, got {other}"
            )))
        }
    }

    intent.order = obj.get("order").and_then(|v| {
        v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    });
    intent.reasoning = obj.get("reasoning").and_then(Value::as_str).map(str::to_string);
    Ok(intent)
}

fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Models sometimes wrap JSON in a markdown fence even in JSON mode.
fn strip_code_fence(raw: &str) -> &str {
    let t = raw.trim();
    let Some(rest) = t.strip_prefix("```") else { return t };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_actions_list() {
        let raw = r#"{"actions":[
            {"type":"SEND_MESSAGE","params":{"target":"current_channel","message":"yo"},"order":2},
            {"type":"REACT","params":{"emoji":"🔥","target":"last_message"},"order":1}
        ],"reasoning":"two steps","human_response":"C'est fait !"}"#;
        let c = parse_model_output(raw).unwrap();
        assert_eq!(c.intents.len(), 2);
        assert_eq!(c.intents[0].action, ActionType::SendMessage);
        assert_eq!(c.intents[0].order, Some(2));
        assert_eq!(c.intents[1].str_param("emoji"), Some("🔥"));
        assert_eq!(c.human_response.as_deref(), Some("C'est fait !"));
        assert_eq!(c.reasoning.as_deref(), Some("two steps"));
        assert_eq!(c.source, IntentSource::Model);
    }

    #[test]
    fn single_action_with_parameters_key() {
        let v = json!({"action": "send-dm", "parameters": {"username": "bob", "message": "hi"}});
        let c = normalize_value(&v, IntentSource::Model).unwrap();
        assert_eq!(c.intents.len(), 1);
        assert_eq!(c.intents[0].action, ActionType::SendDm);
        assert_eq!(c.intents[0].str_param("username"), Some("bob"));
    }

    #[test]
    fn flattened_params() {
        let v = json!({"type": "sendDm", "username": "bob", "message": "hi", "order": "3", "reasoning": "r"});
        let c = normalize_value(&v, IntentSource::Model).unwrap();
        let i = &c.intents[0];
        assert_eq!(i.str_param("message"), Some("hi"));
        assert_eq!(i.order, Some(3));
        assert!(!i.params.contains_key("order"));
        assert!(!i.params.contains_key("type"));
        assert!(!i.params.contains_key("reasoning"));
    }

    #[test]
    fn nested_intent_wrapper() {
        let v = json!({"intent": {"type": "react", "params": {"emoji": "👍"}}, "human_response": "ok"});
        let c = normalize_value(&v, IntentSource::Model).unwrap();
        assert_eq!(c.intents[0].action, ActionType::React);
        assert_eq!(c.human_response.as_deref(), Some("ok"));
    }

    #[test]
    fn bare_list_and_unknown_names() {
        let v = json!([{"type": "TELEPORT", "params": {"where": "mars"}}, {"type": "JOIN_SERVER"}]);
        let c = normalize_value(&v, IntentSource::Model).unwrap();
        assert_eq!(c.intents[0].action, ActionType::Unknown("TELEPORT".into()));
        assert_eq!(c.intents[1].action, ActionType::JoinServer);
    }

    #[test]
    fn reply_only_output_is_accepted() {
        let c = parse_model_output(r#"{"actions":[],"human_response":"Salut !"}"#).unwrap();
        assert!(c.intents.is_empty());
        assert_eq!(c.human_response.as_deref(), Some("Salut !"));
    }

    #[test]
    fn code_fence_is_stripped() {
        let c = parse_model_output("```json\n{\"type\":\"list_servers\"}\n```").unwrap();
        assert_eq!(c.intents[0].action, ActionType::ListServers);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_model_output("sure, I'll do that").is_err());
        assert!(parse_model_output("{}").is_err());
        assert!(parse_model_output(r#"{"actions":"send"}"#).is_err());
        assert!(parse_model_output(r#"{"actions":[{"params":{}}]}"#).is_err());
        assert!(parse_model_output("42").is_err());
    }
}
