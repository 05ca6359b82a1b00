// ── Pilot Engine: Result Aggregator ────────────────────────────────────────
//
// Reduces a batch of ActionResults to one verdict and one reply line.

use crate::atoms::types::{ActionResult, ActionType};
use rand::seq::SliceRandom;

const ALL_SUCCEEDED: [&str; 5] = [
    "✅ Done!",
    "✅ All set 👍",
    "✅ Finished!",
    "✅ Sorted, all good!",
    "✅ Perfect, everything went through!",
];
pub const NONE_SUCCEEDED: &str = "❌ Sorry, I couldn't carry out that request.";
pub const NOTHING_TO_DO: &str = "Nothing to do.";

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub success: bool,
    pub message: String,
}

/// Overall success is true iff no result is explicitly failed.
/// `human_response`, when present, is used verbatim.
pub fn aggregate(results: &[ActionResult], human_response: Option<&str>) -> Verdict {
    let total = results.len();
    let succeeded = results.iter().filter(|r| r.success).count();
    let success = succeeded == total;

    if let Some(reply) = human_response.map(str::trim).filter(|s| !s.is_empty()) {
        return Verdict { success, message: reply.to_string() };
    }

    let message = if total == 0 {
        NOTHING_TO_DO.to_string()
    } else if results.iter().all(|r| r.action == ActionType::Clarify) {
        results.iter().map(|r| r.message.as_str()).collect::<Vec<_>>().join("\n")
    } else {
        canned_reply(succeeded, total)
    };
    Verdict { success, message }
}

/// Deterministic on the ratio; random only among equivalent all-success lines.
pub fn canned_reply(succeeded: usize, total: usize) -> String {
    if succeeded == 0 {
        NONE_SUCCEEDED.to_string()
    } else if succeeded == total {
        ALL_SUCCEEDED
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(ALL_SUCCEEDED[0])
            .to_string()
    } else {
        format!("⚠️ {succeeded}/{total} actions succeeded")
    }
}

pub fn is_all_succeeded_phrase(message: &str) -> bool {
    ALL_SUCCEEDED.contains(&message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> ActionResult {
        ActionResult::ok(ActionType::React, "ok")
    }

    fn bad() -> ActionResult {
        ActionResult::failed(ActionType::SendDm, "Missing Permissions")
    }

    #[test]
    fn all_succeeded_uses_pool() {
        let v = aggregate(&[ok(), ok()], None);
        assert!(v.success);
        assert!(is_all_succeeded_phrase(&v.message));
    }

    #[test]
    fn partial_reports_ratio() {
        let v = aggregate(&[ok(), bad(), ok()], None);
        assert!(!v.success);
        assert_eq!(v.message, "⚠️ 2/3 actions succeeded");
    }

    #[test]
    fn none_succeeded() {
        let v = aggregate(&[bad()], None);
        assert!(!v.success);
        assert_eq!(v.message, NONE_SUCCEEDED);
    }

    #[test]
    fn human_response_is_verbatim() {
        let v = aggregate(&[ok()], Some("C'est envoyé 😉"));
        assert_eq!(v.message, "C'est envoyé 😉");
        let v = aggregate(&[bad()], Some("  "));
        assert_eq!(v.message, NONE_SUCCEEDED);
    }

    #[test]
    fn empty_batch_is_success() {
        let v = aggregate(&[], None);
        assert!(v.success);
        assert_eq!(v.message, NOTHING_TO_DO);
    }

    #[test]
    fn clarification_is_echoed() {
        let v = aggregate(&[ActionResult::ok(ActionType::Clarify, "Which channel?")], None);
        assert!(v.success);
        assert_eq!(v.message, "Which channel?");
    }

    #[test]
    fn missing_success_flag_counts_as_success() {
        let r: ActionResult = serde_json::from_str(r#"{"action":"react","message":"ok"}"#).unwrap();
        assert!(aggregate(&[r], None).success);
    }
}
