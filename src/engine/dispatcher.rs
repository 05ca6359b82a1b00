// ── Pilot Engine: Action Dispatcher ────────────────────────────────────────
//
// Orders a resolved batch and runs it strictly one action at a time.
//   - Sort key: explicit `order` (missing = 0), ties by original position
//   - Each action is isolated: errors and panics become failed results
//   - A paced pause separates consecutive actions; single actions have none

use crate::atoms::types::{ActionResult, ResolvedAction};
use crate::engine::handlers::{self, ActionContext};
use futures::FutureExt;
use log::{info, warn};
use std::panic::AssertUnwindSafe;

/// Stable sort by `order.unwrap_or(0)`, then by original position.
pub fn order_actions(mut actions: Vec<ResolvedAction>) -> Vec<ResolvedAction> {
    actions.sort_by_key(|a| (a.order.unwrap_or(0), a.position));
    actions
}

pub struct ActionDispatcher;

impl ActionDispatcher {
    /// Execute `actions` sequentially and return one result per action, in
    /// execution order.
    pub async fn dispatch(ctx: ActionContext<'_>, actions: Vec<ResolvedAction>) -> Vec<ActionResult> {
        let actions = order_actions(actions);
        let total = actions.len();
        let mut results = Vec::with_capacity(total);

        for (i, action) in actions.iter().enumerate() {
            if i > 0 {
                ctx.pacer.between_actions().await;
            }
            results.push(Self::run_one(ctx, action, i + 1, total).await);
        }
        results
    }

    async fn run_one(
        ctx: ActionContext<'_>,
        action: &ResolvedAction,
        step: usize,
        total: usize,
    ) -> ActionResult {
        info!("[dispatcher] {}/{} {}", step, total, action.action);
        let outcome = AssertUnwindSafe(handlers::execute(ctx, action))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("[dispatcher] {} failed: {}", action.action, e);
                ActionResult::failed(action.action.clone(), e.to_string())
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                warn!("[dispatcher] {} panicked: {}", action.action, detail);
                ActionResult::failed(action.action.clone(), format!("handler crashed: {detail}"))
            }
        }
    }
}
