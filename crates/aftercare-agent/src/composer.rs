//! Merges handler outcomes into one customer reply.

use std::collections::HashSet;

use serde::Serialize;

use crate::escalation::EscalationSignal;
use crate::handler::{HandlerOutcome, OutcomeStatus, TurnAction};

/// Handoff notice that opens every escalated reply.
pub const HANDOFF_NOTICE: &str =
    "I'm connecting you with a specialist who will take it from here.";

/// Used when no outcome has anything to say.
pub const FALLBACK_REPLY: &str =
    "I need a bit more information to help you. Could you tell me more about your order or the issue?";

/// Final reply for one turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ComposedReply {
    pub text: String,
    pub actions: Vec<TurnAction>,
}

/// Compose a reply. Pure and deterministic for a given input.
///
/// Outcomes are ordered by priority (stable for equal priority). A request
/// for clarification is dropped when a higher-priority outcome already
/// resolved the turn. Each order's status line appears at most once.
///
/// Once escalated the reply carries the handoff notice, status lines of
/// resolved outcomes and receipts for actions already taken. Suggestions and
/// offers are left to the specialist.
pub fn compose(outcomes: &[HandlerOutcome], signal: &EscalationSignal) -> ComposedReply {
    let mut ordered: Vec<&HandlerOutcome> = outcomes.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut parts: Vec<String> = Vec::new();
    if signal.escalate {
        parts.push(HANDOFF_NOTICE.to_string());
    }

    let mut seen_orders: HashSet<&str> = HashSet::new();
    let mut resolved_above = false;
    let mut actions = Vec::new();
    for outcome in ordered {
        actions.extend(outcome.actions.iter().cloned());

        let keep = if signal.escalate {
            outcome.status == OutcomeStatus::Resolved
        } else if outcome.status.asks_customer() {
            !resolved_above
        } else {
            true
        };
        if outcome.status.is_success() {
            resolved_above = true;
        }
        if !keep {
            continue;
        }

        if let Some(note) = &outcome.status_note {
            // The first outcome to mention an order owns its status line.
            if seen_orders.insert(note.order_id.as_str()) {
                parts.push(note.text.clone());
            }
        }
        let is_receipt = !outcome.actions.is_empty();
        if !outcome.summary.is_empty() && (!signal.escalate || is_receipt) {
            parts.push(outcome.summary.clone());
        }
    }

    if parts.is_empty() {
        parts.push(FALLBACK_REPLY.to_string());
    }
    ComposedReply {
        text: parts.join(" "),
        actions,
    }
}
