//! Human handoff decisions.
//!
//! Evaluation is pure: it reads the session counters, the turn's intent and
//! outcomes and the configured policy, and names the first trigger that fires.

use aftercare_core::config::EscalationConfig;
use aftercare_core::types::{EscalationReason, Session};

use crate::handler::{HandlerOutcome, OutcomeStatus};
use crate::intent::{Intent, IntentLabel};

/// Decision for one turn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EscalationSignal {
    pub escalate: bool,
    pub reason: Option<EscalationReason>,
}

impl EscalationSignal {
    pub fn none() -> Self {
        Self {
            escalate: false,
            reason: None,
        }
    }

    pub fn because(reason: EscalationReason) -> Self {
        Self {
            escalate: true,
            reason: Some(reason),
        }
    }
}

/// Counters as they stand after the turn's outcomes were applied.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TurnCounters {
    pub failed_resolution_attempts: u32,
    pub low_confidence_streak: u32,
    pub turns_without_resolution: u32,
    pub order_total: Option<f64>,
}

impl TurnCounters {
    pub fn from_session(session: &Session) -> Self {
        Self {
            failed_resolution_attempts: session.failed_resolution_attempts,
            low_confidence_streak: session.low_confidence_streak,
            turns_without_resolution: session.turns_without_resolution,
            order_total: session.facts.order_total,
        }
    }
}

/// Input to [`evaluate`].
pub struct EscalationInput<'a> {
    pub already_escalated: bool,
    pub intent: &'a Intent,
    pub text: &'a str,
    pub outcomes: &'a [HandlerOutcome],
    pub counters: TurnCounters,
    /// The classifier's confidence threshold, if one is configured.
    pub min_confidence: Option<f32>,
}

/// Decide whether the turn hands off to a human.
///
/// Triggers are checked in a fixed order and the first match is the reason.
pub fn evaluate(input: &EscalationInput<'_>, policy: &EscalationConfig) -> EscalationSignal {
    if input.already_escalated {
        return EscalationSignal::because(EscalationReason::AlreadyEscalated);
    }
    if input.intent.label == IntentLabel::Escalate {
        return EscalationSignal::because(EscalationReason::CustomerRequest);
    }
    if matches_keyword(input.text, &policy.keywords) {
        return EscalationSignal::because(EscalationReason::KeywordTrigger);
    }
    if input.outcomes.iter().any(|o| o.status == OutcomeStatus::Fatal) {
        return EscalationSignal::because(EscalationReason::FatalOutcome);
    }
    if input
        .outcomes
        .iter()
        .any(|o| o.status == OutcomeStatus::RequiresApproval)
    {
        return EscalationSignal::because(EscalationReason::ApprovalRequired);
    }
    if let Some(max) = policy.max_failed_resolutions {
        if input.counters.failed_resolution_attempts > max {
            return EscalationSignal::because(EscalationReason::RepeatedResolutionFailure);
        }
    }
    if input.min_confidence.is_some()
        && policy.low_confidence_turns > 0
        && input.counters.low_confidence_streak >= policy.low_confidence_turns
    {
        return EscalationSignal::because(EscalationReason::PersistentLowConfidence);
    }
    if let (Some(limit), Some(total)) = (policy.high_value_order_limit, input.counters.order_total) {
        let money_intent = matches!(
            input.intent.label,
            IntentLabel::RequestRefund | IntentLabel::RequestExchange | IntentLabel::ReportDefect
        );
        if money_intent && total > limit {
            return EscalationSignal::because(EscalationReason::HighValueOrder);
        }
    }
    if let Some(max) = policy.max_turns_without_resolution {
        if input.counters.turns_without_resolution > max {
            return EscalationSignal::because(EscalationReason::TurnLimit);
        }
    }
    EscalationSignal::none()
}

fn matches_keyword(text: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return false;
    }
    let lowered = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .any(|k| !k.is_empty() && lowered.contains(&k))
}
