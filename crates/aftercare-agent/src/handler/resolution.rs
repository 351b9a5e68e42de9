//! Refunds and exchanges against the payment service.
//!
//! The only handler with side effects. Refunds above the auto-approve limit
//! are held for a human instead of submitted.

use aftercare_adapters::{
    ExchangeRequest, ExternalCallRecord, RefundRequest, ServiceError, ServiceRequest,
    ServiceResponse, Transaction,
};

use super::{
    unavailable, view, CallView, CapabilityHandler, HandlerContext, HandlerOutcome, HandlerPlan,
    OutcomePayload, OutcomeStatus, TurnAction,
};
use crate::intent::{Intent, IntentLabel};
use crate::router::Capability;

/// Transaction states that stop automated handling.
const FATAL_STATES: &[&str] = &["blocked", "fraud_review"];

#[derive(Debug, Default)]
pub struct ResolutionHandler;

fn ask(summary: &str) -> HandlerOutcome {
    HandlerOutcome::new(
        Capability::Resolution,
        OutcomeStatus::NeedsClarification,
        summary,
    )
}

fn is_exchange(intent: &Intent) -> bool {
    intent.label == IntentLabel::RequestExchange
}

/// One key per session turn and kind, so a resubmitted request is
/// recognisable downstream.
fn idempotency_key(ctx: &HandlerContext<'_>, kind: &str) -> String {
    format!("{}:{}:{}", ctx.session.id, ctx.session.messages.len(), kind)
}

fn needs_approval(summary: String) -> HandlerPlan {
    HandlerPlan::Immediate(HandlerOutcome::new(
        Capability::Resolution,
        OutcomeStatus::RequiresApproval,
        summary,
    ))
}

impl CapabilityHandler for ResolutionHandler {
    fn capability(&self) -> Capability {
        Capability::Resolution
    }

    fn plan(&self, ctx: &HandlerContext<'_>, intent: &Intent) -> HandlerPlan {
        let Some(order_id) = ctx.facts.order_id.clone() else {
            return HandlerPlan::Immediate(ask(
                "Could you share your order number so I can process this for you?",
            ));
        };

        if is_exchange(intent) {
            return match &ctx.facts.recommended_item {
                Some(item) => HandlerPlan::Calls(vec![ServiceRequest::Exchange(ExchangeRequest {
                    order_id,
                    new_item_id: item.clone(),
                    idempotency_key: idempotency_key(ctx, "exchange"),
                })]),
                None => HandlerPlan::Immediate(ask(
                    "Which item would you like to exchange it for?",
                )),
            };
        }

        let amount = ctx.facts.order_total;
        match (amount, ctx.escalation.refund_auto_approve_limit) {
            (Some(amount), Some(limit)) if amount > limit => {
                return needs_approval(format!(
                    "A refund of ${:.2} for order #{} needs approval from our team.",
                    amount, order_id
                ));
            }
            // Without a total the limit can't be checked.
            (None, Some(_)) => {
                return needs_approval(format!(
                    "I couldn't confirm the total for order #{}, so our team needs to approve this refund.",
                    order_id
                ));
            }
            _ => {}
        }

        let reason = ctx
            .facts
            .last_defect
            .clone()
            .unwrap_or_else(|| "customer_request".to_string());
        HandlerPlan::Calls(vec![ServiceRequest::Refund(RefundRequest {
            order_id,
            amount,
            reason,
            idempotency_key: idempotency_key(ctx, "refund"),
        })])
    }

    fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        intent: &Intent,
        records: &[ExternalCallRecord],
    ) -> HandlerOutcome {
        let view = view(records);
        let tx = match &view {
            CallView::Ok(ServiceResponse::Transaction(tx)) => tx,
            CallView::Failed(ServiceError::Unprocessable(_) | ServiceError::NotFound(_)) => {
                return HandlerOutcome::new(
                    Capability::Resolution,
                    OutcomeStatus::Failed {
                        retry_eligible: false,
                    },
                    "The payment service couldn't accept this request for your order.",
                )
            }
            other => return unavailable(Capability::Resolution, other, "payment service"),
        };

        let order_id = match records.first().map(|r| &r.request) {
            Some(ServiceRequest::Refund(req)) => req.order_id.clone(),
            Some(ServiceRequest::Exchange(req)) => req.order_id.clone(),
            _ => ctx.facts.order_id.clone().unwrap_or_default(),
        };
        let payload = OutcomePayload::Transaction(tx.clone());

        if FATAL_STATES.contains(&tx.status.as_str()) {
            return HandlerOutcome::new(
                Capability::Resolution,
                OutcomeStatus::Fatal,
                "This request needs a manual review before it can go ahead.",
            )
            .with_payload(payload);
        }
        if tx.is_rejected() {
            return HandlerOutcome::new(
                Capability::Resolution,
                OutcomeStatus::Failed {
                    retry_eligible: false,
                },
                "I wasn't able to complete that request; the payment service declined it.",
            )
            .with_payload(payload);
        }

        let outcome = if is_exchange(intent) {
            exchanged(records, &order_id, tx)
        } else {
            refunded(records, &order_id, tx)
        };
        let note_status = tx
            .order_status
            .clone()
            .unwrap_or_else(|| tx.status.clone())
            .replace('_', " ");
        outcome
            .with_note(&order_id, format!("Order #{} status: {}.", order_id, note_status))
            .with_payload(payload)
    }
}

fn refunded(records: &[ExternalCallRecord], order_id: &str, tx: &Transaction) -> HandlerOutcome {
    let amount = match records.first().map(|r| &r.request) {
        Some(ServiceRequest::Refund(req)) => req.amount,
        _ => None,
    };
    let summary = match amount {
        Some(amount) => format!(
            "I've issued a refund of ${:.2} for order #{} (reference {}).",
            amount, order_id, tx.transaction_id
        ),
        None => format!(
            "I've issued a refund for order #{} (reference {}).",
            order_id, tx.transaction_id
        ),
    };
    HandlerOutcome::new(Capability::Resolution, OutcomeStatus::Resolved, summary).with_action(
        TurnAction::RefundIssued {
            order_id: order_id.to_string(),
            transaction_id: tx.transaction_id.clone(),
            amount,
            status: tx.status.clone(),
        },
    )
}

fn exchanged(records: &[ExternalCallRecord], order_id: &str, tx: &Transaction) -> HandlerOutcome {
    let new_item_id = match records.first().map(|r| &r.request) {
        Some(ServiceRequest::Exchange(req)) => req.new_item_id.clone(),
        _ => String::new(),
    };
    HandlerOutcome::new(
        Capability::Resolution,
        OutcomeStatus::Resolved,
        format!(
            "I've set up the exchange for order #{} (reference {}).",
            order_id, tx.transaction_id
        ),
    )
    .with_action(TurnAction::ExchangeCreated {
        order_id: order_id.to_string(),
        transaction_id: tx.transaction_id.clone(),
        new_item_id,
        status: tx.status.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::*;
    use aftercare_adapters::CallStatus;
    use aftercare_core::types::Message;

    fn refund() -> Intent {
        Intent::new(IntentLabel::RequestRefund, 0.9)
    }

    fn tx(status: &str) -> Transaction {
        Transaction {
            transaction_id: "RF-1".into(),
            status: status.into(),
            order_status: Some("refund_pending".into()),
        }
    }

    fn refund_request(amount: Option<f64>) -> ServiceRequest {
        ServiceRequest::Refund(RefundRequest {
            order_id: "123".into(),
            amount,
            reason: "tear".into(),
            idempotency_key: "k".into(),
        })
    }

    #[test]
    fn test_no_order_asks_for_it() {
        let fx = Fixture::new("refund please");
        let outcome = immediate(ResolutionHandler.plan(&fx.ctx(), &refund()));
        assert_eq!(outcome.status, OutcomeStatus::NeedsClarification);
    }

    #[test]
    fn test_refund_request_carries_total_and_defect() {
        let mut fx = Fixture::new("refund please").with_order("123");
        fx.facts.order_total = Some(39.99);
        fx.facts.last_defect = Some("tear".into());
        let calls = calls(ResolutionHandler.plan(&fx.ctx(), &refund()));
        assert_eq!(
            calls,
            vec![ServiceRequest::Refund(RefundRequest {
                order_id: "123".into(),
                amount: Some(39.99),
                reason: "tear".into(),
                idempotency_key: format!("{}:0:refund", fx.session.id),
            })]
        );
    }

    #[test]
    fn test_idempotency_key_follows_the_turn() {
        let mut fx = Fixture::new("refund please").with_order("123");
        let first = calls(ResolutionHandler.plan(&fx.ctx(), &refund()));
        assert_eq!(first, calls(ResolutionHandler.plan(&fx.ctx(), &refund())));

        fx.session.messages.push(Message::customer("refund please"));
        let next = calls(ResolutionHandler.plan(&fx.ctx(), &refund()));
        assert_ne!(first, next);
    }

    #[test]
    fn test_refund_without_defect_uses_customer_request_reason() {
        let fx = Fixture::new("refund please").with_order("123");
        let calls = calls(ResolutionHandler.plan(&fx.ctx(), &refund()));
        match &calls[0] {
            ServiceRequest::Refund(req) => {
                assert_eq!(req.reason, "customer_request");
                assert!(req.amount.is_none());
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_refund_above_limit_requires_approval() {
        let mut fx = Fixture::new("refund please").with_order("123");
        fx.facts.order_total = Some(900.0);
        fx.escalation.refund_auto_approve_limit = Some(500.0);
        let outcome = immediate(ResolutionHandler.plan(&fx.ctx(), &refund()));
        assert_eq!(outcome.status, OutcomeStatus::RequiresApproval);
        assert!(outcome.summary.contains("$900.00"));
    }

    #[test]
    fn test_unknown_total_with_limit_requires_approval() {
        let mut fx = Fixture::new("refund please").with_order("456");
        fx.escalation.refund_auto_approve_limit = Some(100.0);
        let outcome = immediate(ResolutionHandler.plan(&fx.ctx(), &refund()));
        assert_eq!(outcome.status, OutcomeStatus::RequiresApproval);
        assert!(outcome.summary.contains("#456"));
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn test_total_within_limit_is_submitted() {
        let mut fx = Fixture::new("refund please").with_order("123");
        fx.facts.order_total = Some(40.0);
        fx.escalation.refund_auto_approve_limit = Some(100.0);
        let calls = calls(ResolutionHandler.plan(&fx.ctx(), &refund()));
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn test_exchange_needs_recommendation() {
        let fx = Fixture::new("yes please").with_order("123");
        let exchange = Intent::new(IntentLabel::RequestExchange, 0.9);
        let outcome = immediate(ResolutionHandler.plan(&fx.ctx(), &exchange));
        assert_eq!(outcome.status, OutcomeStatus::NeedsClarification);

        let mut fx = Fixture::new("yes please").with_order("123");
        fx.facts.recommended_item = Some("sku-2".into());
        let calls = calls(ResolutionHandler.plan(&fx.ctx(), &exchange));
        assert_eq!(
            calls,
            vec![ServiceRequest::Exchange(ExchangeRequest {
                order_id: "123".into(),
                new_item_id: "sku-2".into(),
                idempotency_key: format!("{}:0:exchange", fx.session.id),
            })]
        );
    }

    #[test]
    fn test_approved_refund_reports_action() {
        let fx = Fixture::new("refund please").with_order("123");
        let record = succeeded(
            refund_request(Some(39.99)),
            ServiceResponse::Transaction(tx("approved")),
        );
        let outcome = ResolutionHandler.handle(&fx.ctx(), &refund(), &[record]);

        assert_eq!(outcome.status, OutcomeStatus::Resolved);
        assert!(outcome.summary.contains("$39.99"));
        assert_eq!(
            outcome.actions,
            vec![TurnAction::RefundIssued {
                order_id: "123".into(),
                transaction_id: "RF-1".into(),
                amount: Some(39.99),
                status: "approved".into(),
            }]
        );
        assert_eq!(
            outcome.status_note.unwrap().text,
            "Order #123 status: refund pending."
        );
    }

    #[test]
    fn test_declined_refund_fails() {
        let fx = Fixture::new("refund please").with_order("123");
        let record = succeeded(refund_request(None), ServiceResponse::Transaction(tx("declined")));
        let outcome = ResolutionHandler.handle(&fx.ctx(), &refund(), &[record]);
        assert_eq!(
            outcome.status,
            OutcomeStatus::Failed {
                retry_eligible: false
            }
        );
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn test_blocked_transaction_is_fatal() {
        let fx = Fixture::new("refund please").with_order("123");
        let record = succeeded(refund_request(None), ServiceResponse::Transaction(tx("blocked")));
        let outcome = ResolutionHandler.handle(&fx.ctx(), &refund(), &[record]);
        assert_eq!(outcome.status, OutcomeStatus::Fatal);
    }

    #[test]
    fn test_timeout_degrades() {
        let fx = Fixture::new("refund please").with_order("123");
        let record = with_status(refund_request(None), CallStatus::TimedOut);
        let outcome = ResolutionHandler.handle(&fx.ctx(), &refund(), &[record]);
        assert_eq!(outcome.status, OutcomeStatus::Degraded);
        assert!(outcome.status.is_failure());
    }
}
