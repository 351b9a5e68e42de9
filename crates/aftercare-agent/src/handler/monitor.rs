//! Order tracking and shipping issue detection.

use chrono::NaiveDate;
use serde::Serialize;

use aftercare_adapters::{ExternalCallRecord, OrderStatus, ServiceError, ServiceRequest, ServiceResponse};
use aftercare_core::types::Timestamp;

use super::{
    unavailable, view, CallView, CapabilityHandler, FactUpdate, HandlerContext, HandlerOutcome,
    HandlerPlan, OutcomePayload, OutcomeStatus,
};
use crate::intent::Intent;
use crate::router::Capability;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
}

/// A problem spotted in an order's shipping status.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShippingIssue {
    pub kind: String,
    pub severity: IssueSeverity,
    pub suggestion: String,
}

impl ShippingIssue {
    fn new(kind: &str, severity: IssueSeverity, suggestion: &str) -> Self {
        Self {
            kind: kind.to_string(),
            severity,
            suggestion: suggestion.to_string(),
        }
    }
}

/// Detect issues from a status report. `now` decides whether an ISO ETA has passed.
pub fn detect_issues(order: &OrderStatus, now: Timestamp) -> Vec<ShippingIssue> {
    let mut issues = Vec::new();
    match order.status.as_str() {
        "delayed" => issues.push(ShippingIssue::new(
            "delayed",
            IssueSeverity::Medium,
            "The carrier reports a delay; a new estimate usually follows within a day.",
        )),
        "exception" => issues.push(ShippingIssue::new(
            "exception",
            IssueSeverity::High,
            "The carrier flagged a delivery exception; we can open a trace with them.",
        )),
        "lost" => issues.push(ShippingIssue::new(
            "lost",
            IssueSeverity::High,
            "The parcel appears lost; you are eligible for a replacement or refund.",
        )),
        "delivery_attempted" => issues.push(ShippingIssue::new(
            "delivery_attempted",
            IssueSeverity::Low,
            "A delivery was attempted; check for a carrier notice to reschedule.",
        )),
        _ => {}
    }

    let in_flight = !matches!(order.status.as_str(), "delivered" | "lost");
    if in_flight {
        if let Some(eta) = order.eta.as_deref().and_then(parse_eta_date) {
            if eta < now.to_datetime().date_naive() {
                issues.push(ShippingIssue::new(
                    "past_eta",
                    IssueSeverity::Medium,
                    "The estimated delivery date has passed without a delivery scan.",
                ));
            }
        }
    }
    issues
}

fn parse_eta_date(eta: &str) -> Option<NaiveDate> {
    let head = eta.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// How the carrier is named after a status phrase.
enum CarrierForm {
    With,
    By,
    Aside,
}

/// Reads after "Your order #123 ...". Unknown statuses fall back to their
/// humanized tag.
fn status_phrase(status: &str) -> (String, CarrierForm) {
    let (phrase, form) = match status {
        "processing" => ("is being prepared", CarrierForm::Aside),
        "shipped" => ("has shipped", CarrierForm::With),
        "in_transit" => ("is in transit", CarrierForm::With),
        "out_for_delivery" => ("is out for delivery", CarrierForm::With),
        "delayed" => ("is delayed", CarrierForm::With),
        "exception" => ("has a delivery exception", CarrierForm::Aside),
        "lost" => ("appears to be lost", CarrierForm::Aside),
        "delivery_attempted" => ("had a missed delivery attempt", CarrierForm::Aside),
        "delivered" => ("was delivered", CarrierForm::By),
        "cancelled" => ("was cancelled", CarrierForm::Aside),
        other => {
            return (
                format!("is currently {}", other.replace('_', " ")),
                CarrierForm::Aside,
            )
        }
    };
    (phrase.to_string(), form)
}

fn status_line(order: &OrderStatus) -> String {
    let (phrase, form) = status_phrase(&order.status);
    let mut line = format!("Your order #{} {}", order.order_id, phrase);
    if let Some(carrier) = &order.carrier {
        match form {
            CarrierForm::With => line.push_str(&format!(" with {}", carrier)),
            CarrierForm::By => line.push_str(&format!(" by {}", carrier)),
            CarrierForm::Aside => line.push_str(&format!(" (carrier: {})", carrier)),
        }
    }
    match &order.eta {
        Some(eta) if !matches!(order.status.as_str(), "delivered" | "lost" | "cancelled") => {
            line.push_str(&format!(", expected delivery: {}.", eta))
        }
        _ => line.push('.'),
    }
    line
}

/// Looks up order status and flags shipping problems.
#[derive(Debug, Default)]
pub struct MonitorHandler;

impl CapabilityHandler for MonitorHandler {
    fn capability(&self) -> Capability {
        Capability::Monitor
    }

    fn plan(&self, ctx: &HandlerContext<'_>, _intent: &Intent) -> HandlerPlan {
        match &ctx.facts.order_id {
            Some(order_id) => HandlerPlan::Calls(vec![ServiceRequest::OrderStatus {
                order_id: order_id.clone(),
            }]),
            None => HandlerPlan::Immediate(HandlerOutcome::new(
                Capability::Monitor,
                OutcomeStatus::NeedsClarification,
                "Could you share your order number so I can look it up?",
            )),
        }
    }

    fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        _intent: &Intent,
        records: &[ExternalCallRecord],
    ) -> HandlerOutcome {
        let view = view(records);
        let order = match &view {
            CallView::Ok(ServiceResponse::Order(order)) => order,
            CallView::Failed(ServiceError::NotFound(_)) => {
                let order_id = ctx.facts.order_id.as_deref().unwrap_or("");
                return HandlerOutcome::new(
                    Capability::Monitor,
                    OutcomeStatus::Failed {
                        retry_eligible: false,
                    },
                    format!(
                        "I couldn't find an order #{}. Could you double-check the number?",
                        order_id
                    ),
                );
            }
            other => return unavailable(Capability::Monitor, other, "order tracking service"),
        };

        let issues = detect_issues(order, ctx.now);
        // The status itself goes in the note so it is rendered once per order.
        let summary = issues
            .iter()
            .max_by_key(|i| i.severity)
            .map(|worst| worst.suggestion.clone())
            .unwrap_or_default();
        HandlerOutcome::new(Capability::Monitor, OutcomeStatus::Resolved, summary)
            .with_note(&order.order_id, status_line(order))
            .with_facts(FactUpdate {
                order_total: order.total,
                ..Default::default()
            })
            .with_payload(OutcomePayload::Order {
                order: order.clone(),
                issues,
            })
    }
}
