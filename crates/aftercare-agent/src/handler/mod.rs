//! Specialized capability handlers.
//!
//! Each handler owns one capability. `plan` names the external calls it
//! needs (or answers immediately); `handle` turns the finished call records
//! into an outcome. Neither touches the session: the controller applies
//! outcomes after the turn.

pub mod exchange;
pub mod general;
pub mod monitor;
pub mod resolution;
pub mod visual;

use serde::Serialize;

use aftercare_adapters::{
    CallStatus, DefectReport, ExternalCallRecord, IndexHit, OrderStatus, ServiceError,
    ServiceRequest, ServiceResponse, Transaction,
};
use aftercare_core::config::{EscalationConfig, RoutingConfig};
use aftercare_core::types::{Message, Session, SessionFacts, Timestamp};

use crate::intent::Intent;
use crate::router::Capability;

pub use exchange::ExchangeHandler;
pub use general::GeneralHandler;
pub use monitor::{IssueSeverity, MonitorHandler, ShippingIssue};
pub use resolution::ResolutionHandler;
pub use visual::VisualHandler;

/// How a handler's work ended.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Resolved,
    NeedsClarification,
    NeedsImage,
    RequiresApproval,
    Failed { retry_eligible: bool },
    /// An input timed out; the answer is partial.
    Degraded,
    /// Automated handling must stop.
    Fatal,
}

impl OutcomeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeStatus::Resolved)
    }

    /// Counts as a failed resolution attempt.
    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeStatus::Failed { .. } | OutcomeStatus::Degraded)
    }

    pub fn asks_customer(&self) -> bool {
        matches!(
            self,
            OutcomeStatus::NeedsClarification | OutcomeStatus::NeedsImage
        )
    }
}

/// Exchange candidate ranked by similarity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExchangeCandidate {
    pub item_id: String,
    pub name: String,
    pub score: f32,
    pub recommended: bool,
}

/// Structured result carried by an outcome.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomePayload {
    None,
    Order {
        order: OrderStatus,
        issues: Vec<ShippingIssue>,
    },
    Defect(DefectReport),
    Exchange {
        candidates: Vec<ExchangeCandidate>,
        /// The customer named the replacement themselves.
        named: bool,
    },
    Transaction(Transaction),
    Policy {
        snippets: Vec<String>,
    },
}

/// Side effect performed during a turn, surfaced as a structured receipt.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnAction {
    RefundIssued {
        order_id: String,
        transaction_id: String,
        amount: Option<f64>,
        status: String,
    },
    ExchangeCreated {
        order_id: String,
        transaction_id: String,
        new_item_id: String,
        status: String,
    },
}

/// Order status line, rendered at most once per order by the composer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusNote {
    pub order_id: String,
    pub text: String,
}

/// Facts an outcome contributes to the session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FactUpdate {
    pub order_total: Option<f64>,
    pub last_defect: Option<String>,
    pub recommended_item: Option<String>,
}

impl FactUpdate {
    pub fn apply_to(&self, facts: &mut SessionFacts) {
        if let Some(total) = self.order_total {
            facts.order_total = Some(total);
        }
        if let Some(defect) = &self.last_defect {
            facts.last_defect = Some(defect.clone());
        }
        if let Some(item) = &self.recommended_item {
            facts.recommended_item = Some(item.clone());
        }
    }
}

/// What one handler produced for one turn.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HandlerOutcome {
    pub capability: Capability,
    pub status: OutcomeStatus,
    pub payload: OutcomePayload,
    /// Customer-facing text.
    pub summary: String,
    /// Composer ordering; higher first.
    pub priority: u8,
    pub status_note: Option<StatusNote>,
    pub actions: Vec<TurnAction>,
    #[serde(skip)]
    pub facts: FactUpdate,
}

impl HandlerOutcome {
    pub fn new(capability: Capability, status: OutcomeStatus, summary: impl Into<String>) -> Self {
        Self {
            capability,
            status,
            payload: OutcomePayload::None,
            summary: summary.into(),
            priority: capability.priority(),
            status_note: None,
            actions: Vec::new(),
            facts: FactUpdate::default(),
        }
    }

    pub fn with_payload(mut self, payload: OutcomePayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_note(mut self, order_id: &str, text: impl Into<String>) -> Self {
        self.status_note = Some(StatusNote {
            order_id: order_id.to_string(),
            text: text.into(),
        });
        self
    }

    pub fn with_action(mut self, action: TurnAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_facts(mut self, facts: FactUpdate) -> Self {
        self.facts = facts;
        self
    }

    /// The defect report, if this is a Visual outcome that got one.
    pub fn defect(&self) -> Option<&DefectReport> {
        match &self.payload {
            OutcomePayload::Defect(report) => Some(report),
            _ => None,
        }
    }
}

/// Read-only view of the turn handed to every handler.
pub struct HandlerContext<'a> {
    pub session: &'a Session,
    /// Session facts plus whatever earlier stages of this turn learned.
    pub facts: &'a SessionFacts,
    /// The customer message being answered.
    pub message: &'a Message,
    /// Outcomes of earlier stages in this turn.
    pub prior: &'a [HandlerOutcome],
    pub routing: &'a RoutingConfig,
    pub escalation: &'a EscalationConfig,
    pub now: Timestamp,
}

/// What a handler needs before it can produce an outcome.
#[derive(Clone, Debug, PartialEq)]
pub enum HandlerPlan {
    Calls(Vec<ServiceRequest>),
    Immediate(HandlerOutcome),
}

/// One capability.
pub trait CapabilityHandler: Send + Sync {
    fn capability(&self) -> Capability;

    fn plan(&self, ctx: &HandlerContext<'_>, intent: &Intent) -> HandlerPlan;

    /// Build the outcome from finished (or timed-out) call records. Pure.
    fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        intent: &Intent,
        records: &[ExternalCallRecord],
    ) -> HandlerOutcome;
}

/// The closed set of handlers, one per capability.
#[derive(Default)]
pub struct HandlerSet {
    monitor: MonitorHandler,
    visual: VisualHandler,
    exchange: ExchangeHandler,
    resolution: ResolutionHandler,
    general: GeneralHandler,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, capability: Capability) -> &dyn CapabilityHandler {
        match capability {
            Capability::Monitor => &self.monitor,
            Capability::Visual => &self.visual,
            Capability::Exchange => &self.exchange,
            Capability::Resolution => &self.resolution,
            Capability::General => &self.general,
        }
    }
}

/// How a single call record reads from a handler's point of view.
pub(crate) enum CallView<'a> {
    Ok(&'a ServiceResponse),
    TimedOut,
    Failed(&'a ServiceError),
    Missing,
}

pub(crate) fn view(records: &[ExternalCallRecord]) -> CallView<'_> {
    match records.first() {
        None => CallView::Missing,
        Some(record) => match &record.status {
            CallStatus::Succeeded(response) => CallView::Ok(response),
            CallStatus::Failed(ServiceError::Timeout(_)) | CallStatus::TimedOut => {
                CallView::TimedOut
            }
            CallStatus::Failed(err) => CallView::Failed(err),
            CallStatus::Pending => CallView::TimedOut,
        },
    }
}

/// Outcome for a call that did not produce a usable answer.
pub(crate) fn unavailable(
    capability: Capability,
    view: &CallView<'_>,
    what: &str,
) -> HandlerOutcome {
    match view {
        CallView::TimedOut => HandlerOutcome::new(
            capability,
            OutcomeStatus::Degraded,
            format!("The {} is taking longer than usual to respond.", what),
        ),
        CallView::Failed(err) => HandlerOutcome::new(
            capability,
            OutcomeStatus::Failed {
                retry_eligible: err.is_retryable(),
            },
            format!("I couldn't reach the {} just now.", what),
        ),
        CallView::Ok(_) | CallView::Missing => HandlerOutcome::new(
            capability,
            OutcomeStatus::Failed {
                retry_eligible: false,
            },
            format!("The {} returned an unexpected answer.", what),
        ),
    }
}

/// Hits from a successful index query.
pub(crate) fn hits(response: &ServiceResponse) -> Option<&[IndexHit]> {
    match response {
        ServiceResponse::Hits { hits } => Some(hits),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use aftercare_adapters::{CallStatus, ExternalCallRecord, ServiceRequest, ServiceResponse};
    use aftercare_core::types::Session;
    use uuid::Uuid;

    /// Owns everything a `HandlerContext` borrows.
    pub struct Fixture {
        pub session: Session,
        pub facts: SessionFacts,
        pub message: Message,
        pub prior: Vec<HandlerOutcome>,
        pub routing: RoutingConfig,
        pub escalation: EscalationConfig,
    }

    impl Fixture {
        pub fn new(text: &str) -> Self {
            Self {
                session: Session::new(Uuid::new_v4()),
                facts: SessionFacts::default(),
                message: Message::customer(text),
                prior: Vec::new(),
                routing: RoutingConfig::default(),
                escalation: EscalationConfig::default(),
            }
        }

        pub fn with_order(mut self, order_id: &str) -> Self {
            self.facts.order_id = Some(order_id.to_string());
            self
        }

        pub fn ctx(&self) -> HandlerContext<'_> {
            HandlerContext {
                session: &self.session,
                facts: &self.facts,
                message: &self.message,
                prior: &self.prior,
                routing: &self.routing,
                escalation: &self.escalation,
                now: Timestamp(1_700_000_000),
            }
        }
    }

    pub fn succeeded(request: ServiceRequest, response: ServiceResponse) -> ExternalCallRecord {
        let mut record = ExternalCallRecord::pending(request);
        record.status = CallStatus::Succeeded(response);
        record.attempts = 1;
        record
    }

    pub fn with_status(request: ServiceRequest, status: CallStatus) -> ExternalCallRecord {
        let mut record = ExternalCallRecord::pending(request);
        record.status = status;
        record.attempts = 1;
        record
    }

    pub fn calls(plan: HandlerPlan) -> Vec<ServiceRequest> {
        match plan {
            HandlerPlan::Calls(calls) => calls,
            HandlerPlan::Immediate(outcome) => panic!("expected calls, got {:?}", outcome),
        }
    }

    pub fn immediate(plan: HandlerPlan) -> HandlerOutcome {
        match plan {
            HandlerPlan::Immediate(outcome) => outcome,
            HandlerPlan::Calls(calls) => panic!("expected immediate outcome, got {:?}", calls),
        }
    }
}
