//! Policy answers for general inquiries.

use aftercare_adapters::{ExternalCallRecord, IndexCollection, IndexQuery, ServiceRequest};

use super::{
    hits, view, CallView, CapabilityHandler, HandlerContext, HandlerOutcome, HandlerPlan,
    OutcomePayload, OutcomeStatus,
};
use crate::intent::Intent;
use crate::router::Capability;

#[derive(Debug, Default)]
pub struct GeneralHandler;

impl CapabilityHandler for GeneralHandler {
    fn capability(&self) -> Capability {
        Capability::General
    }

    fn plan(&self, ctx: &HandlerContext<'_>, _intent: &Intent) -> HandlerPlan {
        HandlerPlan::Calls(vec![ServiceRequest::Query(IndexQuery {
            text: ctx.message.text.clone(),
            k: ctx.routing.policy_top_k.max(1),
            collection: IndexCollection::Policies,
        })])
    }

    fn handle(
        &self,
        _ctx: &HandlerContext<'_>,
        _intent: &Intent,
        records: &[ExternalCallRecord],
    ) -> HandlerOutcome {
        let snippets: Vec<String> = match view(records) {
            CallView::Ok(response) => hits(response)
                .unwrap_or_default()
                .iter()
                .map(|h| h.text().unwrap_or_else(|| h.title()).to_string())
                .collect(),
            _ => {
                return HandlerOutcome::new(
                    Capability::General,
                    OutcomeStatus::Degraded,
                    "I can't look up our policies right now. Is there an order I can help you with?",
                )
            }
        };

        match snippets.first() {
            Some(best) => HandlerOutcome::new(Capability::General, OutcomeStatus::Resolved, best.clone())
                .with_payload(OutcomePayload::Policy { snippets }),
            None => HandlerOutcome::new(
                Capability::General,
                OutcomeStatus::NeedsClarification,
                "I can help with order tracking, damaged items, exchanges and refunds. What do you need?",
            ),
        }
    }
}
