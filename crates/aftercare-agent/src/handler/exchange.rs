//! Substitute item search for exchanges.

use std::cmp::Ordering;

use aftercare_adapters::{ExternalCallRecord, IndexCollection, IndexHit, IndexQuery, ServiceRequest};

use super::{
    hits, unavailable, view, CallView, CapabilityHandler, ExchangeCandidate, FactUpdate,
    HandlerContext, HandlerOutcome, HandlerPlan, OutcomePayload, OutcomeStatus,
};
use crate::extract;
use crate::intent::Intent;
use crate::router::Capability;

#[derive(Debug, Default)]
pub struct ExchangeHandler;

/// Rank hits: drop those below `min_similarity`, order by score (doc id breaks
/// ties) and keep `top_n`. The first candidate is the recommendation.
pub fn rank_candidates(hits: &[IndexHit], min_similarity: f32, top_n: usize) -> Vec<ExchangeCandidate> {
    let mut ranked: Vec<&IndexHit> = hits.iter().filter(|h| h.score >= min_similarity).collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    ranked
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(i, hit)| ExchangeCandidate {
            item_id: hit.doc_id.clone(),
            name: hit.title().to_string(),
            score: hit.score,
            recommended: i == 0,
        })
        .collect()
}

impl CapabilityHandler for ExchangeHandler {
    fn capability(&self) -> Capability {
        Capability::Exchange
    }

    fn plan(&self, ctx: &HandlerContext<'_>, _intent: &Intent) -> HandlerPlan {
        let text = extract::requested_item(&ctx.message.text)
            .unwrap_or_else(|| ctx.message.text.clone());
        HandlerPlan::Calls(vec![ServiceRequest::Query(IndexQuery {
            text,
            k: ctx.routing.exchange_top_n.max(1) * 2,
            collection: IndexCollection::Products,
        })])
    }

    fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        _intent: &Intent,
        records: &[ExternalCallRecord],
    ) -> HandlerOutcome {
        let view = view(records);
        let found = match &view {
            CallView::Ok(response) => match hits(response) {
                Some(found) => found,
                None => return unavailable(Capability::Exchange, &view, "product catalogue"),
            },
            other => return unavailable(Capability::Exchange, other, "product catalogue"),
        };

        let candidates = rank_candidates(
            found,
            ctx.routing.exchange_min_similarity,
            ctx.routing.exchange_top_n,
        );
        let Some(best) = candidates.first() else {
            return HandlerOutcome::new(
                Capability::Exchange,
                OutcomeStatus::NeedsClarification,
                "I couldn't find a matching replacement. What would you like instead?",
            );
        };

        let named = extract::requested_item(&ctx.message.text).is_some();
        let mut summary = format!("I'd recommend {} as a replacement", best.name);
        if candidates.len() > 1 {
            let others: Vec<&str> = candidates[1..].iter().map(|c| c.name.as_str()).collect();
            summary.push_str(&format!(" (other options: {})", others.join(", ")));
        }
        if named && ctx.facts.order_id.is_some() {
            summary.push('.');
        } else {
            summary.push_str(". Would you like me to set up the exchange?");
        }

        let recommended_item = best.item_id.clone();
        HandlerOutcome::new(Capability::Exchange, OutcomeStatus::Resolved, summary)
            .with_facts(FactUpdate {
                recommended_item: Some(recommended_item),
                ..Default::default()
            })
            .with_payload(OutcomePayload::Exchange { candidates, named })
    }
}
