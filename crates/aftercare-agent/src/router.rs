//! Capability routing: maps an intent plus session context to a dispatch plan.
//!
//! Handlers within a stage run concurrently; stages run in order. A follow-up
//! stage is chosen only after the first stage's outcomes are known.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::handler::{HandlerOutcome, OutcomePayload, OutcomeStatus};
use crate::intent::{Intent, IntentLabel};

/// Specialized handler kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Monitor,
    Visual,
    Exchange,
    Resolution,
    General,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Monitor,
        Capability::Visual,
        Capability::Exchange,
        Capability::Resolution,
        Capability::General,
    ];

    /// Composer priority; higher outcomes are rendered first.
    pub fn priority(&self) -> u8 {
        match self {
            Capability::Resolution => 4,
            Capability::Exchange => 3,
            Capability::Visual => 2,
            Capability::Monitor => 1,
            Capability::General => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Monitor => "monitor",
            Capability::Visual => "visual",
            Capability::Exchange => "exchange",
            Capability::Resolution => "resolution",
            Capability::General => "general",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered stages of capabilities to run for one turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DispatchPlan {
    pub stages: Vec<Vec<Capability>>,
}

impl DispatchPlan {
    pub fn new(stages: Vec<Vec<Capability>>) -> Self {
        let stages = stages
            .into_iter()
            .filter(|stage| !stage.is_empty())
            .map(sort_stage)
            .collect();
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Highest-priority capability of the first stage.
    pub fn primary(&self) -> Option<Capability> {
        self.stages.first().and_then(|stage| stage.first().copied())
    }

    /// Every capability in stage order.
    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.stages.iter().flatten().copied()
    }
}

fn sort_stage(mut stage: Vec<Capability>) -> Vec<Capability> {
    stage.sort_by(|a, b| b.priority().cmp(&a.priority()));
    stage.dedup();
    stage
}

/// Session facts the router looks at.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RouteContext {
    pub order_known: bool,
    pub total_known: bool,
    /// The customer named a replacement item in this message.
    pub names_item: bool,
    /// The customer accepted a previously recommended exchange item.
    pub confirms_recommendation: bool,
}

/// Initial dispatch plan for an intent.
pub fn plan(intent: &Intent, ctx: &RouteContext) -> DispatchPlan {
    use Capability::*;

    let stages = match intent.label {
        IntentLabel::TrackOrder => vec![vec![Monitor]],
        IntentLabel::ReportDefect if ctx.order_known => vec![vec![Visual, Monitor]],
        IntentLabel::ReportDefect => vec![vec![Visual]],
        IntentLabel::RequestExchange if ctx.order_known && ctx.confirms_recommendation => {
            vec![vec![Resolution]]
        }
        IntentLabel::RequestExchange => vec![vec![Exchange]],
        // The refund amount comes from the order; look it up first when unknown.
        IntentLabel::RequestRefund if ctx.order_known && !ctx.total_known => {
            vec![vec![Monitor], vec![Resolution]]
        }
        IntentLabel::RequestRefund => vec![vec![Resolution]],
        IntentLabel::GeneralInquiry => vec![vec![General]],
        IntentLabel::Escalate => Vec::new(),
    };
    DispatchPlan::new(stages)
}

/// Follow-up stage decided from the first stage's outcomes, if any.
pub fn follow_up(
    intent: &Intent,
    ctx: &RouteContext,
    outcomes: &[HandlerOutcome],
    defect_threshold: f32,
) -> Option<Vec<Capability>> {
    match intent.label {
        IntentLabel::ReportDefect => {
            let confirmed = outcomes.iter().any(|o| {
                o.capability == Capability::Visual
                    && o.status == OutcomeStatus::Resolved
                    && o.defect()
                        .map(|d| d.is_defect() && d.confidence >= defect_threshold)
                        .unwrap_or(false)
            });
            confirmed.then(|| vec![Capability::Resolution])
        }
        IntentLabel::RequestExchange if ctx.order_known => {
            let named = outcomes.iter().any(|o| {
                o.capability == Capability::Exchange
                    && o.status == OutcomeStatus::Resolved
                    && matches!(o.payload, OutcomePayload::Exchange { named: true, .. })
            });
            named.then(|| vec![Capability::Resolution])
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ExchangeCandidate;
    use aftercare_adapters::DefectReport;

    fn intent(label: IntentLabel) -> Intent {
        Intent::new(label, 0.9)
    }

    fn with_order() -> RouteContext {
        RouteContext {
            order_known: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_track_routes_to_monitor() {
        let plan = plan(&intent(IntentLabel::TrackOrder), &RouteContext::default());
        assert_eq!(plan.stages, vec![vec![Capability::Monitor]]);
        assert_eq!(plan.primary(), Some(Capability::Monitor));
    }

    #[test]
    fn test_defect_with_order_runs_visual_and_monitor_together() {
        let plan = plan(&intent(IntentLabel::ReportDefect), &with_order());
        assert_eq!(plan.stages, vec![vec![Capability::Visual, Capability::Monitor]]);

        let plan = super::plan(&intent(IntentLabel::ReportDefect), &RouteContext::default());
        assert_eq!(plan.stages, vec![vec![Capability::Visual]]);
    }

    #[test]
    fn test_refund_looks_up_order_when_total_unknown() {
        let plan = plan(&intent(IntentLabel::RequestRefund), &with_order());
        assert_eq!(
            plan.stages,
            vec![vec![Capability::Monitor], vec![Capability::Resolution]]
        );

        let ctx = RouteContext {
            order_known: true,
            total_known: true,
            ..Default::default()
        };
        let plan = super::plan(&intent(IntentLabel::RequestRefund), &ctx);
        assert_eq!(plan.stages, vec![vec![Capability::Resolution]]);

        let plan = super::plan(&intent(IntentLabel::RequestRefund), &RouteContext::default());
        assert_eq!(plan.stages, vec![vec![Capability::Resolution]]);
    }

    #[test]
    fn test_exchange_routing() {
        let plan = plan(&intent(IntentLabel::RequestExchange), &with_order());
        assert_eq!(plan.stages, vec![vec![Capability::Exchange]]);

        let ctx = RouteContext {
            order_known: true,
            confirms_recommendation: true,
            ..Default::default()
        };
        let plan = super::plan(&intent(IntentLabel::RequestExchange), &ctx);
        assert_eq!(plan.stages, vec![vec![Capability::Resolution]]);

        // Confirmation without an order still needs a recommendation first.
        let ctx = RouteContext {
            confirms_recommendation: true,
            ..Default::default()
        };
        let plan = super::plan(&intent(IntentLabel::RequestExchange), &ctx);
        assert_eq!(plan.primary(), Some(Capability::Exchange));
    }

    #[test]
    fn test_general_and_escalate() {
        let plan = plan(&intent(IntentLabel::GeneralInquiry), &RouteContext::default());
        assert_eq!(plan.primary(), Some(Capability::General));
        let plan = super::plan(&intent(IntentLabel::Escalate), &with_order());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_stage_sorted_by_priority_and_deduped() {
        let plan = DispatchPlan::new(vec![
            vec![Capability::Monitor, Capability::Resolution, Capability::Monitor],
            vec![],
        ]);
        assert_eq!(
            plan.stages,
            vec![vec![Capability::Resolution, Capability::Monitor]]
        );
        assert_eq!(plan.capabilities().count(), 2);
    }

    fn visual(defect_type: &str, confidence: f32) -> HandlerOutcome {
        HandlerOutcome::new(Capability::Visual, OutcomeStatus::Resolved, "seen").with_payload(
            OutcomePayload::Defect(DefectReport {
                defect_type: defect_type.into(),
                confidence,
            }),
        )
    }

    #[test]
    fn test_confirmed_defect_follows_up_with_resolution() {
        let i = intent(IntentLabel::ReportDefect);
        let ctx = with_order();
        assert_eq!(
            follow_up(&i, &ctx, &[visual("tear", 0.92)], 0.75),
            Some(vec![Capability::Resolution])
        );
        assert_eq!(follow_up(&i, &ctx, &[visual("tear", 0.5)], 0.75), None);
        assert_eq!(follow_up(&i, &ctx, &[visual("none", 0.99)], 0.75), None);
    }

    #[test]
    fn test_named_exchange_follows_up_when_order_known() {
        let outcome = HandlerOutcome::new(Capability::Exchange, OutcomeStatus::Resolved, "found")
            .with_payload(OutcomePayload::Exchange {
                candidates: vec![ExchangeCandidate {
                    item_id: "sku-2".into(),
                    name: "Blue Shirt".into(),
                    score: 0.9,
                    recommended: true,
                }],
                named: true,
            });
        let i = intent(IntentLabel::RequestExchange);
        assert_eq!(
            follow_up(&i, &with_order(), std::slice::from_ref(&outcome), 0.75),
            Some(vec![Capability::Resolution])
        );
        assert_eq!(
            follow_up(&i, &RouteContext::default(), &[outcome], 0.75),
            None
        );
    }

    #[test]
    fn test_capability_priority_order() {
        let mut caps = Capability::ALL.to_vec();
        caps.sort_by(|a, b| b.priority().cmp(&a.priority()));
        assert_eq!(caps.first(), Some(&Capability::Resolution));
        assert_eq!(caps.last(), Some(&Capability::General));
    }
}
