//! Defect confirmation from customer photos.

use aftercare_adapters::{ExternalCallRecord, ServiceError, ServiceRequest, ServiceResponse};

use super::{
    unavailable, view, CallView, CapabilityHandler, FactUpdate, HandlerContext, HandlerOutcome,
    HandlerPlan, OutcomePayload, OutcomeStatus,
};
use crate::intent::Intent;
use crate::router::Capability;

#[derive(Debug, Default)]
pub struct VisualHandler;

fn needs_image(summary: &str) -> HandlerOutcome {
    HandlerOutcome::new(Capability::Visual, OutcomeStatus::NeedsImage, summary)
}

impl CapabilityHandler for VisualHandler {
    fn capability(&self) -> Capability {
        Capability::Visual
    }

    fn plan(&self, ctx: &HandlerContext<'_>, _intent: &Intent) -> HandlerPlan {
        match &ctx.message.image {
            Some(image) => HandlerPlan::Calls(vec![ServiceRequest::AnalyzeImage {
                image: image.clone(),
            }]),
            None => HandlerPlan::Immediate(needs_image(
                "I'm sorry to hear that. Could you send a photo of the item so I can take a look?",
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
        let report = match &view {
            CallView::Ok(ServiceResponse::Defect(report)) => report,
            CallView::Failed(ServiceError::Unprocessable(_)) => {
                return needs_image(
                    "I couldn't open that image. Could you send another photo of the item?",
                )
            }
            other => return unavailable(Capability::Visual, other, "image analysis service"),
        };

        let threshold = ctx.routing.defect_confidence_threshold;
        let payload = OutcomePayload::Defect(report.clone());
        if !report.is_defect() {
            return HandlerOutcome::new(
                Capability::Visual,
                OutcomeStatus::Resolved,
                "I looked at your photo but couldn't spot a defect. Could you describe what's wrong?",
            )
            .with_payload(payload);
        }
        if report.confidence < threshold {
            return needs_image(
                "The photo isn't clear enough for me to confirm the problem. Could you send a closer one?",
            )
            .with_payload(payload);
        }

        let defect = report.defect_type.replace('_', " ");
        HandlerOutcome::new(
            Capability::Visual,
            OutcomeStatus::Resolved,
            format!("I can see the {} in your photo, I'm sorry about that.", defect),
        )
        .with_payload(payload)
        .with_facts(FactUpdate {
            last_defect: Some(report.defect_type.clone()),
            ..Default::default()
        })
    }
}
